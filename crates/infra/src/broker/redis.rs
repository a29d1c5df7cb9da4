//! Redis Streams-backed broker.
//!
//! Publishing uses XADD (entries persist until trimmed, which is how the
//! persistent-delivery flag is honored here); queues are consumer groups
//! (XGROUP/XREADGROUP), acknowledgement is XACK and poison messages land on a
//! `<topic>:dlq` stream. Each publisher run and each consumer loop obtains
//! its own connection from the client and drops it when done; the client is
//! an owned value injected at construction, not a process-wide static.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tracing::{error, instrument, warn};
use uuid::Uuid;

use vitalerp_events::{Broker, BrokerError, Delivery, Subscription, WireMessage};

/// How long one XREADGROUP call blocks waiting for new entries.
const BLOCK_MS: u64 = 1000;

/// Entries fetched per XREADGROUP call.
const READ_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct RedisBroker {
    client: Arc<redis::Client>,
    consumer_name: String,
}

impl RedisBroker {
    /// Connect to the broker.
    ///
    /// Performs a PING round-trip so an unreachable broker fails here, where
    /// the caller can still decide to degrade, rather than on the first
    /// publish.
    pub fn connect(url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;

        let mut conn = client
            .get_connection()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            consumer_name: format!("consumer-{}", Uuid::now_v7()),
        })
    }

    fn connection(&self) -> Result<redis::Connection, BrokerError> {
        self.client
            .get_connection()
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn dlq_key(topic: &str) -> String {
        format!("{topic}:dlq")
    }

    /// XGROUP CREATE with MKSTREAM, ignoring "already exists".
    fn ensure_group(
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
    ) -> Result<(), BrokerError> {
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(conn);

        match created {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(BrokerError::Declare(err.to_string())),
        }
    }

    fn read_group(
        conn: &mut redis::Connection,
        topic: &str,
        queue: &str,
        consumer: &str,
        cursor: &str,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(queue)
            .arg(consumer)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(topic)
            .arg(cursor)
            .query(conn)
            .map_err(|e| BrokerError::Connection(format!("XREADGROUP failed: {e}")))?;

        Ok(parse_read_reply(reply))
    }
}

impl Broker for RedisBroker {
    /// Idempotent declare: MKSTREAM materializes the stream; the group
    /// registered here is the publisher's own and is never read from.
    fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        Self::ensure_group(&mut conn, topic, "publisher")
    }

    #[instrument(skip(self, message), fields(message_id = %message.message_id), err)]
    fn publish(&self, topic: &str, message: &WireMessage) -> Result<(), BrokerError> {
        let body = serde_json::to_string(&message.body)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;
        redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("message_id")
            .arg(message.message_id.to_string())
            .arg("type")
            .arg(&message.event_type)
            .arg("routing_key")
            .arg(&message.routing_key)
            .arg("persistent")
            .arg(if message.persistent { "1" } else { "0" })
            .arg("body")
            .arg(&body)
            .query::<String>(&mut conn)
            .map_err(|e| BrokerError::Publish(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn subscribe(&self, topic: &str, queue: &str) -> Result<Subscription, BrokerError> {
        let mut conn = self.connection()?;
        Self::ensure_group(&mut conn, topic, queue)?;

        let (tx, rx) = mpsc::channel();
        let topic = topic.to_string();
        let queue = queue.to_string();
        let consumer = self.consumer_name.clone();

        // Background reader: the first pass drains this consumer's unacked
        // entries ("0"), every later pass follows new entries (">").
        thread::spawn(move || {
            let mut cursor = "0";
            loop {
                let deliveries = match Self::read_group(&mut conn, &topic, &queue, &consumer, cursor)
                {
                    Ok(deliveries) => deliveries,
                    Err(err) => {
                        error!(topic = %topic, queue = %queue, error = %err, "stream read failed; subscription closing");
                        return;
                    }
                };
                cursor = ">";

                for delivery in deliveries {
                    if tx.send(delivery).is_err() {
                        // Subscriber dropped; nothing left to feed.
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    fn ack(&self, topic: &str, queue: &str, delivery_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        redis::cmd("XACK")
            .arg(topic)
            .arg(queue)
            .arg(delivery_id)
            .query::<u64>(&mut conn)
            .map_err(|e| BrokerError::Ack(format!("XACK failed: {e}")))?;
        Ok(())
    }

    fn dead_letter(
        &self,
        topic: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        redis::cmd("XADD")
            .arg(Self::dlq_key(topic))
            .arg("*")
            .arg("original_delivery_id")
            .arg(&delivery.delivery_id)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("body")
            .arg(&delivery.body)
            .query::<String>(&mut conn)
            .map_err(|e| BrokerError::Publish(format!("dead-letter XADD failed: {e}")))?;

        warn!(
            topic,
            delivery_id = %delivery.delivery_id,
            reason,
            "message dead-lettered"
        );
        Ok(())
    }
}

/// Parse an XREADGROUP reply.
///
/// Shape: `[[stream, [[id, [field, value, ...]], ...]]]`; a blocked read that
/// times out yields Nil. Entries that do not carry a `body` field are skipped
/// with a warning rather than failing the whole batch.
fn parse_read_reply(reply: redis::Value) -> Vec<Delivery> {
    let streams = match reply {
        redis::Value::Bulk(streams) => streams,
        _ => return Vec::new(),
    };

    let mut deliveries = Vec::new();
    for stream in streams {
        let redis::Value::Bulk(parts) = stream else {
            continue;
        };
        let Some(redis::Value::Bulk(entries)) = parts.into_iter().nth(1) else {
            continue;
        };

        for entry in entries {
            match parse_entry(entry) {
                Some(delivery) => deliveries.push(delivery),
                None => warn!("skipping malformed stream entry"),
            }
        }
    }
    deliveries
}

fn parse_entry(entry: redis::Value) -> Option<Delivery> {
    let redis::Value::Bulk(parts) = entry else {
        return None;
    };
    let mut parts = parts.into_iter();

    let delivery_id = as_string(parts.next()?)?;
    let redis::Value::Bulk(fields) = parts.next()? else {
        return None;
    };

    let mut routing_key = None;
    let mut body = None;
    for pair in fields.chunks(2) {
        let [key, value] = pair else { continue };
        let Some(key) = as_string_ref(key) else {
            continue;
        };
        match key.as_str() {
            "routing_key" => routing_key = as_string_ref(value),
            "body" => body = as_string_ref(value),
            _ => {}
        }
    }

    Some(Delivery {
        delivery_id,
        routing_key,
        body: body?,
    })
}

fn as_string(value: redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
        redis::Value::Status(s) => Some(s),
        _ => None,
    }
}

fn as_string_ref(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}
