//! Outbox drain loop.
//!
//! Invoked by an external scheduler, one run at a time. Each run claims a
//! batch of pending rows, ships them to the broker and settles every row:
//! published on success, retried up to the attempt cap on failure, failed
//! permanently after the cap.

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use vitalerp_events::{
    routing_key, Broker, BrokerError, OutboxError, OutboxRow, OutboxStore, WireMessage,
    MAX_ATTEMPTS,
};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Stream/exchange every staged event is published to.
    pub topic: String,

    /// Max rows claimed per drain run.
    pub batch_size: usize,

    /// Attempts before a row is permanently failed.
    pub max_attempts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "vitalerp.events".to_string(),
            batch_size: 50,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// Per-run outcome, for logs and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// The topic declare failed; without it nothing can be shipped.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Drains the outbox into the broker.
pub struct OutboxPublisher<S, B> {
    store: S,
    broker: B,
    config: PublisherConfig,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OutboxStore,
    B: Broker,
{
    pub fn new(store: S, broker: B, config: PublisherConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// One scheduled drain run.
    #[instrument(skip(self), fields(topic = %self.config.topic))]
    pub fn drain_once(&self) -> Result<DrainReport, DrainError> {
        self.broker.declare_topic(&self.config.topic)?;

        let batch = self
            .store
            .claim_pending(self.config.batch_size, self.config.max_attempts)?;

        let mut report = DrainReport {
            claimed: batch.len(),
            ..DrainReport::default()
        };

        for row in batch {
            let message = wire_message(&row);
            match self.broker.publish(&self.config.topic, &message) {
                Ok(()) => {
                    self.store.mark_published(row.id)?;
                    report.published += 1;
                }
                Err(err) => {
                    warn!(
                        row_id = %row.id,
                        event_type = %row.event_type,
                        attempt = row.retry_count + 1,
                        error = %err,
                        "publish failed"
                    );
                    self.store.increment_retry(row.id)?;

                    // `retry_count` still holds the pre-increment value: a row
                    // on its final attempt is failed permanently.
                    if row.retry_count + 1 >= self.config.max_attempts {
                        self.store.mark_failed(row.id)?;
                        error!(
                            row_id = %row.id,
                            event_type = %row.event_type,
                            "delivery failed permanently"
                        );
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        info!(
            claimed = report.claimed,
            published = report.published,
            retried = report.retried,
            failed = report.failed,
            "outbox drain complete"
        );
        Ok(report)
    }
}

/// Build the broker message for one staged row.
///
/// The message id is the row id, the type header the stored event type, the
/// body the staged payload verbatim; the routing key is derived from the
/// type name.
fn wire_message(row: &OutboxRow) -> WireMessage {
    WireMessage {
        message_id: row.id,
        event_type: row.event_type.clone(),
        routing_key: routing_key(&row.event_type),
        body: row.event_data.clone(),
        persistent: true,
    }
}
