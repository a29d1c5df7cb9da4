//! Broker transport implementations and the startup connection policy.

mod redis;

pub use redis::RedisBroker;

use tracing::{info, warn};

use vitalerp_events::{Broker, BrokerError, Delivery, MemoryBroker, Subscription, WireMessage};

/// Owned broker connection, resolved once at startup.
///
/// When the real broker cannot be reached the process degrades to the
/// in-memory sink: business writes keep succeeding, staged events keep
/// accumulating in the outbox, and nothing is delivered until the process is
/// restarted against a reachable broker. The trade (availability over
/// durability) is surfaced to operators as a startup warning.
#[derive(Debug)]
pub enum BrokerHandle {
    Redis(RedisBroker),
    Memory(MemoryBroker),
}

impl BrokerHandle {
    pub fn connect_or_fallback(url: &str) -> Self {
        match RedisBroker::connect(url) {
            Ok(broker) => {
                info!(url, "connected to broker");
                BrokerHandle::Redis(broker)
            }
            Err(err) => {
                warn!(
                    url,
                    error = %err,
                    "broker unreachable; falling back to non-durable in-memory sink"
                );
                BrokerHandle::Memory(MemoryBroker::new())
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, BrokerHandle::Memory(_))
    }
}

impl Broker for BrokerHandle {
    fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        match self {
            BrokerHandle::Redis(b) => b.declare_topic(topic),
            BrokerHandle::Memory(b) => b.declare_topic(topic),
        }
    }

    fn publish(&self, topic: &str, message: &WireMessage) -> Result<(), BrokerError> {
        match self {
            BrokerHandle::Redis(b) => b.publish(topic, message),
            BrokerHandle::Memory(b) => b.publish(topic, message),
        }
    }

    fn subscribe(&self, topic: &str, queue: &str) -> Result<Subscription, BrokerError> {
        match self {
            BrokerHandle::Redis(b) => b.subscribe(topic, queue),
            BrokerHandle::Memory(b) => b.subscribe(topic, queue),
        }
    }

    fn ack(&self, topic: &str, queue: &str, delivery_id: &str) -> Result<(), BrokerError> {
        match self {
            BrokerHandle::Redis(b) => b.ack(topic, queue, delivery_id),
            BrokerHandle::Memory(b) => b.ack(topic, queue, delivery_id),
        }
    }

    fn dead_letter(
        &self,
        topic: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), BrokerError> {
        match self {
            BrokerHandle::Redis(b) => b.dead_letter(topic, delivery, reason),
            BrokerHandle::Memory(b) => b.dead_letter(topic, delivery, reason),
        }
    }
}
