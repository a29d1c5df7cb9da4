//! Broker transport abstraction (mechanics only).
//!
//! The pipeline publishes through a topic/stream, consumes through named
//! queues (consumer groups) and acknowledges explicitly. Implementations make
//! no assumptions beyond that: the durable transport lives in
//! `vitalerp-infra`, while [`MemoryBroker`] is the non-durable fallback sink.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::message::{Delivery, WireMessage};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("declare failed: {0}")]
    Declare(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("acknowledge failed: {0}")]
    Ack(String),
}

/// A subscription to a queue.
///
/// Deliveries arrive through a channel so the consuming loop can poll with a
/// timeout and still observe its shutdown flag.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<Delivery>,
}

impl Subscription {
    pub fn new(receiver: Receiver<Delivery>) -> Self {
        Self { receiver }
    }

    /// Block until the next delivery is available.
    pub fn recv(&self) -> Result<Delivery, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery without blocking.
    pub fn try_recv(&self) -> Result<Delivery, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a delivery.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Delivery, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport to the message broker.
///
/// - `declare_topic` is idempotent; the publisher calls it on every drain run
/// - `publish` must honor the message's persistent flag where the transport
///   can
/// - consumption is queue-scoped with explicit `ack` and a dead-letter path
pub trait Broker: Send + Sync {
    fn declare_topic(&self, topic: &str) -> Result<(), BrokerError>;

    fn publish(&self, topic: &str, message: &WireMessage) -> Result<(), BrokerError>;

    /// Subscribe `queue` to `topic`; the queue is created when missing.
    fn subscribe(&self, topic: &str, queue: &str) -> Result<Subscription, BrokerError>;

    /// Acknowledge a processed delivery.
    fn ack(&self, topic: &str, queue: &str, delivery_id: &str) -> Result<(), BrokerError>;

    /// Park a delivery that cannot be processed.
    fn dead_letter(&self, topic: &str, delivery: &Delivery, reason: &str)
        -> Result<(), BrokerError>;
}

impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        (**self).declare_topic(topic)
    }

    fn publish(&self, topic: &str, message: &WireMessage) -> Result<(), BrokerError> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str, queue: &str) -> Result<Subscription, BrokerError> {
        (**self).subscribe(topic, queue)
    }

    fn ack(&self, topic: &str, queue: &str, delivery_id: &str) -> Result<(), BrokerError> {
        (**self).ack(topic, queue, delivery_id)
    }

    fn dead_letter(
        &self,
        topic: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), BrokerError> {
        (**self).dead_letter(topic, delivery, reason)
    }
}

/// Non-durable in-memory sink.
///
/// Records published messages and never delivers them to subscribers. This is
/// the degraded mode the pipeline falls back to when the real broker is
/// unreachable: the business side keeps accepting writes, and operators are
/// expected to notice the startup warning and the growing outbox.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    published: Mutex<Vec<(String, WireMessage)>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far, in publish order, paired with their topic.
    pub fn published(&self) -> Vec<(String, WireMessage)> {
        self.published
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl Broker for MemoryBroker {
    fn declare_topic(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn publish(&self, topic: &str, message: &WireMessage) -> Result<(), BrokerError> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| BrokerError::Publish("sink lock poisoned".to_string()))?;
        published.push((topic.to_string(), message.clone()));
        Ok(())
    }

    fn subscribe(&self, _topic: &str, _queue: &str) -> Result<Subscription, BrokerError> {
        // The sender is dropped immediately: a subscription against the sink
        // never yields a delivery.
        let (_tx, rx) = std::sync::mpsc::channel();
        Ok(Subscription::new(rx))
    }

    fn ack(&self, _topic: &str, _queue: &str, _delivery_id: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn dead_letter(
        &self,
        topic: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), BrokerError> {
        warn!(topic, delivery_id = %delivery.delivery_id, reason, "dead-letter on in-memory sink");
        Ok(())
    }
}
