//! Inbound queue consumers.
//!
//! One consumer per logical queue: a synchronous, single-threaded loop that
//! receives wire messages, decodes them tolerantly, maps them to a typed
//! command and invokes the handler directly (the dispatcher is bypassed on
//! this path). Scaling out means running more consumer processes per queue.
//!
//! A delivery is acknowledged only after its handler succeeds; deliveries
//! that cannot be decoded or are rejected by the handler go to the
//! dead-letter stream and are then acknowledged, so one poison message never
//! wedges a queue.

pub mod parse;
pub mod plan_assignment;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use vitalerp_events::{Broker, BrokerError, Delivery, Subscription};

pub use parse::ParseError;

/// How often the loop wakes up to check its shutdown flag.
const SHUTDOWN_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("handler rejected message: {0}")]
    Handler(String),
}

/// Decodes deliveries for one queue and drives the matching handler.
pub trait QueueBinding: Send {
    /// Queue name; doubles as the consumer-group identity on the broker.
    fn queue(&self) -> &str;

    /// Whether this queue cares about the delivery at all. Non-matching
    /// deliveries are acknowledged without processing.
    fn accepts(&self, delivery: &Delivery) -> bool {
        let _ = delivery;
        true
    }

    /// Decode and dispatch one delivery.
    fn process(&self, delivery: &Delivery) -> Result<(), ConsumerError>;
}

/// Handle to stop a running consumer loop and join its thread.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct QueueConsumer;

impl QueueConsumer {
    /// Spawn the consumer loop on its own thread.
    pub fn spawn<B, Q>(broker: B, topic: String, binding: Q) -> Result<ConsumerHandle, BrokerError>
    where
        B: Broker + Send + Sync + 'static,
        Q: QueueBinding + 'static,
    {
        let subscription = broker.subscribe(&topic, binding.queue())?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        let thread_name = format!("consumer-{}", binding.queue());
        let join = thread::Builder::new()
            .name(thread_name)
            .spawn(move || consumer_loop(&broker, &topic, &binding, &subscription, &shutdown_rx))
            .map_err(|e| BrokerError::Connection(format!("failed to spawn consumer: {e}")))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Run the consumer loop on the current thread until `shutdown` fires or
    /// the subscription closes.
    pub fn run<B, Q>(
        broker: &B,
        topic: &str,
        binding: &Q,
        shutdown: &mpsc::Receiver<()>,
    ) -> Result<(), BrokerError>
    where
        B: Broker,
        Q: QueueBinding,
    {
        let subscription = broker.subscribe(topic, binding.queue())?;
        consumer_loop(broker, topic, binding, &subscription, shutdown);
        Ok(())
    }
}

fn consumer_loop<B, Q>(
    broker: &B,
    topic: &str,
    binding: &Q,
    subscription: &Subscription,
    shutdown: &mpsc::Receiver<()>,
) where
    B: Broker,
    Q: QueueBinding,
{
    info!(queue = binding.queue(), topic, "consumer started");

    loop {
        // Shutdown check (non-blocking).
        if shutdown.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(SHUTDOWN_TICK) {
            Ok(delivery) => handle_delivery(broker, topic, binding, &delivery),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!(queue = binding.queue(), "subscription closed; consumer stopping");
                break;
            }
        }
    }

    info!(queue = binding.queue(), "consumer stopped");
}

fn handle_delivery<B, Q>(broker: &B, topic: &str, binding: &Q, delivery: &Delivery)
where
    B: Broker,
    Q: QueueBinding,
{
    let queue = binding.queue();

    if !binding.accepts(delivery) {
        debug!(queue, delivery_id = %delivery.delivery_id, "delivery not for this queue");
        ack(broker, topic, queue, delivery);
        return;
    }

    match binding.process(delivery) {
        Ok(()) => {
            debug!(queue, delivery_id = %delivery.delivery_id, "delivery processed");
            ack(broker, topic, queue, delivery);
        }
        Err(err) => {
            error!(
                queue,
                delivery_id = %delivery.delivery_id,
                error = %err,
                raw = %delivery.body,
                "delivery rejected; dead-lettering"
            );
            if let Err(dlq_err) = broker.dead_letter(topic, delivery, &err.to_string()) {
                error!(queue, delivery_id = %delivery.delivery_id, error = %dlq_err, "dead-letter failed");
            }
            ack(broker, topic, queue, delivery);
        }
    }
}

fn ack<B: Broker>(broker: &B, topic: &str, queue: &str, delivery: &Delivery) {
    if let Err(err) = broker.ack(topic, queue, &delivery.delivery_id) {
        warn!(queue, delivery_id = %delivery.delivery_id, error = %err, "ack failed");
    }
}
