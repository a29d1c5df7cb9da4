//! End-to-end pipeline flows over the in-memory store and broker doubles.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::json;

use vitalerp_contracts::{
    AssignPlanHandler, Contract, ContractPeriod, ContractRepository, ContractState,
    InMemoryContractRepository, InMemoryServiceDirectory, Service, ServiceType,
};
use vitalerp_core::{ContractId, PatientId, ServiceId};
use vitalerp_events::{
    Broker, BrokerError, Delivery, DomainEvent, InMemoryOutboxStore, MemoryBroker, OutboxStatus,
    OutboxStore, Subscription, WireMessage, MAX_ATTEMPTS,
};
use vitalerp_infra::{OutboxPublisher, PlanAssignmentBinding, PublisherConfig, QueueConsumer};

/// Broker double whose publishes always fail with a transient error.
struct FailingBroker;

impl Broker for FailingBroker {
    fn declare_topic(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn publish(&self, _topic: &str, _message: &WireMessage) -> Result<(), BrokerError> {
        Err(BrokerError::Publish("connection reset".to_string()))
    }

    fn subscribe(&self, _topic: &str, _queue: &str) -> Result<Subscription, BrokerError> {
        let (_tx, rx) = mpsc::channel();
        Ok(Subscription::new(rx))
    }

    fn ack(&self, _topic: &str, _queue: &str, _delivery_id: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn dead_letter(
        &self,
        _topic: &str,
        _delivery: &Delivery,
        _reason: &str,
    ) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Broker double that feeds deliveries through a channel and records acks and
/// dead-letters.
#[derive(Default)]
struct ChannelBroker {
    acked: Mutex<Vec<String>>,
    dead_lettered: Mutex<Vec<(String, String)>>,
    feed: Mutex<Option<mpsc::Receiver<Delivery>>>,
}

impl ChannelBroker {
    fn with_feed() -> (Arc<Self>, mpsc::Sender<Delivery>) {
        let (tx, rx) = mpsc::channel();
        let broker = Arc::new(Self {
            feed: Mutex::new(Some(rx)),
            ..Self::default()
        });
        (broker, tx)
    }

    fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    fn dead_lettered(&self) -> Vec<(String, String)> {
        self.dead_lettered.lock().unwrap().clone()
    }
}

impl Broker for ChannelBroker {
    fn declare_topic(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    fn publish(&self, _topic: &str, _message: &WireMessage) -> Result<(), BrokerError> {
        Ok(())
    }

    fn subscribe(&self, _topic: &str, _queue: &str) -> Result<Subscription, BrokerError> {
        let receiver = self
            .feed
            .lock()
            .unwrap()
            .take()
            .expect("subscribe called twice");
        Ok(Subscription::new(receiver))
    }

    fn ack(&self, _topic: &str, _queue: &str, delivery_id: &str) -> Result<(), BrokerError> {
        self.acked.lock().unwrap().push(delivery_id.to_string());
        Ok(())
    }

    fn dead_letter(
        &self,
        _topic: &str,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), BrokerError> {
        self.dead_lettered
            .lock()
            .unwrap()
            .push((delivery.delivery_id.clone(), reason.to_string()));
        Ok(())
    }
}

fn active_catering_contract(repo: &InMemoryContractRepository) -> ContractId {
    let id = ContractId::new("c-1");
    let mut contract = Contract::open(
        id.clone(),
        PatientId::new("p-1"),
        ServiceId::new("s-cat"),
        ServiceType::Catering,
        None,
        ContractPeriod::open_ended(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    );
    contract.activate().unwrap();
    contract.take_events();
    repo.save(&contract).unwrap();
    id
}

#[test]
fn staged_event_is_published_with_derived_routing_key_and_row_id() {
    let store = InMemoryOutboxStore::arc();
    let broker = Arc::new(MemoryBroker::new());

    let event =
        vitalerp_contracts::ContractEvent::Activated(vitalerp_contracts::ContractActivated::new(
            ContractId::new("c-42"),
        ));
    let row_id = store
        .stage(
            event.event_type(),
            serde_json::Value::Object(event.payload()),
        )
        .unwrap();

    let publisher =
        OutboxPublisher::new(store.clone(), broker.clone(), PublisherConfig::default());
    let report = publisher.drain_once().unwrap();
    assert_eq!(report.published, 1);

    let row = store.get(row_id).unwrap();
    assert_eq!(row.status, OutboxStatus::Published);
    assert!(row.published_at.is_some());

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let (topic, message) = &published[0];
    assert_eq!(topic, "vitalerp.events");
    assert_eq!(message.message_id, row_id);
    assert!(message.routing_key.ends_with("contract.activated"));
    assert_eq!(message.body["contractId"], "c-42");
}

#[test]
fn three_failed_attempts_make_a_row_permanently_failed() {
    // Zero lease so every drain run can re-claim the row immediately.
    let store = Arc::new(InMemoryOutboxStore::new().with_lease(chrono::Duration::zero()));
    let id = store
        .stage(
            "Vitalerp.Contracts.Events.ContractCreated",
            json!({"contractId": "c-1"}),
        )
        .unwrap();

    let publisher = OutboxPublisher::new(store.clone(), FailingBroker, PublisherConfig::default());

    for attempt in 1..=2u32 {
        let report = publisher.drain_once().unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(store.get(id).unwrap().retry_count, attempt);
        assert_eq!(store.get(id).unwrap().status, OutboxStatus::Pending);
    }

    let report = publisher.drain_once().unwrap();
    assert_eq!(report.failed, 1);

    let row = store.get(id).unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 3);
    assert!(row.published_at.is_none());

    // A fourth drain has nothing left to claim.
    let report = publisher.drain_once().unwrap();
    assert_eq!(report.claimed, 0);
}

#[test]
fn second_drain_during_a_live_lease_claims_nothing() {
    let store = InMemoryOutboxStore::arc();
    store
        .stage("Vitalerp.Contracts.Events.ContractCreated", json!({}))
        .unwrap();

    let first = store.claim_pending(10, MAX_ATTEMPTS).unwrap();
    assert_eq!(first.len(), 1);
    assert!(store.claim_pending(10, MAX_ATTEMPTS).unwrap().is_empty());
}

#[test]
fn consumer_assigns_plans_from_double_encoded_messages() {
    let repo = InMemoryContractRepository::arc();
    let services = InMemoryServiceDirectory::arc();
    let outbox = InMemoryOutboxStore::arc();

    services.insert(Service {
        id: ServiceId::new("s-cat"),
        service_type: ServiceType::Catering,
    });
    let contract_id = active_catering_contract(&repo);

    let handler = AssignPlanHandler::new(repo.clone(), services.clone(), outbox.clone());
    let binding = PlanAssignmentBinding::new(handler);

    let (broker, feed) = ChannelBroker::with_feed();
    feed.send(Delivery {
        delivery_id: "1-0".to_string(),
        routing_key: Some("app.contracts.events.catering.contracted".to_string()),
        body: "\"{\\\"IdContrato\\\":\\\"c-1\\\",\\\"IdPlanAlimentario\\\":\\\"p1\\\"}\""
            .to_string(),
    })
    .unwrap();
    drop(feed); // loop stops once the channel drains

    let (_shutdown_tx, shutdown_rx) = mpsc::channel();
    QueueConsumer::run(&broker, "vitalerp.events", &binding, &shutdown_rx).unwrap();

    let contract = repo.find_by_id(&contract_id).unwrap().unwrap();
    assert_eq!(contract.state(), ContractState::Active);
    assert_eq!(contract.plan_id().unwrap().as_str(), "p1");

    // Ack after success, and the assignment announced a catering event.
    assert_eq!(broker.acked(), vec!["1-0".to_string()]);
    assert!(broker.dead_lettered().is_empty());
    let staged = outbox.all();
    assert_eq!(staged.len(), 1);
    assert_eq!(
        staged[0].event_type,
        "Vitalerp.Contracts.Events.CateringContracted"
    );
}

#[test]
fn malformed_messages_are_dead_lettered_and_acked() {
    let repo = InMemoryContractRepository::arc();
    let services = InMemoryServiceDirectory::arc();
    let outbox = InMemoryOutboxStore::arc();

    let handler = AssignPlanHandler::new(repo, services, outbox);
    let binding = PlanAssignmentBinding::new(handler);

    let (broker, feed) = ChannelBroker::with_feed();
    feed.send(Delivery {
        delivery_id: "1-0".to_string(),
        routing_key: None,
        body: "not json at all".to_string(),
    })
    .unwrap();
    drop(feed);

    let (_shutdown_tx, shutdown_rx) = mpsc::channel();
    QueueConsumer::run(&broker, "vitalerp.events", &binding, &shutdown_rx).unwrap();

    let dead = broker.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].1.contains("malformed message"));
    assert_eq!(broker.acked(), vec!["1-0".to_string()]);
}

#[test]
fn missing_fields_are_dead_lettered_with_the_field_name() {
    let repo = InMemoryContractRepository::arc();
    let services = InMemoryServiceDirectory::arc();
    let outbox = InMemoryOutboxStore::arc();

    let handler = AssignPlanHandler::new(repo, services, outbox);
    let binding = PlanAssignmentBinding::new(handler);

    let (broker, feed) = ChannelBroker::with_feed();
    feed.send(Delivery {
        delivery_id: "2-0".to_string(),
        routing_key: None,
        body: r#"{"idContrato":"c-1"}"#.to_string(),
    })
    .unwrap();
    drop(feed);

    let (_shutdown_tx, shutdown_rx) = mpsc::channel();
    QueueConsumer::run(&broker, "vitalerp.events", &binding, &shutdown_rx).unwrap();

    let dead = broker.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].1.contains("idPlanAlimentario"));
}

#[test]
fn unreachable_brokers_degrade_to_the_in_memory_sink() {
    // Nothing listens on port 1; the connect round-trip fails fast and the
    // handle degrades instead of erroring.
    let broker = vitalerp_infra::BrokerHandle::connect_or_fallback("redis://127.0.0.1:1");
    assert!(broker.is_fallback());

    // The degraded handle still accepts publishes (recorded, never delivered).
    let publisher = OutboxPublisher::new(
        InMemoryOutboxStore::arc(),
        broker,
        PublisherConfig::default(),
    );
    assert!(publisher.drain_once().is_ok());
}

#[test]
fn unrelated_routing_keys_are_acked_without_processing() {
    let repo = InMemoryContractRepository::arc();
    let services = InMemoryServiceDirectory::arc();
    let outbox = InMemoryOutboxStore::arc();

    let handler = AssignPlanHandler::new(repo, services, outbox.clone());
    let binding = PlanAssignmentBinding::new(handler);

    let (broker, feed) = ChannelBroker::with_feed();
    feed.send(Delivery {
        delivery_id: "3-0".to_string(),
        routing_key: Some("app.contracts.events.contract.created".to_string()),
        body: r#"{"idContrato":"c-1"}"#.to_string(),
    })
    .unwrap();
    drop(feed);

    let (_shutdown_tx, shutdown_rx) = mpsc::channel();
    QueueConsumer::run(&broker, "vitalerp.events", &binding, &shutdown_rx).unwrap();

    assert_eq!(broker.acked(), vec!["3-0".to_string()]);
    assert!(broker.dead_lettered().is_empty());
    assert!(outbox.all().is_empty());
}
