//! Contract domain events.
//!
//! Every event renders its own canonical payload map; the field names below
//! are wire contract and must survive internal renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vitalerp_core::{ContractId, PatientId, PlanId, ServiceId};
use vitalerp_events::{iso8601, DomainEvent};

/// Fact: a contract was opened in PENDING state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCreated {
    pub contract_id: ContractId,
    pub patient_id: PatientId,
    pub service_id: ServiceId,
    pub occurred_on: DateTime<Utc>,
}

impl ContractCreated {
    pub fn new(contract_id: ContractId, patient_id: PatientId, service_id: ServiceId) -> Self {
        Self {
            contract_id,
            patient_id,
            service_id,
            occurred_on: Utc::now(),
        }
    }
}

/// Fact: a pending contract became active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractActivated {
    pub contract_id: ContractId,
    pub occurred_on: DateTime<Utc>,
}

impl ContractActivated {
    pub fn new(contract_id: ContractId) -> Self {
        Self {
            contract_id,
            occurred_on: Utc::now(),
        }
    }
}

/// Fact: a contract was cancelled (terminal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCancelled {
    pub contract_id: ContractId,
    pub occurred_on: DateTime<Utc>,
}

impl ContractCancelled {
    pub fn new(contract_id: ContractId) -> Self {
        Self {
            contract_id,
            occurred_on: Utc::now(),
        }
    }
}

/// Fact: a meal plan was contracted for a catering service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CateringContracted {
    pub contract_id: ContractId,
    pub patient_id: PatientId,
    pub plan_id: PlanId,
    pub occurred_on: DateTime<Utc>,
}

impl CateringContracted {
    pub fn new(contract_id: ContractId, patient_id: PatientId, plan_id: PlanId) -> Self {
        Self {
            contract_id,
            patient_id,
            plan_id,
            occurred_on: Utc::now(),
        }
    }
}

/// Fact: an invoice was generated for an active contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceGenerated {
    pub contract_id: ContractId,
    pub occurred_on: DateTime<Utc>,
}

impl InvoiceGenerated {
    pub fn new(contract_id: ContractId) -> Self {
        Self {
            contract_id,
            occurred_on: Utc::now(),
        }
    }
}

/// Everything a contract can announce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContractEvent {
    Created(ContractCreated),
    Activated(ContractActivated),
    Cancelled(ContractCancelled),
    CateringContracted(CateringContracted),
    InvoiceGenerated(InvoiceGenerated),
}

impl DomainEvent for ContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::Created(_) => "Vitalerp.Contracts.Events.ContractCreated",
            ContractEvent::Activated(_) => "Vitalerp.Contracts.Events.ContractActivated",
            ContractEvent::Cancelled(_) => "Vitalerp.Contracts.Events.ContractCancelled",
            ContractEvent::CateringContracted(_) => "Vitalerp.Contracts.Events.CateringContracted",
            ContractEvent::InvoiceGenerated(_) => "Vitalerp.Contracts.Events.InvoiceGenerated",
        }
    }

    fn topic(&self) -> &'static str {
        match self {
            ContractEvent::Created(_) => "contract-created",
            ContractEvent::Activated(_) => "contract-activated",
            ContractEvent::Cancelled(_) => "contract-cancelled",
            ContractEvent::CateringContracted(_) => "catering-contracted",
            ContractEvent::InvoiceGenerated(_) => "invoice-generated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContractEvent::Created(e) => e.occurred_on,
            ContractEvent::Activated(e) => e.occurred_on,
            ContractEvent::Cancelled(e) => e.occurred_on,
            ContractEvent::CateringContracted(e) => e.occurred_on,
            ContractEvent::InvoiceGenerated(e) => e.occurred_on,
        }
    }

    fn payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            ContractEvent::Created(e) => {
                map.insert("contractId".into(), e.contract_id.to_string().into());
                map.insert("patientId".into(), e.patient_id.to_string().into());
                map.insert("serviceId".into(), e.service_id.to_string().into());
                map.insert("occurredOn".into(), iso8601(e.occurred_on).into());
            }
            ContractEvent::Activated(e) => {
                map.insert("contractId".into(), e.contract_id.to_string().into());
                map.insert("occurredOn".into(), iso8601(e.occurred_on).into());
            }
            ContractEvent::Cancelled(e) => {
                map.insert("contractId".into(), e.contract_id.to_string().into());
                map.insert("occurredOn".into(), iso8601(e.occurred_on).into());
            }
            ContractEvent::CateringContracted(e) => {
                map.insert("contractId".into(), e.contract_id.to_string().into());
                map.insert("patientId".into(), e.patient_id.to_string().into());
                map.insert("planId".into(), e.plan_id.to_string().into());
                map.insert("occurredOn".into(), iso8601(e.occurred_on).into());
            }
            ContractEvent::InvoiceGenerated(e) => {
                map.insert("contractId".into(), e.contract_id.to_string().into());
                map.insert("occurredOn".into(), iso8601(e.occurred_on).into());
            }
        }
        map
    }
}
