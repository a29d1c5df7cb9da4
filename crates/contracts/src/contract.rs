//! The contract aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vitalerp_core::{ContractId, Entity, PatientId, PlanId, ServiceId};
use vitalerp_events::EventBuffer;

use crate::events::{
    CateringContracted, ContractActivated, ContractCancelled, ContractCreated, ContractEvent,
    InvoiceGenerated,
};
use crate::period::ContractPeriod;
use crate::service::ServiceType;

/// Contract lifecycle states.
///
/// CANCELLED is terminal; ACTIVE is reachable only from PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractState {
    Pending,
    Active,
    Cancelled,
}

/// Domain invariant violations raised by contract transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("invalid transition: contract is {current:?}, expected {expected:?}")]
    InvalidTransition {
        current: ContractState,
        expected: ContractState,
    },

    #[error("contract is already cancelled")]
    AlreadyCancelled,

    #[error("contract is not active")]
    NotActive,

    #[error("contract end date {end} is not after start date {start}")]
    PeriodEndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Aggregate root: a care-service contract for one patient.
///
/// State transitions append domain events to a private buffer and never
/// remove from it; the orchestrating handler drains the buffer once the
/// change has been persisted and every event staged. The aggregate stays
/// agnostic of delivery mechanics.
#[derive(Debug, Clone)]
pub struct Contract {
    id: ContractId,
    patient_id: PatientId,
    service_id: ServiceId,
    plan_id: Option<PlanId>,
    period: ContractPeriod,
    state: ContractState,
    pending_events: EventBuffer<ContractEvent>,
}

impl Contract {
    /// Open a new contract in PENDING state.
    ///
    /// Buffers `ContractCreated`; when a plan id is supplied for a catering
    /// service, `CateringContracted` is buffered as well.
    pub fn open(
        id: ContractId,
        patient_id: PatientId,
        service_id: ServiceId,
        service_type: ServiceType,
        plan_id: Option<PlanId>,
        period: ContractPeriod,
    ) -> Self {
        let mut contract = Self {
            id: id.clone(),
            patient_id: patient_id.clone(),
            service_id: service_id.clone(),
            plan_id: None,
            period,
            state: ContractState::Pending,
            pending_events: EventBuffer::new(),
        };

        contract
            .pending_events
            .record(ContractEvent::Created(ContractCreated::new(
                id.clone(),
                patient_id.clone(),
                service_id,
            )));

        if let Some(plan_id) = plan_id {
            contract.plan_id = Some(plan_id.clone());
            if service_type == ServiceType::Catering {
                contract.pending_events.record(ContractEvent::CateringContracted(
                    CateringContracted::new(id, patient_id, plan_id),
                ));
            }
        }

        contract
    }

    /// PENDING → ACTIVE.
    pub fn activate(&mut self) -> Result<(), ContractError> {
        if self.state != ContractState::Pending {
            return Err(ContractError::InvalidTransition {
                current: self.state,
                expected: ContractState::Pending,
            });
        }
        self.state = ContractState::Active;
        self.pending_events
            .record(ContractEvent::Activated(ContractActivated::new(
                self.id.clone(),
            )));
        Ok(())
    }

    /// Any state → CANCELLED; cancelling twice is an error.
    pub fn cancel(&mut self) -> Result<(), ContractError> {
        if self.state == ContractState::Cancelled {
            return Err(ContractError::AlreadyCancelled);
        }
        self.state = ContractState::Cancelled;
        self.pending_events
            .record(ContractEvent::Cancelled(ContractCancelled::new(
                self.id.clone(),
            )));
        Ok(())
    }

    /// Assign a meal plan to an active contract.
    ///
    /// Re-assigning the plan already in place is a no-op (no event). Catering
    /// services announce the assignment with `CateringContracted`.
    pub fn assign_plan(
        &mut self,
        plan_id: PlanId,
        service_type: ServiceType,
    ) -> Result<(), ContractError> {
        if self.state != ContractState::Active {
            return Err(ContractError::NotActive);
        }
        if self.plan_id.as_ref() == Some(&plan_id) {
            return Ok(());
        }
        self.plan_id = Some(plan_id.clone());
        if service_type == ServiceType::Catering {
            self.pending_events.record(ContractEvent::CateringContracted(
                CateringContracted::new(self.id.clone(), self.patient_id.clone(), plan_id),
            ));
        }
        Ok(())
    }

    /// Generate an invoice for an active contract.
    pub fn generate_invoice(&mut self) -> Result<(), ContractError> {
        if self.state != ContractState::Active {
            return Err(ContractError::NotActive);
        }
        self.pending_events
            .record(ContractEvent::InvoiceGenerated(InvoiceGenerated::new(
                self.id.clone(),
            )));
        Ok(())
    }

    /// Buffered events awaiting staging, oldest first.
    pub fn pending_events(&self) -> &[ContractEvent] {
        self.pending_events.as_slice()
    }

    /// Drain the buffer. Called by the orchestrating handler once the state
    /// change is persisted and the events are staged.
    pub fn take_events(&mut self) -> Vec<ContractEvent> {
        self.pending_events.take()
    }

    /// Copy of the contract as a mapper persists it: state only, no pending
    /// events.
    pub fn detached(&self) -> Contract {
        Contract {
            pending_events: EventBuffer::new(),
            ..self.clone()
        }
    }

    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn plan_id(&self) -> Option<&PlanId> {
        self.plan_id.as_ref()
    }

    pub fn period(&self) -> &ContractPeriod {
        &self.period
    }

    pub fn state(&self) -> ContractState {
        self.state
    }
}

impl Entity for Contract {
    type Id = ContractId;

    fn id(&self) -> &ContractId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn period() -> ContractPeriod {
        ContractPeriod::open_ended(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn open(service_type: ServiceType, plan_id: Option<PlanId>) -> Contract {
        Contract::open(
            ContractId::new("c-1"),
            PatientId::new("p-1"),
            ServiceId::new("s-1"),
            service_type,
            plan_id,
            period(),
        )
    }

    #[test]
    fn opening_buffers_exactly_one_event() {
        let contract = open(ServiceType::Nursing, None);

        assert_eq!(contract.state(), ContractState::Pending);
        assert_eq!(contract.pending_events().len(), 1);
        assert!(matches!(
            contract.pending_events()[0],
            ContractEvent::Created(_)
        ));
    }

    #[test]
    fn opening_a_catering_contract_with_a_plan_buffers_two_events() {
        let contract = open(ServiceType::Catering, Some(PlanId::new("plan-1")));

        assert_eq!(contract.pending_events().len(), 2);
        assert!(matches!(
            contract.pending_events()[1],
            ContractEvent::CateringContracted(_)
        ));
    }

    #[test]
    fn opening_a_non_catering_contract_with_a_plan_buffers_one_event() {
        let contract = open(ServiceType::Nursing, Some(PlanId::new("plan-1")));

        assert_eq!(contract.pending_events().len(), 1);
        assert_eq!(contract.plan_id(), Some(&PlanId::new("plan-1")));
    }

    #[test]
    fn activation_adds_a_second_event() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.activate().unwrap();

        assert_eq!(contract.state(), ContractState::Active);
        assert_eq!(contract.pending_events().len(), 2);
        assert!(matches!(
            contract.pending_events()[1],
            ContractEvent::Activated(_)
        ));
    }

    #[test]
    fn activation_requires_pending() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.activate().unwrap();

        assert_eq!(
            contract.activate(),
            Err(ContractError::InvalidTransition {
                current: ContractState::Active,
                expected: ContractState::Pending,
            })
        );
    }

    #[test]
    fn cancelling_twice_fails_and_buffers_no_third_event() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.cancel().unwrap();
        assert_eq!(contract.pending_events().len(), 2);

        assert_eq!(contract.cancel(), Err(ContractError::AlreadyCancelled));
        assert_eq!(contract.pending_events().len(), 2);
    }

    #[test]
    fn cancelled_contracts_cannot_be_activated() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.cancel().unwrap();

        assert!(matches!(
            contract.activate(),
            Err(ContractError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn plan_assignment_requires_active() {
        let mut contract = open(ServiceType::Catering, None);

        assert_eq!(
            contract.assign_plan(PlanId::new("plan-1"), ServiceType::Catering),
            Err(ContractError::NotActive)
        );
    }

    #[test]
    fn reassigning_the_same_plan_is_a_no_op() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.activate().unwrap();
        let before = contract.pending_events().len();

        contract
            .assign_plan(PlanId::new("plan-1"), ServiceType::Nursing)
            .unwrap();
        contract
            .assign_plan(PlanId::new("plan-1"), ServiceType::Nursing)
            .unwrap();

        // Non-catering assignments announce nothing either way.
        assert_eq!(contract.pending_events().len(), before);
        assert_eq!(contract.plan_id(), Some(&PlanId::new("plan-1")));
    }

    #[test]
    fn catering_plan_assignment_buffers_an_event() {
        let mut contract = open(ServiceType::Catering, None);
        contract.activate().unwrap();

        contract
            .assign_plan(PlanId::new("plan-1"), ServiceType::Catering)
            .unwrap();

        assert!(matches!(
            contract.pending_events().last().unwrap(),
            ContractEvent::CateringContracted(_)
        ));
    }

    #[test]
    fn invoice_generation_requires_active() {
        let mut contract = open(ServiceType::Nursing, None);
        assert_eq!(contract.generate_invoice(), Err(ContractError::NotActive));

        contract.activate().unwrap();
        contract.generate_invoice().unwrap();
        assert!(matches!(
            contract.pending_events().last().unwrap(),
            ContractEvent::InvoiceGenerated(_)
        ));
    }

    #[test]
    fn take_events_drains_the_buffer_once() {
        let mut contract = open(ServiceType::Nursing, None);
        contract.activate().unwrap();

        assert_eq!(contract.take_events().len(), 2);
        assert!(contract.take_events().is_empty());
    }

    #[test]
    fn detached_copies_carry_no_pending_events() {
        let contract = open(ServiceType::Nursing, None);
        let detached = contract.detached();

        assert!(detached.pending_events().is_empty());
        assert_eq!(detached.state(), contract.state());
    }
}
