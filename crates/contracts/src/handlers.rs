//! Orchestrating command handlers.
//!
//! Handlers own the delivery choreography the aggregate is agnostic of:
//! run the state transition, persist the aggregate, stage every buffered
//! event into the outbox, clear the buffer. Staging is fire-and-forget with
//! respect to the business operation: a staging failure is logged and shows
//! up in delivery metrics, never in the caller's response.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use vitalerp_core::{ContractId, DomainError, Entity, PatientId, PlanId, ServiceId};
use vitalerp_events::{Command, DomainEvent, Handles, OutboxStore};

use crate::contract::{Contract, ContractError};
use crate::period::ContractPeriod;
use crate::repository::ContractRepository;
use crate::service::{ServiceDirectory, ServiceType};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("contract not found: {0}")]
    ContractNotFound(ContractId),

    #[error("unknown service: {0}")]
    UnknownService(ServiceId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Open a new contract for a patient.
#[derive(Debug, Clone)]
pub struct OpenContract {
    pub contract_id: ContractId,
    pub patient_id: PatientId,
    pub service_id: ServiceId,
    pub plan_id: Option<PlanId>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Command for OpenContract {
    type Output = ();
    type Error = HandlerError;

    fn name() -> &'static str {
        "OpenContract"
    }
}

/// Activate a pending contract.
#[derive(Debug, Clone)]
pub struct ActivateContract {
    pub contract_id: ContractId,
}

impl Command for ActivateContract {
    type Output = ();
    type Error = HandlerError;

    fn name() -> &'static str {
        "ActivateContract"
    }
}

/// Cancel a contract (terminal).
#[derive(Debug, Clone)]
pub struct CancelContract {
    pub contract_id: ContractId,
}

impl Command for CancelContract {
    type Output = ();
    type Error = HandlerError;

    fn name() -> &'static str {
        "CancelContract"
    }
}

/// Assign a meal plan to an active contract.
#[derive(Debug, Clone)]
pub struct AssignPlan {
    pub contract_id: ContractId,
    pub plan_id: PlanId,
}

impl Command for AssignPlan {
    type Output = ();
    type Error = HandlerError;

    fn name() -> &'static str {
        "AssignPlan"
    }
}

/// Generate an invoice for an active contract.
#[derive(Debug, Clone)]
pub struct GenerateInvoice {
    pub contract_id: ContractId,
}

impl Command for GenerateInvoice {
    type Output = ();
    type Error = HandlerError;

    fn name() -> &'static str {
        "GenerateInvoice"
    }
}

/// Stage every buffered event, clearing the buffer.
///
/// Outbox errors are invisible to the original request by contract; they are
/// logged and left to delivery metrics.
fn stage_events<O: OutboxStore>(outbox: &O, contract: &mut Contract) {
    for event in contract.take_events() {
        let event_type = event.event_type();
        if let Err(err) = outbox.stage(event_type, Value::Object(event.payload())) {
            error!(
                contract_id = %contract.id(),
                event_type,
                error = %err,
                "failed to stage domain event"
            );
        }
    }
}

fn load_contract<R: ContractRepository>(
    repo: &R,
    id: &ContractId,
) -> Result<Contract, HandlerError> {
    repo.find_by_id(id)?
        .ok_or_else(|| HandlerError::ContractNotFound(id.clone()))
}

fn resolve_service_type<S: ServiceDirectory>(
    services: &S,
    id: &ServiceId,
) -> Result<ServiceType, HandlerError> {
    services
        .find(id)?
        .map(|service| service.service_type)
        .ok_or_else(|| HandlerError::UnknownService(id.clone()))
}

/// Orchestrates `OpenContract`.
pub struct OpenContractHandler<R, S, O> {
    repo: R,
    services: S,
    outbox: O,
}

impl<R, S, O> OpenContractHandler<R, S, O> {
    pub fn new(repo: R, services: S, outbox: O) -> Self {
        Self {
            repo,
            services,
            outbox,
        }
    }
}

impl<R, S, O> Handles<OpenContract> for OpenContractHandler<R, S, O>
where
    R: ContractRepository,
    S: ServiceDirectory,
    O: OutboxStore,
{
    fn handle(&self, command: OpenContract) -> Result<(), HandlerError> {
        let service_type = resolve_service_type(&self.services, &command.service_id)?;
        let period = ContractPeriod::new(command.start, command.end)?;

        let mut contract = Contract::open(
            command.contract_id,
            command.patient_id,
            command.service_id,
            service_type,
            command.plan_id,
            period,
        );

        self.repo.save(&contract)?;
        stage_events(&self.outbox, &mut contract);
        Ok(())
    }
}

/// Orchestrates `ActivateContract`.
pub struct ActivateContractHandler<R, O> {
    repo: R,
    outbox: O,
}

impl<R, O> ActivateContractHandler<R, O> {
    pub fn new(repo: R, outbox: O) -> Self {
        Self { repo, outbox }
    }
}

impl<R, O> Handles<ActivateContract> for ActivateContractHandler<R, O>
where
    R: ContractRepository,
    O: OutboxStore,
{
    fn handle(&self, command: ActivateContract) -> Result<(), HandlerError> {
        let mut contract = load_contract(&self.repo, &command.contract_id)?;
        contract.activate()?;
        self.repo.save(&contract)?;
        stage_events(&self.outbox, &mut contract);
        Ok(())
    }
}

/// Orchestrates `CancelContract`.
pub struct CancelContractHandler<R, O> {
    repo: R,
    outbox: O,
}

impl<R, O> CancelContractHandler<R, O> {
    pub fn new(repo: R, outbox: O) -> Self {
        Self { repo, outbox }
    }
}

impl<R, O> Handles<CancelContract> for CancelContractHandler<R, O>
where
    R: ContractRepository,
    O: OutboxStore,
{
    fn handle(&self, command: CancelContract) -> Result<(), HandlerError> {
        let mut contract = load_contract(&self.repo, &command.contract_id)?;
        contract.cancel()?;
        self.repo.save(&contract)?;
        stage_events(&self.outbox, &mut contract);
        Ok(())
    }
}

/// Orchestrates `AssignPlan`.
///
/// Also the direct target of the plan-assignment queue consumer, which
/// bypasses the dispatcher.
pub struct AssignPlanHandler<R, S, O> {
    repo: R,
    services: S,
    outbox: O,
}

impl<R, S, O> AssignPlanHandler<R, S, O> {
    pub fn new(repo: R, services: S, outbox: O) -> Self {
        Self {
            repo,
            services,
            outbox,
        }
    }
}

impl<R, S, O> Handles<AssignPlan> for AssignPlanHandler<R, S, O>
where
    R: ContractRepository,
    S: ServiceDirectory,
    O: OutboxStore,
{
    fn handle(&self, command: AssignPlan) -> Result<(), HandlerError> {
        let mut contract = load_contract(&self.repo, &command.contract_id)?;
        let service_type = resolve_service_type(&self.services, contract.service_id())?;

        contract.assign_plan(command.plan_id, service_type)?;
        self.repo.save(&contract)?;
        stage_events(&self.outbox, &mut contract);
        Ok(())
    }
}

/// Orchestrates `GenerateInvoice`.
pub struct GenerateInvoiceHandler<R, O> {
    repo: R,
    outbox: O,
}

impl<R, O> GenerateInvoiceHandler<R, O> {
    pub fn new(repo: R, outbox: O) -> Self {
        Self { repo, outbox }
    }
}

impl<R, O> Handles<GenerateInvoice> for GenerateInvoiceHandler<R, O>
where
    R: ContractRepository,
    O: OutboxStore,
{
    fn handle(&self, command: GenerateInvoice) -> Result<(), HandlerError> {
        let mut contract = load_contract(&self.repo, &command.contract_id)?;
        contract.generate_invoice()?;
        self.repo.save(&contract)?;
        stage_events(&self.outbox, &mut contract);
        Ok(())
    }
}
