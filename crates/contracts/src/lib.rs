//! `vitalerp-contracts` — the care-service contract aggregate and the
//! handlers that drive it through the delivery pipeline.

pub mod contract;
pub mod events;
pub mod handlers;
pub mod period;
pub mod repository;
pub mod service;

pub use contract::{Contract, ContractError, ContractState};
pub use events::{
    CateringContracted, ContractActivated, ContractCancelled, ContractCreated, ContractEvent,
    InvoiceGenerated,
};
pub use handlers::{
    ActivateContract, ActivateContractHandler, AssignPlan, AssignPlanHandler, CancelContract,
    CancelContractHandler, GenerateInvoice, GenerateInvoiceHandler, HandlerError, OpenContract,
    OpenContractHandler,
};
pub use period::ContractPeriod;
pub use repository::{ContractRepository, InMemoryContractRepository};
pub use service::{InMemoryServiceDirectory, Service, ServiceDirectory, ServiceType};
