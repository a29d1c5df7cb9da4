//! Persistence collaborator for contracts.
//!
//! Mapping contracts to tables belongs to another module; the pipeline only
//! needs save/find. The in-memory twin behaves like a real mapper: it
//! persists state, never the pending-event buffer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use vitalerp_core::{ContractId, DomainError, Entity};

use crate::contract::Contract;

pub trait ContractRepository: Send + Sync {
    fn save(&self, contract: &Contract) -> Result<(), DomainError>;

    fn find_by_id(&self, id: &ContractId) -> Result<Option<Contract>, DomainError>;
}

impl<R> ContractRepository for Arc<R>
where
    R: ContractRepository + ?Sized,
{
    fn save(&self, contract: &Contract) -> Result<(), DomainError> {
        (**self).save(contract)
    }

    fn find_by_id(&self, id: &ContractId) -> Result<Option<Contract>, DomainError> {
        (**self).find_by_id(id)
    }
}

/// In-memory repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryContractRepository {
    contracts: RwLock<HashMap<ContractId, Contract>>,
}

impl InMemoryContractRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ContractRepository for InMemoryContractRepository {
    fn save(&self, contract: &Contract) -> Result<(), DomainError> {
        let mut contracts = self.contracts.write().unwrap();
        contracts.insert(contract.id().clone(), contract.detached());
        Ok(())
    }

    fn find_by_id(&self, id: &ContractId) -> Result<Option<Contract>, DomainError> {
        let contracts = self.contracts.read().unwrap();
        Ok(contracts.get(id).cloned())
    }
}
