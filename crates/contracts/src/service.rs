//! Service catalog collaborator.
//!
//! Contracts only need to know which *kind* of service they cover; catering
//! contracts additionally announce meal-plan assignments. The catalog itself
//! is owned by another module, so this is just the read-side contract.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use vitalerp_core::{DomainError, ServiceId};

/// Kind of care service a contract covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Catering,
    Nursing,
    Therapy,
    Transport,
}

/// Catalog entry, as much of it as the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub service_type: ServiceType,
}

/// Read-side collaborator over the service catalog.
pub trait ServiceDirectory: Send + Sync {
    fn find(&self, id: &ServiceId) -> Result<Option<Service>, DomainError>;
}

impl<S> ServiceDirectory for Arc<S>
where
    S: ServiceDirectory + ?Sized,
{
    fn find(&self, id: &ServiceId) -> Result<Option<Service>, DomainError> {
        (**self).find(id)
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryServiceDirectory {
    services: RwLock<HashMap<ServiceId, Service>>,
}

impl InMemoryServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, service: Service) {
        let mut services = self.services.write().unwrap();
        services.insert(service.id.clone(), service);
    }
}

impl ServiceDirectory for InMemoryServiceDirectory {
    fn find(&self, id: &ServiceId) -> Result<Option<Service>, DomainError> {
        let services = self.services.read().unwrap();
        Ok(services.get(id).cloned())
    }
}
