//! Strongly-typed identifiers used across the domain.
//!
//! Contract, patient, service and plan identifiers are assigned by upstream
//! systems and travel across process boundaries as opaque strings. Newtypes
//! keep them from being mixed up.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a contract aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

/// Identifier of a patient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

/// Identifier of a catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

/// Identifier of a catering/meal plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap an identifier value as-is.
            ///
            /// Use `FromStr` instead when the value comes from untrusted input
            /// and needs validation.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty identifier")));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_newtype!(ContractId, "ContractId");
impl_string_newtype!(PatientId, "PatientId");
impl_string_newtype!(ServiceId, "ServiceId");
impl_string_newtype!(PlanId, "PlanId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_empty_identifiers() {
        assert!(ContractId::from_str("  ").is_err());
        assert!(PlanId::from_str("").is_err());
    }

    #[test]
    fn parse_trims_whitespace() {
        let id = ContractId::from_str(" c-42 ").unwrap();
        assert_eq!(id.as_str(), "c-42");
    }
}
