use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vitalerp_core::ValueObject;

use crate::contract::ContractError;

/// Validity window of a contract: a start date and an optional end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPeriod {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

impl ContractPeriod {
    /// Build a period; `end`, when present, must be strictly after `start`.
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self, ContractError> {
        if let Some(end) = end {
            if end <= start {
                return Err(ContractError::PeriodEndBeforeStart { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn open_ended(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }
}

impl ValueObject for ContractPeriod {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn end_must_be_strictly_after_start() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(ContractPeriod::new(start, Some(start)).is_err());
        assert!(ContractPeriod::new(start, Some(start - chrono::Duration::days(1))).is_err());
        assert!(ContractPeriod::new(start, Some(start + chrono::Duration::days(1))).is_ok());
        assert!(ContractPeriod::new(start, None).is_ok());
    }
}
