//! Durable staging of domain events awaiting delivery (outbox pattern).
//!
//! Staged rows share the durability domain of the business data, so an
//! aggregate change and its events cannot diverge. The publisher drains rows
//! asynchronously; rows are never deleted (retained for audit) and their
//! status only ever moves forward.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Maximum delivery attempts before a row becomes permanently failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delivery status of a staged event.
///
/// Transitions are monotonic: `Pending → Published` or `Pending → Failed`,
/// never backward and never skipping `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// One staged event awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    /// Generated at staging time; becomes the broker message id.
    pub id: Uuid,
    pub event_type: String,
    /// JSON object of the event's payload; dates are ISO-8601 UTC strings.
    pub event_data: Value,
    pub status: OutboxStatus,
    /// Attempts so far. Only increases, and only while the row is pending.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    /// Lease stamp set when a drain run claims the row; expired leases make
    /// the row claimable again.
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox row not found: {0}")]
    NotFound(Uuid),

    #[error("illegal status transition for row {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: Uuid,
        from: OutboxStatus,
        to: OutboxStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable store of staged, not-yet-delivered events.
///
/// Rows are created by command handlers and mutated only by the publisher.
/// No operation ever mutates a row that is already published or failed.
pub trait OutboxStore: Send + Sync {
    /// Stage one event; returns the generated row id.
    fn stage(&self, event_type: &str, event_data: Value) -> Result<Uuid, OutboxError>;

    /// Atomically lease up to `limit` deliverable rows, oldest first (FIFO).
    ///
    /// A row is deliverable while `status = pending`, `retry_count <
    /// max_retry` and no other drain run holds a live lease on it. Claiming
    /// stamps the lease, so two overlapping drain runs can never pick up the
    /// same row.
    fn claim_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError>;

    /// Read-only view of deliverable rows; excludes rows under a live lease.
    fn find_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError>;

    fn mark_published(&self, id: Uuid) -> Result<(), OutboxError>;

    fn mark_failed(&self, id: Uuid) -> Result<(), OutboxError>;

    /// Increment the attempt counter; allowed only while the row is pending.
    fn increment_retry(&self, id: Uuid) -> Result<(), OutboxError>;
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn stage(&self, event_type: &str, event_data: Value) -> Result<Uuid, OutboxError> {
        (**self).stage(event_type, event_data)
    }

    fn claim_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        (**self).claim_pending(limit, max_retry)
    }

    fn find_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        (**self).find_pending(limit, max_retry)
    }

    fn mark_published(&self, id: Uuid) -> Result<(), OutboxError> {
        (**self).mark_published(id)
    }

    fn mark_failed(&self, id: Uuid) -> Result<(), OutboxError> {
        (**self).mark_failed(id)
    }

    fn increment_retry(&self, id: Uuid) -> Result<(), OutboxError> {
        (**self).increment_retry(id)
    }
}

/// In-memory outbox store for tests/dev.
///
/// Insertion order doubles as FIFO order; leases are tracked per row exactly
/// like the durable store does it.
#[derive(Debug)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxRow>>,
    lease: Duration,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            lease: Duration::seconds(30),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Override the claim lease (tests shorten it to exercise expiry).
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Snapshot of a single row.
    pub fn get(&self, id: Uuid) -> Option<OutboxRow> {
        let rows = self.rows.lock().unwrap();
        rows.iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of every row, staging order.
    pub fn all(&self) -> Vec<OutboxRow> {
        self.rows.lock().unwrap().clone()
    }

    fn deliverable(row: &OutboxRow, max_retry: u32, now: DateTime<Utc>, lease: Duration) -> bool {
        row.status == OutboxStatus::Pending
            && row.retry_count < max_retry
            && row.claimed_at.is_none_or(|claimed| claimed + lease <= now)
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn stage(&self, event_type: &str, event_data: Value) -> Result<Uuid, OutboxError> {
        let mut rows = self.rows.lock().unwrap();
        let id = Uuid::now_v7();
        rows.push(OutboxRow {
            id,
            event_type: event_type.to_string(),
            event_data,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            published_at: None,
            claimed_at: None,
        });
        Ok(id)
    }

    fn claim_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();

        let mut claimed = Vec::new();
        for row in rows.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            if Self::deliverable(row, max_retry, now, self.lease) {
                row.claimed_at = Some(now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    fn find_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        let rows = self.rows.lock().unwrap();
        let now = Utc::now();

        Ok(rows
            .iter()
            .filter(|row| Self::deliverable(row, max_retry, now, self.lease))
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_published(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;

        if row.status != OutboxStatus::Pending {
            return Err(OutboxError::IllegalTransition {
                id,
                from: row.status,
                to: OutboxStatus::Published,
            });
        }
        row.status = OutboxStatus::Published;
        row.published_at = Some(Utc::now());
        Ok(())
    }

    fn mark_failed(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;

        if row.status != OutboxStatus::Pending {
            return Err(OutboxError::IllegalTransition {
                id,
                from: row.status,
                to: OutboxStatus::Failed,
            });
        }
        row.status = OutboxStatus::Failed;
        Ok(())
    }

    fn increment_retry(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;

        if row.status != OutboxStatus::Pending {
            return Err(OutboxError::IllegalTransition {
                id,
                from: row.status,
                to: row.status,
            });
        }
        row.retry_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage_one(store: &InMemoryOutboxStore) -> Uuid {
        store
            .stage(
                "Vitalerp.Contracts.Events.ContractActivated",
                json!({"contractId": "c-1"}),
            )
            .unwrap()
    }

    #[test]
    fn staged_rows_start_pending_with_zero_retries() {
        let store = InMemoryOutboxStore::new();
        let id = stage_one(&store);

        let row = store.get(id).unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 0);
        assert!(row.published_at.is_none());
    }

    #[test]
    fn find_pending_is_fifo() {
        let store = InMemoryOutboxStore::new();
        let first = stage_one(&store);
        let second = stage_one(&store);

        let pending = store.find_pending(10, MAX_ATTEMPTS).unwrap();
        assert_eq!(
            pending.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![first, second]
        );
    }

    #[test]
    fn claimed_rows_are_invisible_until_the_lease_expires() {
        let store = InMemoryOutboxStore::new();
        stage_one(&store);

        let first_claim = store.claim_pending(10, MAX_ATTEMPTS).unwrap();
        assert_eq!(first_claim.len(), 1);

        // A concurrent drain run sees nothing while the lease is live.
        assert!(store.claim_pending(10, MAX_ATTEMPTS).unwrap().is_empty());
        assert!(store.find_pending(10, MAX_ATTEMPTS).unwrap().is_empty());
    }

    #[test]
    fn expired_leases_are_reclaimed() {
        let store = InMemoryOutboxStore::new().with_lease(Duration::zero());
        stage_one(&store);

        assert_eq!(store.claim_pending(10, MAX_ATTEMPTS).unwrap().len(), 1);
        assert_eq!(store.claim_pending(10, MAX_ATTEMPTS).unwrap().len(), 1);
    }

    #[test]
    fn rows_at_the_retry_cap_are_never_selected() {
        let store = InMemoryOutboxStore::new().with_lease(Duration::zero());
        let id = stage_one(&store);

        for _ in 0..MAX_ATTEMPTS {
            store.increment_retry(id).unwrap();
        }
        assert!(store.find_pending(10, MAX_ATTEMPTS).unwrap().is_empty());
        assert!(store.claim_pending(10, MAX_ATTEMPTS).unwrap().is_empty());
    }

    #[test]
    fn published_rows_cannot_move_again() {
        let store = InMemoryOutboxStore::new();
        let id = stage_one(&store);
        store.mark_published(id).unwrap();

        let row = store.get(id).unwrap();
        assert_eq!(row.status, OutboxStatus::Published);
        assert!(row.published_at.is_some());

        assert!(matches!(
            store.mark_failed(id),
            Err(OutboxError::IllegalTransition { .. })
        ));
        assert!(matches!(
            store.increment_retry(id),
            Err(OutboxError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn failed_rows_cannot_move_again() {
        let store = InMemoryOutboxStore::new();
        let id = stage_one(&store);
        store.mark_failed(id).unwrap();

        assert!(matches!(
            store.mark_published(id),
            Err(OutboxError::IllegalTransition { .. })
        ));
    }
}
