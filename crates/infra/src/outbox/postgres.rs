//! Postgres-backed outbox store.
//!
//! Rows share the database with the business data, which is what makes the
//! staging step atomicity-adjacent: a contract change and its events land in
//! the same durability domain. Status transitions are enforced in SQL
//! (`WHERE status = 'pending'`) so a row that is already published or failed
//! can never move again, whatever the caller does.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use vitalerp_events::{OutboxError, OutboxRow, OutboxStatus, OutboxStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    id UUID PRIMARY KEY,
    event_type TEXT NOT NULL,
    event_data JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published_at TIMESTAMPTZ,
    claimed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS outbox_events_pending_idx
    ON outbox_events (created_at)
    WHERE status = 'pending';
"#;

/// Postgres outbox store.
///
/// Inherent methods are async (sqlx); the synchronous [`OutboxStore`] impl
/// bridges through an explicitly owned runtime handle so the store can be
/// driven from the synchronous drain and consumer loops. The bridge must not
/// be used from inside an async task on the same runtime.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
    handle: Handle,
    lease: Duration,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
            lease: Duration::seconds(30),
        }
    }

    /// Override the claim lease.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Create the outbox table and its indexes when missing (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, event_data), err)]
    pub async fn stage_event(
        &self,
        event_type: &str,
        event_data: Value,
    ) -> Result<Uuid, OutboxError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, event_data, status, retry_count)
            VALUES ($1, $2, $3, 'pending', 0)
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(&event_data)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stage", e))?;

        Ok(id)
    }

    /// Atomically lease a batch of deliverable rows, oldest first.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps two overlapping drain runs off the same
    /// rows even before the lease stamp lands; an expired lease (crashed
    /// publisher) makes a row claimable again.
    #[instrument(skip(self), err)]
    pub async fn claim_batch(
        &self,
        limit: usize,
        max_retry: u32,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        let rows = sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'pending'
                  AND retry_count < $1
                  AND (claimed_at IS NULL OR claimed_at < NOW() - ($2 * INTERVAL '1 millisecond'))
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, event_type, event_data, status, retry_count,
                      created_at, published_at, claimed_at
            "#,
        )
        .bind(max_retry as i32)
        .bind(self.lease.num_milliseconds())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_pending", e))?;

        let mut claimed = rows
            .iter()
            .map(row_from_pg)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not guarantee subquery order.
        claimed.sort_by_key(|row| row.created_at);
        Ok(claimed)
    }

    #[instrument(skip(self), err)]
    pub async fn pending_batch(
        &self,
        limit: usize,
        max_retry: u32,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, event_data, status, retry_count,
                   created_at, published_at, claimed_at
            FROM outbox_events
            WHERE status = 'pending'
              AND retry_count < $1
              AND (claimed_at IS NULL OR claimed_at < NOW() - ($2 * INTERVAL '1 millisecond'))
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(max_retry as i32)
        .bind(self.lease.num_milliseconds())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_pending", e))?;

        rows.iter().map(row_from_pg).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn set_published(&self, id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'published', published_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id, OutboxStatus::Published).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn set_failed(&self, id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id, OutboxStatus::Failed).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn bump_retry(&self, id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_retry", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id, OutboxStatus::Pending).await);
        }
        Ok(())
    }

    /// Distinguish "row missing" from "row already terminal" after a guarded
    /// update matched nothing.
    async fn transition_failure(&self, id: Uuid, to: OutboxStatus) -> OutboxError {
        let row = sqlx::query("SELECT status FROM outbox_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await;

        match row {
            Ok(Some(row)) => match row.try_get::<String, _>("status") {
                Ok(value) => match parse_status(&value) {
                    Ok(from) => OutboxError::IllegalTransition { id, from, to },
                    Err(msg) => OutboxError::Storage(format!("row {id}: {msg}")),
                },
                Err(e) => OutboxError::Storage(format!("failed to read column status: {e}")),
            },
            Ok(None) => OutboxError::NotFound(id),
            Err(e) => map_sqlx_error("status_lookup", e),
        }
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn stage(&self, event_type: &str, event_data: Value) -> Result<Uuid, OutboxError> {
        self.handle.block_on(self.stage_event(event_type, event_data))
    }

    fn claim_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        self.handle.block_on(self.claim_batch(limit, max_retry))
    }

    fn find_pending(&self, limit: usize, max_retry: u32) -> Result<Vec<OutboxRow>, OutboxError> {
        self.handle.block_on(self.pending_batch(limit, max_retry))
    }

    fn mark_published(&self, id: Uuid) -> Result<(), OutboxError> {
        self.handle.block_on(self.set_published(id))
    }

    fn mark_failed(&self, id: Uuid) -> Result<(), OutboxError> {
        self.handle.block_on(self.set_failed(id))
    }

    fn increment_retry(&self, id: Uuid) -> Result<(), OutboxError> {
        self.handle.block_on(self.bump_retry(id))
    }
}

fn row_from_pg(row: &sqlx::postgres::PgRow) -> Result<OutboxRow, OutboxError> {
    let id: Uuid = try_get(row, "id")?;
    let status: String = try_get(row, "status")?;
    let retry_count: i32 = try_get(row, "retry_count")?;

    Ok(OutboxRow {
        id,
        event_type: try_get(row, "event_type")?,
        event_data: try_get::<Value>(row, "event_data")?,
        status: parse_status(&status)
            .map_err(|msg| OutboxError::Storage(format!("row {id}: {msg}")))?,
        retry_count: retry_count.max(0) as u32,
        created_at: try_get::<DateTime<Utc>>(row, "created_at")?,
        published_at: try_get::<Option<DateTime<Utc>>>(row, "published_at")?,
        claimed_at: try_get::<Option<DateTime<Utc>>>(row, "claimed_at")?,
    })
}

fn try_get<'r, T>(row: &'r sqlx::postgres::PgRow, column: &str) -> Result<T, OutboxError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| OutboxError::Storage(format!("failed to read column {column}: {e}")))
}

fn parse_status(value: &str) -> Result<OutboxStatus, String> {
    match value {
        "pending" => Ok(OutboxStatus::Pending),
        "published" => Ok(OutboxStatus::Published),
        "failed" => Ok(OutboxStatus::Failed),
        other => Err(format!("unknown outbox status '{other}'")),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => OutboxError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            OutboxError::Storage(format!("connection pool closed in {operation}"))
        }
        other => OutboxError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
