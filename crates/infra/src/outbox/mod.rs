//! Durable outbox storage.

mod postgres;

pub use postgres::PostgresOutboxStore;
