//! Observability bootstrap for vitalerp processes.

mod tracing;

pub use tracing::init;
