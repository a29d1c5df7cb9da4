use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - named by a stable **fully-qualified type** (e.g.
///   `Vitalerp.Contracts.Events.ContractCreated`) from which routing keys are
///   derived
/// - rendered to the wire through an explicit payload map, one per event type
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable fully-qualified event name.
    fn event_type(&self) -> &'static str;

    /// Logical routing family (e.g. "contract-activated").
    fn topic(&self) -> &'static str;

    /// When the event occurred (business time, fixed at construction).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Canonical wire payload.
    ///
    /// Each event enumerates its own fields; date/time values are rendered
    /// with [`iso8601`]. Renaming an internal field must not change this map.
    fn payload(&self) -> Map<String, Value>;
}

/// Render a timestamp the way payloads and outbox rows carry dates:
/// ISO-8601 UTC with microsecond precision and a trailing `Z`.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
