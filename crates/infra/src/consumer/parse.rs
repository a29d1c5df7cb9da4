//! Tolerant wire-message decoding.
//!
//! Upstream producers are not uniform: bodies arrive with stray whitespace,
//! doubly-escaped quotes or a whole extra layer of JSON string encoding, and
//! field names switch between casings. Decoding strips the noise before
//! validating; anything still unreadable is rejected with the raw body kept
//! for the logs.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Body could not be decoded into a JSON object.
    #[error("malformed message: {reason} (raw: {raw})")]
    MalformedMessage { reason: String, raw: String },

    /// A required field is absent under every accepted casing.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Decode a raw queue message body into a JSON object.
///
/// Steps, in order: trim surrounding whitespace, un-escape doubly-escaped
/// quotes, strip one layer of wrapping quotes when the whole body looks
/// double-encoded, JSON-decode.
pub fn decode_body(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let mut text = raw.trim().to_string();

    if text.contains("\\\"") {
        text = text.replace("\\\"", "\"");
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = text[1..text.len() - 1].to_string();
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseError::MalformedMessage {
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
            raw: raw.to_string(),
        }),
        Err(err) => Err(ParseError::MalformedMessage {
            reason: err.to_string(),
            raw: raw.to_string(),
        }),
    }
}

/// Fetch `field`, accepting any casing of the name (`idContrato`,
/// `IdContrato`, ...).
pub fn require_field<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ParseError> {
    if let Some(value) = map.get(field) {
        return Ok(value);
    }
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(field))
        .map(|(_, value)| value)
        .ok_or(ParseError::MissingField(field))
}

/// Fetch `field` as a non-empty string.
///
/// Numeric scalars are coerced (upstream ids arrive both ways); anything
/// else counts as missing.
pub fn require_string(map: &Map<String, Value>, field: &'static str) -> Result<String, ParseError> {
    match require_field(map, field)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ParseError::MissingField(field)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
