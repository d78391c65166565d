//! The `Envelope` wire unit.
//!
//! An envelope is a message type plus a flat object of payload fields. It is
//! serialized as a single JSON object, `{"type": "...", ...payload}`, so
//! `Envelope::new("TAB_CLOSED").with("tabId", 3)` becomes
//! `{"type":"TAB_CLOSED","tabId":3}`.
//!
//! Envelopes are built once and then only read; there are no mutating
//! accessors after construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, ShellError};

/// A typed, structured message unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Create an envelope from a type and an existing payload object.
    ///
    /// A `type` key inside `payload` is dropped; the explicit `kind` wins.
    pub fn with_payload(kind: impl Into<String>, mut payload: Map<String, Value>) -> Self {
        let _ = payload.remove("type");
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an envelope from a type and arbitrary JSON data.
    ///
    /// Objects become the payload. `null` becomes an empty payload. Any other
    /// value is stored under a `data` key.
    pub fn from_data(kind: impl Into<String>, data: Value) -> Self {
        match data {
            Value::Object(map) => Self::with_payload(kind, map),
            Value::Null => Self::new(kind),
            other => Self::new(kind).with("data", other),
        }
    }

    /// Builder: add a payload field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.payload.insert(key.into(), value.into());
        self
    }

    /// The message type.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether this envelope has the given type.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// The payload fields (without `type`).
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// A single payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// A payload field as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// A payload field as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// The full envelope as a JSON value (including `type`).
    pub fn to_value(&self) -> Value {
        let mut map = self.payload.clone();
        let _ = map.insert("type".into(), Value::String(self.kind.clone()));
        Value::Object(map)
    }

    /// Deserialize the envelope into a typed message.
    pub fn decode_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_value()).map_err(|e| ShellError::ProtocolDecode {
            reason: e.to_string(),
            line: self.kind.clone(),
        })
    }
}
