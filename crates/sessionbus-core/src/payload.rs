//! Tagged protocol payloads.
//!
//! Bodies travelling through the relay are opaque to it. A [`Payload`] keeps
//! the original text together with a declared [`PayloadKind`]: `Structured`
//! when the text parses as JSON, `Raw` otherwise. Decoding never fails;
//! text that does not parse is forwarded as a raw value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Declared content kind of a [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Structured,
    Raw,
}

/// Opaque body text plus its content kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    kind: PayloadKind,
    data: String,
}

impl Payload {
    /// Classify `text` by attempting a JSON parse.
    pub fn decode(text: impl Into<String>) -> Self {
        let data = text.into();
        let kind = if serde_json::from_str::<Value>(&data).is_ok() {
            PayloadKind::Structured
        } else {
            PayloadKind::Raw
        };
        Self { kind, data }
    }

    /// Wrap text without attempting to parse it.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Raw,
            data: text.into(),
        }
    }

    /// Serialize a JSON value as a structured payload.
    pub fn json(value: &Value) -> Self {
        Self {
            kind: PayloadKind::Structured,
            data: value.to_string(),
        }
    }

    pub const fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub const fn is_structured(&self) -> bool {
        matches!(self.kind, PayloadKind::Structured)
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn into_string(self) -> String {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Parsed JSON for structured payloads, `None` for raw ones.
    pub fn to_json(&self) -> Option<Value> {
        match self.kind {
            PayloadKind::Structured => serde_json::from_str(&self.data).ok(),
            PayloadKind::Raw => None,
        }
    }

    /// JSON view of the payload: raw text becomes a JSON string.
    pub fn to_value(&self) -> Value {
        self.to_json()
            .unwrap_or_else(|| Value::String(self.data.clone()))
    }

    /// Deserialize a structured payload into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.is_structured() {
            return Err(Error::MalformedPayload(format!(
                "expected structured payload, got raw text ({} bytes)",
                self.data.len()
            )));
        }
        serde_json::from_str(&self.data).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::json(&value)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.data)
    }
}
