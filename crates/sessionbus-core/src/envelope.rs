//! Session records and the envelopes carried over broker channels.
//!
//! Field names are camelCase on the wire so that every relay instance,
//! whatever it is written in, reads the same JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::Payload;

/// Header name to list of values, in the order the headers arrived.
pub type Headers = IndexMap<String, Vec<String>>;

/// Value stored under `session:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Creation time, milliseconds since the Unix epoch.
    pub created: i64,
    /// Last successful access, milliseconds since the Unix epoch.
    pub last_active: i64,
    #[serde(default)]
    pub metadata: Value,
}

impl SessionRecord {
    pub fn new(metadata: Value, now_ms: i64) -> Self {
        Self {
            created: now_ms,
            last_active: now_ms,
            metadata,
        }
    }

    #[must_use]
    pub fn touched(mut self, now_ms: i64) -> Self {
        self.last_active = self.last_active.max(now_ms);
        self
    }
}

/// A protocol request queued for whichever handler serves the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    pub request_id: String,
    pub session_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Value,
}

impl InboundEnvelope {
    /// Body as a tagged payload. String bodies get a nested parse attempt.
    pub fn payload(&self) -> Payload {
        match &self.body {
            Value::String(text) => Payload::decode(text.clone()),
            other => Payload::json(other),
        }
    }
}

/// A handler's answer to exactly one [`InboundEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl OutboundEnvelope {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body as a tagged payload (structured when it parses as JSON).
    pub fn payload(&self) -> Payload {
        Payload::decode(self.body.clone())
    }
}
