//! `sessionbus` Core Library
//!
//! Shared functionality for `sessionbus` components:
//! - Session records, inbound/outbound envelopes and tagged payloads
//! - Broker channel and store key naming
//! - Configuration resolution and hierarchy
//! - Tracing initialisation and optional `OpenTelemetry` metrics
//! - Common error types

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod naming;
pub mod payload;
pub mod tracing_init;

pub use config::Config;
pub use envelope::{Headers, InboundEnvelope, OutboundEnvelope, SessionRecord};
pub use error::{Error, Result};
pub use payload::{Payload, PayloadKind};
