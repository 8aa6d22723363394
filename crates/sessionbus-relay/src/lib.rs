//! `sessionbus` Relay Library
//!
//! Stateless request/response relaying for protocol sessions:
//! - TTL key/value store for session records (in-process or `SQLite`)
//! - Publish/subscribe broker and typed message channels
//! - Session registry and the request/response relay built on both
//! - Session workers driving a pluggable protocol runtime
//! - Repository documentation runtime (GitHub raw content, cached)
//! - axum HTTP host

pub mod broker;
pub mod channel;
pub mod docs;
pub mod error;
pub mod mailbox;
pub mod registry;
pub mod relay;
pub mod resources;
pub mod runtime;
pub mod server;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::{RelayError, Result};
pub use relay::{InboundRequest, PendingResponse, SessionRelay};
pub use resources::SharedResources;
pub use runtime::{ProtocolRuntime, RuntimeContext, RuntimeError};
