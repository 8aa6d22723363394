//! Publish/subscribe broker.
//!
//! Channels are named strings carrying text messages. A publish reaches every
//! subscriber attached at that moment and nobody else: there is no replay
//! and no acknowledgement. [`MemoryBroker`] serves one process;
//! [`SqliteBroker`] spans every process sharing a store file.

mod memory;
mod sqlite;


use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;

/// Stream of raw messages delivered on one channel.
///
/// Dropping the stream releases the subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Errors raised by a [`Broker`].
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for BrokerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Fire-and-forget channel fan-out.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver `message` to the current subscribers of `channel`.
    ///
    /// Returns how many subscribers received it. Zero is not an error.
    async fn publish(&self, channel: &str, message: String) -> Result<usize, BrokerError>;

    /// Attach a new subscriber to `channel`.
    ///
    /// The subscription is live once this returns: any publish that starts
    /// afterwards is delivered to it.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError>;

    /// Drop bookkeeping for channels nobody listens on any more. Returns how
    /// many entries were removed.
    async fn prune(&self) -> usize;

    /// Close every channel. Open streams end and later calls fail.
    async fn shutdown(&self);
}
