//! Typed publish/subscribe over a [`Broker`].
//!
//! Messages are JSON-encoded on publish and decoded on delivery. A payload
//! that fails to decode is logged, counted and skipped; it never tears down
//! the subscription it arrived on.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::broker::{Broker, BrokerError, MessageStream};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Entry point for typed channel operations.
#[derive(Clone)]
pub struct Channels {
    broker: Arc<dyn Broker>,
}

impl Channels {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Encode `message` and publish it. Returns the number of receivers.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<usize, ChannelError> {
        let text = serde_json::to_string(message)?;
        Ok(self.broker.publish(channel, text).await?)
    }

    /// Attach a pull-based listener. Live as soon as this returns.
    pub async fn listen<T: DeserializeOwned>(
        &self,
        channel: &str,
    ) -> Result<Listener<T>, ChannelError> {
        let stream = self.broker.subscribe(channel).await?;
        Ok(Listener {
            channel: channel.to_string(),
            stream,
            dropped: Arc::new(AtomicU64::new(0)),
            _marker: PhantomData,
        })
    }

    /// Attach a callback invoked for every decoded message.
    ///
    /// The callback runs on a background task in delivery order. A panic
    /// inside it is logged and the subscription keeps running.
    pub async fn subscribe<T, F>(
        &self,
        channel: &str,
        mut on_message: F,
    ) -> Result<Subscription, ChannelError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut listener = self.listen::<T>(channel).await?;
        let dropped = Arc::clone(&listener.dropped);
        let closed = Arc::new(AtomicBool::new(false));
        let task_closed = Arc::clone(&closed);

        let task = tokio::spawn(async move {
            while let Some(message) = listener.next().await {
                if task_closed.load(Ordering::Acquire) {
                    break;
                }
                let delivered =
                    std::panic::catch_unwind(AssertUnwindSafe(|| on_message(message)));
                if delivered.is_err() {
                    error!(channel = %listener.channel, "Message callback panicked");
                }
            }
        });

        Ok(Subscription {
            channel: channel.to_string(),
            task,
            closed,
            dropped,
        })
    }
}

/// Pull side of a channel subscription.
///
/// Dropping the listener releases the broker subscription.
pub struct Listener<T> {
    channel: String,
    stream: MessageStream,
    dropped: Arc<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Listener<T> {
    /// Next decodable message, or `None` once the channel closes.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            let text = self.stream.next().await?;
            match serde_json::from_str(&text) {
                Ok(message) => return Some(message),
                Err(e) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(channel = %self.channel, error = %e, "Dropping malformed message");
                }
            }
        }
    }
}

impl<T> Listener<T> {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages skipped because they failed to decode.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a callback subscription.
///
/// Unsubscribing is idempotent and also happens on drop.
pub struct Subscription {
    channel: String,
    task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.task.abort();
            debug!(channel = %self.channel, "Unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.task.is_finished()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages skipped because they failed to decode.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
