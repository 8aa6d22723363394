//! In-process [`Broker`] built on `tokio::sync::broadcast`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, trace, warn};

use super::{Broker, BrokerError, MessageStream};

type Channels = Mutex<HashMap<String, broadcast::Sender<String>>>;

/// One broadcast sender per live channel.
///
/// A channel exists exactly while it has subscribers: it is created on first
/// subscribe and removed when its last stream is dropped.
pub struct MemoryBroker {
    channels: Arc<Channels>,
    capacity: usize,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// missing messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Unavailable("broker shut down".into()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribers currently attached to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Channels with at least one attached subscriber.
    pub fn active_channels(&self) -> usize {
        self.lock()
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }

    /// Channels held in the map, live or not.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, message: String) -> Result<usize, BrokerError> {
        self.check_open()?;
        let mut channels = self.lock();
        let Some(tx) = channels.get(channel) else {
            debug!(channel, "Publish with no subscribers");
            return Ok(0);
        };
        if let Ok(count) = tx.send(message) {
            Ok(count)
        } else {
            debug!(channel, "Pruning channel with no subscribers");
            channels.remove(channel);
            Ok(0)
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError> {
        self.check_open()?;
        let rx = self
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(channel, "Subscribed");

        let name = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %name, skipped, "Subscriber lagged, messages lost");
                None
            }
        });
        Ok(Box::pin(Subscription {
            inner: Box::pin(stream),
            _release: Release {
                channels: Arc::downgrade(&self.channels),
                channel: channel.to_string(),
            },
        }))
    }

    async fn prune(&self) -> usize {
        let mut channels = self.lock();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut channels = self.lock();
            let n = channels.len();
            channels.clear();
            n
        };
        info!(channels = dropped, "Broker shut down");
    }
}

/// Receiver plus the guard that unregisters the channel once the last
/// receiver is gone. Field order matters: the receiver drops first.
struct Subscription {
    inner: MessageStream,
    _release: Release,
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct Release {
    channels: Weak<Channels>,
    channel: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&self.channel)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&self.channel);
            trace!(channel = %self.channel, "Released channel");
        }
    }
}
