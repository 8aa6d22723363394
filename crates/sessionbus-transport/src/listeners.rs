//! Ordered listener lists with per-listener failure boundaries.
//!
//! A listener that returns an error or panics is logged and skipped; the
//! rest of the list still sees the event.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use sessionbus_core::Payload;
use tracing::{error, warn};

use crate::error::TransportError;

pub type MessageListener = Arc<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&TransportError) -> anyhow::Result<()> + Send + Sync>;

/// Handle used to remove a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Slot<L> = RwLock<Vec<(ListenerId, L)>>;

#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    messages: Slot<MessageListener>,
    errors: Slot<ErrorListener>,
}

impl Listeners {
    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_message(&self, listener: MessageListener) -> ListenerId {
        let id = self.next_id();
        self.messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn add_error(&self, listener: ErrorListener) -> ListenerId {
        let id = self.next_id();
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener from whichever list holds it.
    pub fn remove(&self, id: ListenerId) -> bool {
        remove_from(&self.messages, id) || remove_from(&self.errors, id)
    }

    pub fn message_count(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every message listener in registration order.
    ///
    /// Returns how many completed without failing.
    pub fn dispatch_message(&self, payload: &Payload) -> usize {
        let snapshot = snapshot(&self.messages);
        snapshot
            .iter()
            .filter(|(id, listener)| guarded("message", *id, || listener(payload)))
            .count()
    }

    /// Invoke every error listener in registration order.
    pub fn dispatch_error(&self, err: &TransportError) -> usize {
        let snapshot = snapshot(&self.errors);
        snapshot
            .iter()
            .filter(|(id, listener)| guarded("error", *id, || listener(err)))
            .count()
    }
}

fn snapshot<L: Clone>(slot: &Slot<L>) -> Vec<(ListenerId, L)> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn remove_from<L>(slot: &Slot<L>, id: ListenerId) -> bool {
    let mut list = slot.write().unwrap_or_else(PoisonError::into_inner);
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}

fn guarded(kind: &str, id: ListenerId, call: impl FnOnce() -> anyhow::Result<()>) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(kind, listener = id.0, error = %e, "Listener failed");
            false
        }
        Err(_) => {
            error!(kind, listener = id.0, "Listener panicked");
            false
        }
    }
}
