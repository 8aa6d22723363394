//! Per-session event mailboxes behind `GET /poll`.
//!
//! A mailbox keeps one subscription to its session's event channel open
//! between polls, so events published while no poll is in flight queue up
//! instead of being lost. Each poll takes at most one event.
//!
//! A mailbox nobody has used for the idle window is reset on next use: a
//! consumer that stopped polling does not receive what was published while
//! it was away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sessionbus_core::OutboundEnvelope;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::Listener;
use crate::error::{RelayError, Result};
use crate::relay::SessionRelay;

type Mailbox = Arc<Mutex<Listener<OutboundEnvelope>>>;

struct Slot {
    mailbox: Mailbox,
    last_used: Instant,
}

/// At most one mailbox per session in this process.
pub struct Mailboxes {
    relay: SessionRelay,
    idle: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Mailboxes {
    pub fn new(relay: SessionRelay, idle: Duration) -> Self {
        Self {
            relay,
            idle,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Open the mailbox for `session_id`, or reset it if it went idle.
    ///
    /// Events published after this returns are queued for the next poll.
    pub async fn ensure(&self, session_id: &str) -> Result<()> {
        self.checkout(session_id).await.map(drop)
    }

    /// Take the oldest queued event, waiting up to `hold` for one to arrive.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn next(&self, session_id: &str, hold: Duration) -> Result<Option<OutboundEnvelope>> {
        if !self.relay.session_exists(session_id).await? {
            if self.slots.lock().await.remove(session_id).is_some() {
                debug!(session_id, "Mailbox dropped with its session");
            }
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }

        let mailbox = self.checkout(session_id).await?;
        let event = tokio::time::timeout(hold, async {
            mailbox.lock().await.next().await
        })
        .await;
        self.touch(session_id, &mailbox).await;

        match event {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => {
                self.discard(session_id, &mailbox).await;
                Err(RelayError::BrokerUnavailable("event channel closed".into()))
            }
            Err(_) => Ok(None),
        }
    }

    /// Drop mailboxes whose session is gone or that sat idle. Returns the
    /// count removed.
    pub async fn reap(&self) -> usize {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        let mut gone = Vec::new();
        for id in ids {
            match self.relay.session_exists(&id).await {
                Ok(true) => {}
                Ok(false) => gone.push(id),
                Err(e) => warn!(session_id = %id, error = %e, "Mailbox liveness check failed"),
            }
        }

        let mut slots = self.slots.lock().await;
        let before = slots.len();
        for id in &gone {
            slots.remove(id);
        }
        slots.retain(|_, slot| slot.last_used.elapsed() <= self.idle);
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    async fn checkout(&self, session_id: &str) -> Result<Mailbox> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(session_id) {
            if slot.last_used.elapsed() <= self.idle {
                slot.last_used = Instant::now();
                return Ok(Arc::clone(&slot.mailbox));
            }
            debug!(session_id, "Idle mailbox reset, queued events discarded");
        }

        let listener = self.relay.listen_events(session_id).await?;
        let mailbox = Arc::new(Mutex::new(listener));
        slots.insert(
            session_id.to_string(),
            Slot {
                mailbox: Arc::clone(&mailbox),
                last_used: Instant::now(),
            },
        );
        drop(slots);
        debug!(session_id, "Mailbox opened");
        Ok(mailbox)
    }

    async fn touch(&self, session_id: &str, mailbox: &Mailbox) {
        if let Some(slot) = self.slots.lock().await.get_mut(session_id)
            && Arc::ptr_eq(&slot.mailbox, mailbox)
        {
            slot.last_used = Instant::now();
        }
    }

    async fn discard(&self, session_id: &str, mailbox: &Mailbox) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(session_id)
            .is_some_and(|slot| Arc::ptr_eq(&slot.mailbox, mailbox))
        {
            slots.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use sessionbus_core::config::RelayConfig;

    use super::*;
    use crate::test_support::{fixture, fixture_with};

    const HOLD: Duration = Duration::from_millis(50);

    fn event(n: u32) -> OutboundEnvelope {
        OutboundEnvelope::ok(format!(r#"{{"n":{n}}}"#))
    }

    #[tokio::test]
    async fn events_between_polls_are_queued_in_order() {
        let f = fixture();
        f.relay.register_session_with_id("s1", Value::Null).await.unwrap();
        let mailboxes = Mailboxes::new(f.relay.clone(), Duration::from_secs(5));
        mailboxes.ensure("s1").await.unwrap();

        assert_eq!(f.relay.publish_event("s1", &event(0)).await.unwrap(), 1);
        assert_eq!(f.relay.publish_event("s1", &event(1)).await.unwrap(), 1);

        assert_eq!(mailboxes.next("s1", HOLD).await.unwrap(), Some(event(0)));
        assert_eq!(mailboxes.next("s1", HOLD).await.unwrap(), Some(event(1)));
        assert_eq!(mailboxes.next("s1", HOLD).await.unwrap(), None);
        assert_eq!(mailboxes.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let f = fixture();
        let mailboxes = Mailboxes::new(f.relay.clone(), Duration::from_secs(5));
        assert!(matches!(
            mailboxes.ensure("ghost").await,
            Err(RelayError::SessionNotFound(_))
        ));
        assert!(matches!(
            mailboxes.next("ghost", HOLD).await,
            Err(RelayError::SessionNotFound(_))
        ));
        assert!(mailboxes.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_mailbox_discards_its_backlog() {
        let f = fixture();
        f.relay.register_session_with_id("s1", Value::Null).await.unwrap();
        let mailboxes = Mailboxes::new(f.relay.clone(), Duration::from_secs(5));
        mailboxes.ensure("s1").await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        f.relay.publish_event("s1", &event(0)).await.unwrap();
        assert_eq!(mailboxes.next("s1", HOLD).await.unwrap(), None);

        f.relay.publish_event("s1", &event(1)).await.unwrap();
        assert_eq!(mailboxes.next("s1", HOLD).await.unwrap(), Some(event(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_drops_its_mailbox() {
        let f = fixture_with(&RelayConfig {
            session_ttl_secs: 1,
            ..RelayConfig::default()
        });
        f.relay.register_session_with_id("s1", Value::Null).await.unwrap();
        f.relay.register_session_with_id("s2", Value::Null).await.unwrap();
        let mailboxes = Mailboxes::new(f.relay.clone(), Duration::from_secs(5));
        mailboxes.ensure("s1").await.unwrap();
        mailboxes.ensure("s2").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            mailboxes.next("s1", HOLD).await,
            Err(RelayError::SessionNotFound(_))
        ));
        assert_eq!(mailboxes.reap().await, 1);
        assert!(mailboxes.is_empty().await);
        assert_eq!(f.broker.channel_count(), 0);
    }
}
