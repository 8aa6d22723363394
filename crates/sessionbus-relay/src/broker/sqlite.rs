//! `SQLite`-backed [`Broker`] for relay processes sharing one database file.
//!
//! A publish appends a row to `channel_messages`. Each subscription tails that
//! table from the highest id committed when it attached, so it sees exactly
//! the messages published after `subscribe` returns. Open subscriptions hold
//! a renewed lease in `channel_subscribers`; a publish counts live leases to
//! report its audience.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sessionbus_core::config::StoreConfig;
use sessionbus_core::db::unix_timestamp_millis;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{Broker, BrokerError, MessageStream};
use crate::store::{StoreDatabase, ttl_millis};

/// Lease lifetime; renewed at a third of this while the stream is open.
const LEASE_TTL: Duration = Duration::from_secs(30);

/// Messages buffered between a tailing task and its consumer.
const TAIL_BUFFER: usize = 64;

/// Upper bound on rows fetched by one tailing query.
const TAIL_BATCH: i64 = 256;

pub struct SqliteBroker {
    db: StoreDatabase,
    poll: Duration,
    retention: Duration,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SqliteBroker {
    /// Broker over the `channel_*` tables of `db`, timed by `config`.
    pub fn new(db: StoreDatabase, config: &StoreConfig) -> Self {
        Self {
            db,
            poll: config.broker_poll().max(Duration::from_millis(1)),
            retention: config.broker_retention(),
            closed: AtomicBool::new(false),
            shutdown: watch::Sender::new(false),
        }
    }

    fn check_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Unavailable("broker shut down".into()));
        }
        Ok(())
    }

    /// Live leases on `channel`, across every process sharing the file.
    pub async fn subscriber_count(&self, channel: &str) -> Result<usize, BrokerError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM channel_subscribers WHERE channel = ? AND expires_at > ?",
        )
        .bind(channel)
        .bind(unix_timestamp_millis())
        .fetch_one(self.db.pool())
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn publish(&self, channel: &str, message: String) -> Result<usize, BrokerError> {
        self.check_open()?;
        let now = unix_timestamp_millis();
        sqlx::query("INSERT INTO channel_messages (channel, message, published_at) VALUES (?, ?, ?)")
            .bind(channel)
            .bind(&message)
            .bind(now)
            .execute(self.db.pool())
            .await?;
        let count = self.subscriber_count(channel).await?;
        if count == 0 {
            debug!(channel, "Publish with no subscribers");
        }
        Ok(count)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError> {
        self.check_open()?;
        let lease = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO channel_subscribers (id, channel, expires_at) VALUES (?, ?, ?)")
            .bind(&lease)
            .bind(channel)
            .bind(lease_expiry())
            .execute(self.db.pool())
            .await?;
        let (cursor,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM channel_messages")
            .fetch_one(self.db.pool())
            .await?;
        debug!(channel, cursor, "Subscribed");

        let (tx, rx) = mpsc::channel(TAIL_BUFFER);
        let tail = Tail {
            db: self.db.clone(),
            channel: channel.to_string(),
            lease,
            cursor,
            poll: self.poll,
            shutdown: self.shutdown.subscribe(),
        };
        tokio::spawn(tail.run(tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn prune(&self) -> usize {
        let now = unix_timestamp_millis();
        let cutoff = now.saturating_sub(ttl_millis(self.retention));
        let messages = sqlx::query("DELETE FROM channel_messages WHERE published_at <= ?")
            .bind(cutoff)
            .execute(self.db.pool())
            .await;
        let leases = sqlx::query("DELETE FROM channel_subscribers WHERE expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await;
        match (messages, leases) {
            (Ok(messages), Ok(leases)) => {
                let removed = messages.rows_affected() + leases.rows_affected();
                usize::try_from(removed).unwrap_or(usize::MAX)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Broker prune failed");
                0
            }
        }
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        info!("Broker shut down");
    }
}

fn lease_expiry() -> i64 {
    unix_timestamp_millis().saturating_add(ttl_millis(LEASE_TTL))
}

/// Background reader feeding one subscription.
struct Tail {
    db: StoreDatabase,
    channel: String,
    lease: String,
    cursor: i64,
    poll: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Tail {
    async fn run(mut self, tx: mpsc::Sender<String>) {
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut renewed = Instant::now();

        'tail: loop {
            tokio::select! {
                () = tx.closed() => break,
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let rows = match self.fetch().await {
                Ok(rows) => rows,
                Err(sqlx::Error::PoolClosed) => break,
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Broker tail query failed");
                    continue;
                }
            };
            for (id, message) in rows {
                self.cursor = id;
                tokio::select! {
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            break 'tail;
                        }
                    }
                    _ = self.shutdown.changed() => break 'tail,
                }
            }

            if renewed.elapsed() >= LEASE_TTL / 3 {
                if let Err(e) = self.renew().await {
                    warn!(channel = %self.channel, error = %e, "Lease renewal failed");
                }
                renewed = Instant::now();
            }
        }

        self.release().await;
    }

    async fn fetch(&self) -> Result<Vec<(i64, String)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, message FROM channel_messages \
             WHERE channel = ? AND id > ? ORDER BY id LIMIT ?",
        )
        .bind(&self.channel)
        .bind(self.cursor)
        .bind(TAIL_BATCH)
        .fetch_all(self.db.pool())
        .await
    }

    async fn renew(&self) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE channel_subscribers SET expires_at = ? WHERE id = ?")
            .bind(lease_expiry())
            .bind(&self.lease)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn release(&self) {
        let released = sqlx::query("DELETE FROM channel_subscribers WHERE id = ?")
            .bind(&self.lease)
            .execute(self.db.pool())
            .await;
        match released {
            Ok(_) => trace!(channel = %self.channel, "Subscription released"),
            // The pool may already be closed; the lease then lapses on its own.
            Err(e) => debug!(channel = %self.channel, error = %e, "Lease not released"),
        }
    }
}
