//! sessionbus relay server
//!
//! HTTP host that relays protocol messages between stateless request
//! handlers and session workers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use sessionbus_core::config::{RefreshPolicy, StoreBackend, load_config};
use sessionbus_core::tracing_init::init_tracing_with_metrics;
use sessionbus_relay::SharedResources;
use sessionbus_relay::docs::{CachedDocs, DocsRuntime, GithubDocs};
use sessionbus_relay::mailbox::Mailboxes;
use sessionbus_relay::server::{AppState, build_router};
use sessionbus_relay::worker::WorkerSet;

#[derive(Parser, Debug)]
#[command(name = "sessionbus-relay")]
#[command(version, about = "sessionbus relay - session registry, broker channels and HTTP host")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SESSIONBUS_ADDR")]
    addr: Option<SocketAddr>,

    /// Key/value store backend (memory or sqlite).
    #[arg(long, env = "SESSIONBUS_STORE")]
    store: Option<StoreBackend>,

    /// Path to the `SQLite` store file.
    #[arg(long, env = "SESSIONBUS_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Session inactivity TTL in seconds.
    #[arg(long, env = "SESSIONBUS_SESSION_TTL")]
    session_ttl: Option<u64>,

    /// How long a caller waits for a handler response, in seconds.
    #[arg(long, env = "SESSIONBUS_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// When session liveness is refreshed (on-inbound or on-handshake).
    #[arg(long, env = "SESSIONBUS_REFRESH")]
    refresh: Option<RefreshPolicy>,

    /// Base URL serving raw repository files.
    #[arg(long, env = "SESSIONBUS_DOCS_BASE_URL")]
    docs_base_url: Option<String>,

    /// Project directory holding `.sessionbus/settings.json`.
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// OTLP endpoint for traces and metrics (needs the `metrics` feature).
    #[arg(long, env = "SESSIONBUS_OTLP_ENDPOINT")]
    metrics_endpoint: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SESSIONBUS_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _telemetry = init_tracing_with_metrics(
        "sessionbus_relay=info,tower_http=info",
        args.log_json,
        args.metrics_endpoint.as_deref(),
    );

    let mut config = load_config(args.project_dir.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    if let Some(path) = args.db_path {
        config.store.database_path = Some(path);
    }
    if let Some(ttl) = args.session_ttl {
        config.relay.session_ttl_secs = ttl;
    }
    if let Some(secs) = args.request_timeout {
        config.relay.await_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(policy) = args.refresh {
        config.relay.refresh_policy = policy;
    }
    if let Some(url) = args.docs_base_url {
        config.docs.raw_base_url = url;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        store = ?config.store.backend,
        refresh = ?config.relay.refresh_policy,
        "Starting sessionbus-relay"
    );

    let resources = SharedResources::get_or_init(&config).await?;

    let docs = CachedDocs::new(
        GithubDocs::new(&config.docs)?,
        Arc::clone(&resources.store),
        config.docs.cache_ttl(),
    );
    let workers = Arc::new(WorkerSet::new(
        resources.relay.clone(),
        Arc::new(DocsRuntime::new(docs)),
    ));

    let mailboxes = Arc::new(Mailboxes::new(
        resources.relay.clone(),
        config.server.mailbox_idle(),
    ));

    // Spawn background task to purge expired store entries, dead workers,
    // abandoned mailboxes and broker channels
    let cleanup_store = Arc::clone(&resources.store);
    let cleanup_broker = Arc::clone(&resources.broker);
    let cleanup_workers = Arc::clone(&workers);
    let cleanup_mailboxes = Arc::clone(&mailboxes);
    let cleanup_every = Duration::from_secs(config.store.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            match cleanup_store.purge_expired().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Background store cleanup completed");
                }
                Err(e) => {
                    warn!(error = %e, "Background store cleanup failed");
                }
                _ => {}
            }
            let reaped = cleanup_workers.reap().await;
            if reaped > 0 {
                info!(reaped, "Finished workers reaped");
            }
            let closed = cleanup_mailboxes.reap().await;
            if closed > 0 {
                info!(closed, "Abandoned mailboxes closed");
            }
            let pruned = cleanup_broker.prune().await;
            if pruned > 0 {
                info!(pruned, "Broker channels pruned");
            }
        }
    });

    let state = AppState {
        relay: resources.relay.clone(),
        workers: Arc::clone(&workers),
        mailboxes,
        store: Arc::clone(&resources.store),
        poll_hold: config.server.poll_hold(),
        max_wait: config.relay.await_timeout().max(Duration::from_secs(60)),
    };
    let app = build_router(state, config.server.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;
    info!(addr = %config.server.addr, "Relay listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    workers.shutdown().await;
    drop(resources);
    SharedResources::shutdown().await;
    info!("Relay stopped");
    Ok(())
}
