//! Configuration resolution for sessionbus.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/sessionbus/settings.json)
//! 3. Project config (.sessionbus/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete sessionbus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub docs: DocsConfig,
}

/// When a session's `lastActive` (and store TTL) is refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Every accepted inbound envelope slides the TTL window.
    #[default]
    OnInbound,
    /// Only a new handshake (session create) sets the TTL.
    OnHandshake,
}

impl std::str::FromStr for RefreshPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on-inbound" => Ok(Self::OnInbound),
            "on-handshake" => Ok(Self::OnHandshake),
            other => Err(Error::Config(format!("unknown refresh policy: {other}"))),
        }
    }
}

/// Session relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Inactivity window after which a session expires.
    pub session_ttl_secs: u64,
    /// Default deadline for awaiting a handler's response.
    pub await_timeout_ms: u64,
    pub refresh_policy: RefreshPolicy,
    /// Per-channel buffer of the in-process broker.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 1800,
            await_timeout_ms: 30_000,
            refresh_policy: RefreshPolicy::OnInbound,
            broadcast_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub const fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

/// Key/value store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl std::str::FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!("unknown store backend: {other}"))),
        }
    }
}

/// Key/value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_path: Option<PathBuf>,
    /// Interval of the background expired-entry cleanup.
    pub cleanup_interval_secs: u64,
    /// How often a `SQLite` broker subscription checks for new messages.
    pub broker_poll_ms: u64,
    /// How long published messages stay in `channel_messages` before cleanup.
    pub broker_retention_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_path: None,
            cleanup_interval_secs: 3600,
            broker_poll_ms: 25,
            broker_retention_secs: 60,
        }
    }
}

impl StoreConfig {
    pub const fn broker_poll(&self) -> Duration {
        Duration::from_millis(self.broker_poll_ms)
    }

    pub const fn broker_retention(&self) -> Duration {
        Duration::from_secs(self.broker_retention_secs)
    }
}

/// HTTP host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub log_level: String,
    pub max_body_bytes: usize,
    /// How long `GET /poll` holds a request open waiting for an event.
    /// Kept below the transport's poll timeout.
    pub poll_hold_ms: u64,
    /// A session mailbox left unpolled this long is reset: events queued
    /// while nobody was polling are discarded.
    pub mailbox_idle_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            log_level: "info".to_string(),
            max_body_bytes: 4 * 1024 * 1024, // 4 MB
            poll_hold_ms: 1500,
            mailbox_idle_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub const fn poll_hold(&self) -> Duration {
        Duration::from_millis(self.poll_hold_ms)
    }

    pub const fn mailbox_idle(&self) -> Duration {
        Duration::from_millis(self.mailbox_idle_ms)
    }
}

/// Consumer-side polling transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            poll_interval_ms: 200,
            poll_timeout_ms: 2000,
            send_timeout_ms: 30_000,
        }
    }
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Documentation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Base URL serving raw repository files (`<base>/<owner>/<repo>/HEAD/<file>`).
    pub raw_base_url: String,
    pub cache_ttl_secs: u64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            raw_base_url: "https://raw.githubusercontent.com".to_string(),
            cache_ttl_secs: 3600,
        }
    }
}

impl DocsConfig {
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".sessionbus").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|p| p.join("sessionbus").join("settings.json"))
}

/// Default `SQLite` store path.
pub fn default_database_path() -> Option<PathBuf> {
    global_config_path().and_then(|p| p.parent().map(|dir| dir.join("store.db")))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.store.database_path.is_some() {
        base.store.database_path = overlay.store.database_path;
    }
    base.store.backend = overlay.store.backend;
    base.store.cleanup_interval_secs = overlay.store.cleanup_interval_secs;

    base.relay = overlay.relay;
    base.server = overlay.server;
    base.transport = overlay.transport;
    base.docs = overlay.docs;
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("SESSIONBUS_SESSION_TTL").and_then(|v| v.parse().ok()) {
        config.relay.session_ttl_secs = n;
    }
    if let Some(n) = var("SESSIONBUS_AWAIT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.relay.await_timeout_ms = n;
    }
    if let Some(policy) = var("SESSIONBUS_REFRESH").and_then(|v| v.parse().ok()) {
        config.relay.refresh_policy = policy;
    }
    if let Some(backend) = var("SESSIONBUS_STORE").and_then(|v| v.parse().ok()) {
        config.store.backend = backend;
    }
    if let Some(path) = var("SESSIONBUS_DB_PATH") {
        config.store.database_path = Some(PathBuf::from(path));
    }
    if let Some(addr) = var("SESSIONBUS_ADDR").and_then(|v| v.parse().ok()) {
        config.server.addr = addr;
    }
    if let Some(level) = var("SESSIONBUS_LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(url) = var("SESSIONBUS_BASE_URL") {
        config.transport.base_url = url;
    }
    if let Some(n) = var("SESSIONBUS_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.transport.poll_interval_ms = n;
    }
    if let Some(url) = var("SESSIONBUS_DOCS_BASE_URL") {
        config.docs.raw_base_url = url;
    }
}
