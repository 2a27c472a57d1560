//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - Built-in defaults
//! - The first TOML file found among [`CONFIG_PATHS`]
//! - Environment variables (`BEACON_PORT`, `BEACON_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use beacon_core::{PulseStoreConfig, RegistryConfig, RouterConfig};
use beacon_ledger::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Files probed by [`Config::load`], in order.
pub const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Pulse retention.
    #[serde(default)]
    pub pulses: PulsesConfig,

    /// Ledger store access.
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Events buffered per connection before new ones are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum HTTP request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Per-client request limit on the HTTP API.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Fixed-window request limit applied to `/api`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enforce the limit.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per client and window.
    #[serde(default = "default_rate_limit_requests")]
    pub max_requests: usize,

    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
}

/// Pulse store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsesConfig {
    /// How long pulses stay visible, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Cap on pulses returned by one recent-pulses query.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Interval between expired-pulse sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Upper bound on a single store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Compare-and-swap attempts per write.
    #[serde(default = "default_cas_attempts")]
    pub cas_attempts: u32,

    /// Attempts for the dependent step of a two-entity operation.
    #[serde(default = "default_saga_attempts")]
    pub saga_attempts: u32,

    /// Base backoff between those attempts, in milliseconds.
    #[serde(default = "default_saga_backoff")]
    pub saga_backoff_ms: u64,

    /// Idempotency keys remembered per record.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_outbox_capacity() -> usize {
    1024
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_body_bytes() -> usize {
    256 * 1024
}

fn default_rate_limit_requests() -> usize {
    100
}

fn default_rate_limit_window() -> u64 {
    15 * 60
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_recent_limit() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    2_000
}

fn default_cas_attempts() -> u32 {
    16
}

fn default_saga_attempts() -> u32 {
    3
}

fn default_saga_backoff() -> u64 {
    25
}

fn default_dedup_window() -> usize {
    4096
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            pulses: PulsesConfig::default(),
            ledger: LedgerSection::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            outbox_capacity: default_outbox_capacity(),
            max_rooms: default_max_rooms(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_message_size: default_max_message_size(),
            max_body_bytes: default_max_body_bytes(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window(),
        }
    }
}

impl Default for PulsesConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            recent_limit: default_recent_limit(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout(),
            cas_attempts: default_cas_attempts(),
            saga_attempts: default_saga_attempts(),
            saga_backoff_ms: default_saga_backoff(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                tracing::debug!(path = %expanded, "Using config file");
                builder = builder.add_source(config::File::new(
                    expanded.as_ref(),
                    config::FileFormat::Toml,
                ));
                break;
            }
        }

        builder
            .add_source(
                config::Environment::with_prefix("BEACON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Router settings derived from the limits.
    #[must_use]
    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            max_rooms: self.limits.max_rooms,
            max_subscriptions_per_connection: self.limits.max_subscriptions_per_connection,
            auto_delete_empty_rooms: true,
            registry: RegistryConfig {
                max_connections: self.limits.max_connections,
                outbox_capacity: self.limits.outbox_capacity,
            },
        }
    }

    #[must_use]
    pub fn pulse_store(&self) -> PulseStoreConfig {
        PulseStoreConfig {
            retention: Duration::from_secs(self.pulses.retention_secs),
            query_limit: self.pulses.recent_limit,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            store_timeout: Duration::from_millis(self.ledger.store_timeout_ms),
            cas_attempts: self.ledger.cas_attempts,
            saga_attempts: self.ledger.saga_attempts,
            saga_backoff: Duration::from_millis(self.ledger.saga_backoff_ms),
            dedup_window: self.ledger.dedup_window,
        }
    }

    /// Heartbeat interval announced to clients.
    #[must_use]
    pub fn heartbeat_ms(&self) -> u32 {
        u32::try_from(self.heartbeat.interval_ms).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.pulses.retention_secs, 86_400);
        assert_eq!(config.pulses.recent_limit, 1000);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000
            outbox_capacity = 16

            [limits.rate_limit]
            max_requests = 10

            [pulses]
            retention_secs = 3600

            [ledger]
            store_timeout_ms = 500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_rooms, 10_000);
        assert_eq!(config.limits.rate_limit.max_requests, 10);
        assert_eq!(config.limits.rate_limit.window_secs, 900);
        assert!(config.limits.rate_limit.enabled);

        let router = config.router();
        assert_eq!(router.registry.outbox_capacity, 16);
        assert_eq!(config.pulse_store().retention, Duration::from_secs(3600));
        assert_eq!(config.ledger().store_timeout, Duration::from_millis(500));
        assert_eq!(config.ledger().cas_attempts, 16);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("beacon-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "port = 7000\n[transport]\nwebsocket_path = \"/live\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.transport.websocket_path, "/live");

        assert!(Config::from_file(&path).is_err());
    }
}
