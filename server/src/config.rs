use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::fleet::FleetConfig;

/// Momentum realtime delivery server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(
    name = "momentum-realtime",
    version,
    about = "Momentum realtime presence and delivery server"
)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "MOMENTUM_PORT", default_value = "8464")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "MOMENTUM_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./momentum.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "MOMENTUM_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "MOMENTUM_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Inbound WebSocket rate limiting (loaded from [rate_limit] in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Offline queue tuning (loaded from [queue] in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub queue: QueueSettings,

    /// Fleet pub/sub configuration (loaded from [fleet] in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// Per-connection inbound event budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Window length in milliseconds (default: 1000)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Events allowed per window (default: 10)
    #[serde(default = "default_max_events")]
    pub max_events: u32,

    /// Close a connection after this many consecutive rejected events.
    /// Unset = drop events but keep the connection open.
    #[serde(default)]
    pub disconnect_after_violations: Option<u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_events: default_max_events(),
            disconnect_after_violations: None,
        }
    }
}

fn default_window_ms() -> u64 {
    1000
}

fn default_max_events() -> u32 {
    10
}

/// Offline delivery queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Default TTL in seconds for queued messages (default: 259200 = 3 days)
    #[serde(default = "default_queue_ttl")]
    pub default_ttl_secs: i64,

    /// Interval in seconds between expired-row sweeps (default: 3600 = 1 hour)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_queue_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_queue_ttl() -> i64 {
    259_200
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8464,
            bind_address: "0.0.0.0".to_string(),
            config: "./momentum.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            rate_limit: RateLimitSettings::default(),
            queue: QueueSettings::default(),
            fleet: FleetConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (MOMENTUM_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("MOMENTUM_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Momentum Realtime Server Configuration
# Place this file at ./momentum.toml or specify with --config <path>
# All settings can be overridden via environment variables (MOMENTUM_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8464)
# port = 8464

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and signing keys
# data_dir = "./data"

# ---- Inbound WebSocket Rate Limiting ----
# [rate_limit]

# Window length in milliseconds (default: 1000)
# window_ms = 1000

# Events allowed per window (default: 10)
# max_events = 10

# Close a connection after this many consecutive rejected events.
# Commented out = never disconnect, just drop the excess events.
# disconnect_after_violations = 20

# ---- Offline Delivery Queue ----
# [queue]

# Default TTL in seconds for queued messages (default: 259200 = 3 days)
# default_ttl_secs = 259200

# Interval in seconds between expired-row sweeps (default: 3600 = 1 hour)
# sweep_interval_secs = 3600

# ---- Fleet Pub/Sub ----
# [fleet]

# Join a fleet of cooperating processes (default: false — single process,
# the offline queue alone backstops delivery)
# enabled = false

# libp2p TCP listener port (separate from the HTTP port)
# port = 8465

# Multiaddrs of other fleet processes to dial at startup
# peers = ["/ip4/10.0.0.7/tcp/8465"]

# Gossipsub mesh parameters (tuned for small fleets)
# mesh_n = 4          # D: mesh degree (peers per topic)
# mesh_n_low = 3      # D_lo: triggers mesh repair below this
# mesh_n_high = 8     # D_hi: prunes mesh above this
# max_transmit_size = 65536  # Max message size in bytes (64 KiB)
"#
    .to_string()
}
