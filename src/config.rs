use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Marketspace realtime server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "marketspace-server", version, about = "Marketspace realtime server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "MARKETSPACE_PORT", default_value = "8530")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "MARKETSPACE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./marketspace.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "MARKETSPACE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT signing key)
    #[arg(long, env = "MARKETSPACE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Push delivery configuration (loaded from [push] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub push: Option<PushConfig>,

    /// Email delivery configuration (loaded from [email] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub email: Option<EmailConfig>,

    /// Promotion expiry sweep configuration (loaded from [sweep] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub sweep: Option<SweepConfig>,
}

/// Configuration for the outbound web-push collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether push delivery is enabled. Disabled means a logging sandbox
    /// transport is used instead (dev mode).
    #[serde(default)]
    pub enabled: bool,

    /// Bearer key sent to the push service with each delivery.
    #[serde(default)]
    pub api_key: String,
}

/// Configuration for the outbound SMTP collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Whether email fallback is enabled. Disabled means a logging sandbox
    /// transport is used instead (dev mode).
    #[serde(default)]
    pub enabled: bool,

    /// SMTP relay host.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default)]
    pub smtp_user: String,

    #[serde(default)]
    pub smtp_password: String,

    /// From address for notification mail.
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            from_address: default_from_address(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_from_address() -> String {
    "noreply@marketspace.local".to_string()
}

/// Configuration for the promotion expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval in seconds between sweep runs (default: 3600 = 1 hour)
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Days ahead of expiry at which owners start receiving warnings
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            warning_days: 3,
        }
    }
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_warning_days() -> i64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8530,
            bind_address: "0.0.0.0".to_string(),
            config: "./marketspace.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            push: None,
            email: None,
            sweep: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (MARKETSPACE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("MARKETSPACE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Marketspace Realtime Server Configuration
# Place this file at ./marketspace.toml or specify with --config <path>
# All settings can be overridden via environment variables (MARKETSPACE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8530)
# port = 8530

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Push Delivery ----
# [push]
# enabled = false      # false = dev sandbox, delivery attempts are logged only
# api_key = ""

# ---- Email Fallback ----
# [email]
# enabled = false      # false = dev sandbox, delivery attempts are logged only
# smtp_host = "localhost"
# smtp_user = ""
# smtp_password = ""
# from_address = "noreply@marketspace.local"

# ---- Promotion Expiry Sweep ----
# [sweep]
# interval_secs = 3600  # how often expired/expiring promotions are checked
# warning_days = 3      # warn owners this many days before expiry
"#
    .to_string()
}
