use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags that were actually given take part in the
/// merge, so an omitted flag never masks a value from the TOML file.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(
    name = "forum-server",
    version,
    about = "Forum presence and private messaging hub"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Data directory for the SQLite database
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Path to TOML config file
    #[arg(long, env = "FORUM_CONFIG", default_value = "./forum.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,
}

/// Longest accepted session lifetime: one hundred years.
pub const MAX_SESSION_TTL_HOURS: u64 = 100 * 365 * 24;

/// WebSocket transport settings (`[ws]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Seconds between server pings; 0 disables keepalive
    pub ping_interval_secs: u64,
    /// Seconds to wait for a pong before closing the connection
    pub pong_timeout_secs: u64,
    /// Largest inbound frame accepted, in bytes
    pub max_frame_bytes: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            max_frame_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: String,
    pub json_logs: bool,
    pub session_ttl_hours: u64,
    pub session_cleanup_interval_secs: u64,
    pub history_page_size: u32,
    pub ws: WsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            data_dir: "./data".to_string(),
            json_logs: false,
            session_ttl_hours: 24,
            session_cleanup_interval_secs: 3600,
            history_page_size: 10,
            ws: WsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (FORUM_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(cli).extract()?;
        if config.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(figment::Error::from(format!(
                "session_ttl_hours must be at most {}, got {}",
                MAX_SESSION_TTL_HOURS, config.session_ttl_hours
            )));
        }
        Ok(config)
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("FORUM_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Forum hub configuration
# Place this file at ./forum.toml or specify with --config <path>
# Every key can be overridden with a FORUM_ environment variable
# (FORUM_PORT, FORUM_WS__PING_INTERVAL_SECS, ...) or a CLI flag.

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Structured JSON logs instead of pretty output
# json_logs = false

# Directory holding forum.db
# data_dir = "./data"

# Session lifetime in hours (default: 24, at most 876000)
# session_ttl_hours = 24

# Seconds between expired-session purges (default: 3600)
# session_cleanup_interval_secs = 3600

# Messages per chat history page when the client does not ask (default: 10, max 100)
# history_page_size = 10

# ---- WebSocket ----
# [ws]
# ping_interval_secs = 30      # 0 disables server pings
# pong_timeout_secs = 10
# max_frame_bytes = 65536
"#
    .to_string()
}
