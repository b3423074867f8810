//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Secret used to verify HS256 access tokens
    pub jwt_secret: String,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,

    /// Match store and profile lookup; in-memory adapters when absent
    pub supabase: Option<SupabaseConfig>,

    pub tick_interval: Duration,
    pub persist_every_ticks: u32,
    pub ready_timeout: Duration,
    pub reconnect_grace: Duration,
    pub user_lookup_timeout: Duration,
    pub max_snapshot_repairs: u32,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            supabase,

            tick_interval: Duration::from_millis(parse_nonzero_or("TICK_INTERVAL_MS", 16)?),
            persist_every_ticks: parse_or("PERSIST_EVERY_TICKS", 10)?,
            ready_timeout: Duration::from_secs(parse_or("READY_TIMEOUT_SECS", 30)?),
            reconnect_grace: Duration::from_secs(parse_or("RECONNECT_GRACE_SECS", 30)?),
            user_lookup_timeout: Duration::from_millis(parse_or("USER_LOOKUP_TIMEOUT_MS", 500)?),
            max_snapshot_repairs: parse_or("MAX_SNAPSHOT_REPAIRS", 3)?,
        })
    }

    /// Local development settings with in-memory adapters
    pub fn for_local(jwt_secret: impl Into<String>) -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "info".to_string(),
            jwt_secret: jwt_secret.into(),
            client_origin: "http://localhost:3000".to_string(),
            supabase: None,
            tick_interval: Duration::from_millis(16),
            persist_every_ticks: 10,
            ready_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(30),
            user_lookup_timeout: Duration::from_millis(500),
            max_snapshot_repairs: 3,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            persist_every_ticks: self.persist_every_ticks.max(1),
            max_snapshot_repairs: self.max_snapshot_repairs,
            user_lookup_timeout: self.user_lookup_timeout,
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Like [`parse_or`], but zero is rejected
fn parse_nonzero_or(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match parse_or(key, default)? {
        0 => Err(ConfigError::Invalid(key)),
        value => Ok(value),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
