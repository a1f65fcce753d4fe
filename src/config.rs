//! Process configuration from the environment.
//!
//! `.env` files are layered in first (nearest wins), then every setting is
//! read from the environment. Optional settings fall back to defaults; a
//! value that is present but unparsable is an error rather than a silent
//! default.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{DEFAULT_STALE_ENTRY_HOURS, EngineConfig};
use crate::gateway::RetryConfig;
use crate::persistence::{DEFAULT_LOCK_ATTEMPTS, DEFAULT_PROCESSED_CAP};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub state_dir: PathBuf,
    pub listen: SocketAddr,
    pub protocol_url: String,
    pub services_url: String,
    pub gateway_token: Option<String>,
    /// Secret for notification signatures; unsigned notifications are
    /// accepted when unset.
    pub notification_secret: Option<String>,
    pub processed_cap: usize,
    pub lock_attempts: u32,
    pub engine: EngineConfig,
    pub retry: RetryConfig,
}

impl Config {
    /// Loads `.env` layers and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv_layers();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let stale_hours: i64 = vars.parse_or("STALE_ENTRY_HOURS", DEFAULT_STALE_ENTRY_HOURS)?;
        if stale_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "STALE_ENTRY_HOURS",
                message: "must be positive".to_string(),
            });
        }
        let price: f64 = vars.parse_or("MINT_PRICE", 1.0)?;
        if !price.is_finite() || price < 0.0 {
            return Err(ConfigError::Invalid {
                key: "MINT_PRICE",
                message: format!("{price} is not a valid price"),
            });
        }

        let engine = EngineConfig {
            price,
            default_payer: vars.optional("DEFAULT_PAYER"),
            auto_evaluate: vars.flag("AUTO_EVALUATE", false),
            stale_after: chrono::Duration::hours(stale_hours),
        };

        let initial_delay_ms: u64 = vars.parse_or(
            "RETRY_INITIAL_DELAY_MS",
            RetryConfig::DEFAULT.initial_delay.as_millis() as u64,
        )?;
        let max_retries: u32 = vars.parse_or("RETRY_MAX_ATTEMPTS", RetryConfig::DEFAULT.max_retries)?;
        let initial_delay = Duration::from_millis(initial_delay_ms);
        let retry = RetryConfig::new(
            max_retries,
            initial_delay,
            initial_delay.saturating_mul(8),
            RetryConfig::DEFAULT.backoff_multiplier,
        );

        Ok(Config {
            state_dir: PathBuf::from(vars.string_or("MINT_RELAY_STATE_DIR", "./state")),
            listen: vars.parse_or("MINT_RELAY_LISTEN", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            protocol_url: vars.required("PROTOCOL_GATEWAY_URL")?,
            services_url: vars.required("SERVICES_GATEWAY_URL")?,
            gateway_token: vars.optional("GATEWAY_TOKEN"),
            notification_secret: vars.optional("NOTIFICATION_SECRET"),
            processed_cap: vars.parse_or("PROCESSED_ITEMS_CAP", DEFAULT_PROCESSED_CAP)?,
            lock_attempts: vars.parse_or("STORAGE_LOCK_ATTEMPTS", DEFAULT_LOCK_ATTEMPTS)?,
            engine,
            retry,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Present and non-blank.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.optional(key) {
            Some(v) => matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }
}

fn load_dotenv_layers() {
    for path in ["../.env", ".env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
