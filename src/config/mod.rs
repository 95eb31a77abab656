//! Configuration management for the price dealer.
//!
//! Loads settings from an optional config file and environment variables.
//! Per-instrument trade targets live in a separate prices file, see
//! [`load_trade_configs`].

mod trades;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::feed::{CandleInterval, REST_URL, SANDBOX_REST_URL, STREAMING_URL};

pub use trades::{load_trade_configs, parse_trade_configs, TradeConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Market data connection
    #[serde(default)]
    pub feed: FeedConfig,
    /// Deal storage and prices file locations
    #[serde(default)]
    pub dealer: DealerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// API token used for both REST and streaming calls
    #[serde(default)]
    pub token: String,
    /// Use the sandbox environment (registers a sandbox account on start)
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    /// Override for the streaming endpoint
    #[serde(default)]
    pub streaming_url: Option<String>,
    /// Override for the REST endpoint
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Candle interval every instrument is subscribed with
    #[serde(default)]
    pub candle_interval: CandleInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealerConfig {
    /// YAML file with per-instrument buy/sell targets
    #[serde(default = "default_prices_file")]
    pub prices_file: PathBuf,
    /// Directory holding one marker per active deal
    #[serde(default = "default_current_dir")]
    pub current_dir: PathBuf,
    /// Directory finished deals are moved into
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Give up a price wait after this many seconds (unset = wait forever)
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

fn default_sandbox() -> bool {
    true
}

fn default_prices_file() -> PathBuf {
    PathBuf::from("prices.yml")
}

fn default_current_dir() -> PathBuf {
    PathBuf::from("deals/current")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("deals/archive")
}

impl FeedConfig {
    pub fn streaming_url(&self) -> &str {
        self.streaming_url.as_deref().unwrap_or(STREAMING_URL)
    }

    pub fn rest_url(&self) -> &str {
        match &self.rest_url {
            Some(url) => url,
            None if self.sandbox => SANDBOX_REST_URL,
            None => REST_URL,
        }
    }
}

impl DealerConfig {
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from `.env`, an optional config file and
    /// `DEALER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path.to_path_buf()));
                }
                config::File::from(path).required(true)
            }
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("DEALER").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "feed.token is required (set DEALER__FEED__TOKEN)".to_string(),
            ));
        }
        if self.dealer.current_dir == self.dealer.archive_dir {
            return Err(ConfigError::Invalid(
                "dealer.current_dir and dealer.archive_dir must differ".to_string(),
            ));
        }
        if self.dealer.max_wait_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "dealer.max_wait_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            sandbox: default_sandbox(),
            streaming_url: None,
            rest_url: None,
            candle_interval: CandleInterval::default(),
        }
    }
}

impl Default for DealerConfig {
    fn default() -> Self {
        Self {
            prices_file: default_prices_file(),
            current_dir: default_current_dir(),
            archive_dir: default_archive_dir(),
            max_wait_secs: None,
        }
    }
}
