use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_CHANNEL: &str = "data_changes";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    /// Full connection string; takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// What the dispatch loop does when a liveness probe fails.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Close the session and return the failure to the caller.
    #[default]
    Fatal,
    /// Log the failure and let the session reconnect.
    Reconnect,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    #[serde(default = "default_min_reconnect_interval_secs")]
    pub min_reconnect_interval_secs: u64,
    #[serde(default = "default_max_reconnect_interval_secs")]
    pub max_reconnect_interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Give up after this many consecutive failed connection attempts.
    /// `None` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub probe_failure: ProbeFailurePolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            liveness_window_secs: default_liveness_window_secs(),
            min_reconnect_interval_secs: default_min_reconnect_interval_secs(),
            max_reconnect_interval_secs: default_max_reconnect_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_reconnect_attempts: None,
            probe_failure: ProbeFailurePolicy::default(),
        }
    }
}

impl PostgresConfig {
    /// Bound on one whole connection attempt, startup handshake included.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ListenerConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.min_reconnect_interval_secs)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::Config("listener.channel must not be empty".to_string()));
        }
        if self.liveness_window_secs == 0 {
            return Err(Error::Config(
                "listener.liveness_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.min_reconnect_interval_secs == 0 {
            return Err(Error::Config(
                "listener.min_reconnect_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "listener.probe_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.min_reconnect_interval_secs > self.max_reconnect_interval_secs {
            return Err(Error::Config(format!(
                "listener.min_reconnect_interval_secs ({}) exceeds max_reconnect_interval_secs ({})",
                self.min_reconnect_interval_secs, self.max_reconnect_interval_secs
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PG_NOTIFY_RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.postgres.url.is_none() && self.postgres.database.is_empty() {
            return Err(Error::Config("postgres.database must not be empty".to_string()));
        }
        if self.postgres.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "postgres.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.listener.validate()
    }

    pub fn postgres_url(&self) -> String {
        if let Some(url) = &self.postgres.url {
            return url.clone();
        }

        format!(
            "postgres://{}:{}@{}:{}/{}?connect_timeout={}",
            self.postgres.username,
            self.postgres.password,
            self.postgres.host,
            self.postgres.port,
            self.postgres.database,
            self.postgres.connect_timeout_secs
        )
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_liveness_window_secs() -> u64 {
    15
}

fn default_min_reconnect_interval_secs() -> u64 {
    10
}

fn default_max_reconnect_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}
