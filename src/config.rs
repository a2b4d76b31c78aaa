//! Configuration of the session manager.
//!
//! The configuration is read from a YAML file, then overridden by environment
//! variables prefixed with `RONRON_`, nested keys being separated by `__`.
//! Every key has a default except `bridge.command`.
//!
//! ```yaml
//! # SQLite database holding credentials, keys and the message log
//! database: "ronron.db"
//!
//! bridge:
//!   # Program speaking the messaging protocol
//!   command: "node"
//!   args: ["bridge/index.js"]
//!   env:
//!     BRIDGE_LOG: "warn"
//!   request_timeout_secs: 30
//!
//! session:
//!   # Chat receiving the online message, the account itself when unset
//!   notify_recipient: "33600000000@s.whatsapp.net"
//!   online_message: "ronron is online"
//!
//! reconnect:
//!   base_delay_ms: 500
//!   max_delay_ms: 60000
//!   jitter_ms: 250
//!   reset_after_secs: 60
//!
//! dispatch:
//!   max_in_flight: 64
//!   task_timeout_secs: 60
//!
//! metadata:
//!   refresh_interval_secs: 300
//!   persist: true
//!
//! commands:
//!   prefix: "ronron"
//! ```
//!
//! ```bash
//! export RONRON_BRIDGE__COMMAND="/usr/local/bin/wa-bridge"
//! export RONRON_RECONNECT__BASE_DELAY_MS=0
//! ```

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    events::DispatchSettings,
    session::{BackoffPolicy, SessionSettings},
    transport::bridge::BridgeSettings,
};

/// Prefix of the environment variables overriding the file.
const ENV_PREFIX: &str = "RONRON_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite database
    pub database: String,
    pub bridge: Bridge,
    pub session: Session,
    pub reconnect: Reconnect,
    pub dispatch: Dispatch,
    pub metadata: Metadata,
    pub commands: Commands,
}

/// Bridge process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bridge {
    /// Program to spawn
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment variables of the bridge process
    pub env: HashMap<String, String>,
    /// Maximum wait for the answer to one request
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub notify_recipient: Option<String>,
    pub online_message: String,
}

/// Backoff between two session attempts.
///
/// With `base_delay_ms` set to 0, sessions are restarted right away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reconnect {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// A session open this long resets the backoff
    pub reset_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dispatch {
    /// Maximum number of message tasks running at once
    pub max_in_flight: usize,
    pub task_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub refresh_interval_secs: u64,
    /// Keep the group roster in the database across restarts
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commands {
    /// Command name the bot answers to, `ronron` for `!ronron help`
    pub prefix: String,
}

impl Default for Bridge {
    fn default() -> Self {
        Bridge {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session {
            notify_recipient: None,
            online_message: "ronron is online".to_string(),
        }
    }
}

impl Default for Reconnect {
    fn default() -> Self {
        Reconnect {
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter_ms: 250,
            reset_after_secs: 60,
        }
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch {
            max_in_flight: 64,
            task_timeout_secs: 60,
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            refresh_interval_secs: 300,
            persist: true,
        }
    }
}

impl Default for Commands {
    fn default() -> Self {
        Commands {
            prefix: "ronron".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration file and applies the environment overrides.
    ///
    /// # Arguments
    ///
    /// * `path` - YAML file, a missing file leaves the defaults
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be parsed or when a value is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.command.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge.command is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid("database cannot be empty".to_string()));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.metadata.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "metadata.refresh_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.commands.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("commands.prefix cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            command: self.bridge.command.clone(),
            args: self.bridge.args.clone(),
            env: self.bridge.env.clone(),
            request_timeout: Duration::from_secs(self.bridge.request_timeout_secs),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            notify_recipient: self.session.notify_recipient.clone(),
            online_message: self.session.online_message.clone(),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.reconnect.base_delay_ms),
            max: Duration::from_millis(self.reconnect.max_delay_ms),
            jitter: Duration::from_millis(self.reconnect.jitter_ms),
            reset_after: Duration::from_secs(self.reconnect.reset_after_secs),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_in_flight: self.dispatch.max_in_flight,
            task_timeout: Duration::from_secs(self.dispatch.task_timeout_secs),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metadata.refresh_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: "ronron.db".to_string(),
            bridge: Bridge::default(),
            session: Session::default(),
            reconnect: Reconnect::default(),
            dispatch: Dispatch::default(),
            metadata: Metadata::default(),
            commands: Commands::default(),
        }
    }
}
