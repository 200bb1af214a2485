// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::decoder::DEFAULT_MAX_FRAME_LENGTH;
use crate::decorator::FieldDecorator;
use crate::errors::ConfigError;

pub const HOST_VAR: &str = "LOGBACK_INGEST_HOST";
pub const PORT_VAR: &str = "LOGBACK_INGEST_PORT";
pub const DATA_TIMEOUT_VAR: &str = "LOGBACK_INGEST_DATA_TIMEOUT";
pub const MODE_VAR: &str = "LOGBACK_INGEST_MODE";
pub const ADD_FIELDS_VAR: &str = "LOGBACK_INGEST_ADD_FIELDS";
pub const RECONNECT_DELAY_VAR: &str = "LOGBACK_INGEST_RECONNECT_DELAY_MS";
pub const RECONNECT_MAX_DELAY_VAR: &str = "LOGBACK_INGEST_RECONNECT_MAX_DELAY_MS";
pub const MAX_FRAME_BYTES_VAR: &str = "LOGBACK_INGEST_MAX_FRAME_BYTES";
pub const LOG_LEVEL_VAR: &str = "LOGBACK_INGEST_LOG_LEVEL";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DATA_TIMEOUT_SECS: i64 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Whether the ingester accepts connections or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Server,
    Client,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "client" => Ok(Mode::Client),
            _ => Err("expected `server` or `client`".to_string()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Server => write!(f, "server"),
            Mode::Client => write!(f, "client"),
        }
    }
}

/// Ingester configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on (server) or connect to (client)
    pub host: String,
    /// Port to listen on (server) or connect to (client)
    pub port: u16,
    /// Idle read timeout; `None` never times out
    pub data_timeout: Option<Duration>,
    pub mode: Mode,
    /// Static fields added to every event
    pub add_fields: FieldDecorator,
    /// Client mode: first delay between connection attempts
    pub reconnect_delay: Duration,
    /// Client mode: upper bound for the doubling reconnect delay
    pub reconnect_max_delay: Duration,
    /// Largest single serialized object accepted from a peer
    pub max_frame_length: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            data_timeout: data_timeout_from_secs(DEFAULT_DATA_TIMEOUT_SECS),
            mode: Mode::Server,
            add_fields: FieldDecorator::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            log_level: "info".to_string(),
        }
    }
}

/// Converts a timeout in seconds; any negative value disables the timeout.
#[must_use]
pub fn data_timeout_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs).ok().map(Duration::from_secs)
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var(HOST_VAR).unwrap_or(defaults.host);
        let port = parse_var::<u16>(PORT_VAR)?.ok_or(ConfigError::Missing(PORT_VAR))?;
        if port == 0 {
            return Err(ConfigError::Invalid {
                name: PORT_VAR,
                value: port.to_string(),
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        let data_timeout = parse_var::<i64>(DATA_TIMEOUT_VAR)?
            .map_or(defaults.data_timeout, data_timeout_from_secs);
        let mode = parse_var::<Mode>(MODE_VAR)?.unwrap_or(defaults.mode);
        let add_fields = env::var(ADD_FIELDS_VAR)
            .map(|val| FieldDecorator::from_field_string(&val))
            .unwrap_or_default();
        let reconnect_delay = parse_var::<u64>(RECONNECT_DELAY_VAR)?
            .map_or(defaults.reconnect_delay, Duration::from_millis);
        let reconnect_max_delay = parse_var::<u64>(RECONNECT_MAX_DELAY_VAR)?
            .map_or(defaults.reconnect_max_delay, Duration::from_millis);
        let max_frame_length =
            parse_var::<usize>(MAX_FRAME_BYTES_VAR)?.unwrap_or(defaults.max_frame_length);
        let log_level = env::var(LOG_LEVEL_VAR)
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            host,
            port,
            data_timeout,
            mode,
            add_fields,
            reconnect_delay,
            reconnect_max_delay,
            max_frame_length,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: HOST_VAR,
                value: self.host.clone(),
                reason: "host cannot be empty".to_string(),
            });
        }

        // Port 0 asks the OS for an ephemeral listening port, which only makes sense in server mode.
        if self.mode == Mode::Client && self.port == 0 {
            return Err(ConfigError::Invalid {
                name: PORT_VAR,
                value: self.port.to_string(),
                reason: "client mode needs a non-zero port".to_string(),
            });
        }

        if self.reconnect_max_delay < self.reconnect_delay {
            return Err(ConfigError::Invalid {
                name: RECONNECT_MAX_DELAY_VAR,
                value: self.reconnect_max_delay.as_millis().to_string(),
                reason: "must not be smaller than the reconnect delay".to_string(),
            });
        }

        if self.max_frame_length == 0 {
            return Err(ConfigError::Invalid {
                name: MAX_FRAME_BYTES_VAR,
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                name: LOG_LEVEL_VAR,
                value: self.log_level.clone(),
                reason: "must be one of: trace, debug, info, warn, error".to_string(),
            });
        }

        Ok(())
    }

    /// `host:port` to bind or dial.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
