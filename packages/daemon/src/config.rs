//! Worker configuration read from the environment.

use std::time::Duration;

use worker::{DEFAULT_BACKEND_TIMEOUT, HostIdentity};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Broker endpoint, credentials and queue names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub queue: String,
    /// Probe queue of the heartbeat side-channel.
    pub ping: Option<String>,
    /// Response queue of the heartbeat side-channel.
    pub pong: Option<String>,
}

impl RabbitConfig {
    /// Both heartbeat queues, when the side-channel is enabled.
    pub fn heartbeat_queues(&self) -> Option<(&str, &str)> {
        Some((self.ping.as_deref()?, self.pong.as_deref()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    /// - `LOG_LEVEL` (default: `info`)
    /// - `LOG_FORMAT` (`json` or `pretty`, default: `pretty`)
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let level = lookup("LOG_LEVEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "info".to_string());
        let format = match lookup("LOG_FORMAT").and_then(non_empty) {
            Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self { level, format }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub rabbit: RabbitConfig,
    /// Prefetch limit and in-flight job ceiling.
    pub concurrency: u16,
    pub host: HostIdentity,
    pub backend_timeout: Duration,
}

impl WorkerConfig {
    /// Read the worker configuration from environment variables.
    ///
    /// - `RABBIT_HOST` (default: `localhost`), `RABBIT_PORT` (default: `5672`)
    /// - `RABBIT_USER`, `RABBIT_PASSWORD` (default: `guest`)
    /// - `RABBIT_QUEUE` (required)
    /// - `RABBIT_PING`, `RABBIT_PONG` (heartbeat runs only when both are set)
    /// - `CONCURRENCY` (default: `1`)
    /// - `HOST_NAME` (default: `unknown`), `HOST_TYPE` (default: `worker`)
    /// - `BACKEND_TIMEOUT_SECS` (default: `120`)
    ///
    /// Object-store credentials are read by `storage::ObjectStoreConfig`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).and_then(non_empty);
        let or = |var: &str, default: &str| get(var).unwrap_or_else(|| default.to_string());

        let rabbit = RabbitConfig {
            host: or("RABBIT_HOST", "localhost"),
            port: parse_var(&lookup, "RABBIT_PORT")?.unwrap_or(5672),
            user: or("RABBIT_USER", "guest"),
            password: or("RABBIT_PASSWORD", "guest"),
            queue: get("RABBIT_QUEUE").ok_or(ConfigError::Missing("RABBIT_QUEUE"))?,
            ping: get("RABBIT_PING"),
            pong: get("RABBIT_PONG"),
        };

        let concurrency: u16 = parse_var(&lookup, "CONCURRENCY")?.unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let backend_timeout = parse_var::<u64>(&lookup, "BACKEND_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BACKEND_TIMEOUT);

        Ok(Self {
            rabbit,
            concurrency,
            host: HostIdentity {
                name: or("HOST_NAME", "unknown"),
                kind: or("HOST_TYPE", "worker"),
            },
            backend_timeout,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var).and_then(non_empty) else {
        return Ok(None);
    };
    value
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}
