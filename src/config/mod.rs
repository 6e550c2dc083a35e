//! Typed configuration from an optional TOML file and environment variables.
//!
//! Loads once at startup, fails fast if required values are missing.
//! Environment variables override the file. The database URL is wrapped in
//! `secrecy::SecretString` so credentials stay out of logs.

use crate::engine::DispatchConfig;
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Names the TOML file to read before applying environment overrides.
pub const CONFIG_PATH_VAR: &str = "QUERYD_CONFIG";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub workers: usize,
    pub queue_capacity: usize,
    pub port: u16,
    /// Prefix reported in paginated listings.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Upper bound on how long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,
    /// Log every inbound HTTP request.
    pub http_log: bool,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// File layer. Every key is optional; the environment can supply the rest.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    database_url: Option<String>,
    max_workers: Option<usize>,
    max_queue: Option<usize>,
    port: Option<u16>,
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    http_log: Option<bool>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration: the file named by `QUERYD_CONFIG` (if set), then
    /// environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load() -> Result<Self> {
        let file = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("cannot read config file {path}: {e}"))
            })?),
            Err(_) => None,
        };
        Self::from_sources(file.as_deref(), |name| std::env::var(name).ok())
    }

    /// Merge a TOML document (lower precedence) with a variable lookup.
    pub fn from_sources(toml_src: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file: FileConfig = match toml_src {
            Some(src) => toml::from_str(src)
                .map_err(|e| Error::Config(format!("bad config file: {e}")))?,
            None => FileConfig::default(),
        };

        let database_url = lookup("DATABASE_URL")
            .or(file.database_url)
            .ok_or_else(|| missing("DATABASE_URL"))?;

        let workers = positive("MAX_WORKERS", parsed(&lookup, "MAX_WORKERS")?.or(file.max_workers))?;
        let queue_capacity = positive("MAX_QUEUE", parsed(&lookup, "MAX_QUEUE")?.or(file.max_queue))?;

        let port = parsed(&lookup, "PORT")?.or(file.port).unwrap_or(8080);
        let request_timeout = parsed(&lookup, "REQUEST_TIMEOUT_SECS")?
            .or(file.request_timeout_secs)
            .unwrap_or(10);
        let shutdown_timeout = parsed(&lookup, "SHUTDOWN_TIMEOUT_SECS")?
            .or(file.shutdown_timeout_secs)
            .unwrap_or(5);
        let http_log = match lookup("HTTP_LOG") {
            Some(raw) => parse_flag("HTTP_LOG", &raw)?,
            None => file.http_log.unwrap_or(false),
        };

        Ok(Self {
            database_url: SecretString::from(database_url),
            workers,
            queue_capacity,
            port,
            base_url: lookup("BASE_URL").or(file.base_url).unwrap_or_default(),
            request_timeout: Duration::from_secs(request_timeout),
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
            http_log,
            otel_endpoint: lookup("OTEL_ENDPOINT").or(file.otel_endpoint),
            log_level: lookup("LOG_LEVEL")
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Engine sizing derived from this configuration.
    pub fn dispatch(&self) -> Result<DispatchConfig> {
        DispatchConfig::new(self.workers, self.queue_capacity)
    }
}

fn missing(name: &str) -> Error {
    Error::Config(format!("required setting {name} is not set"))
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}")))
        })
        .transpose()
}

fn positive(name: &str, value: Option<usize>) -> Result<usize> {
    match value {
        Some(0) => Err(Error::Config(format!("{name} must be a positive integer"))),
        Some(n) => Ok(n),
        None => Err(missing(name)),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("invalid {name}={raw:?}: expected a boolean"))),
    }
}
