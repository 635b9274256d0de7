//! Configuration for the nsqd exporter.
//!
//! Values are layered: built-in defaults, then an optional JSON5 file, then
//! CLI flags and environment variables. Invalid values are never fatal;
//! [`ExporterConfig::sanitize`] swaps them for defaults and reports a
//! [`ConfigWarning`] for each.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::http::{HEALTH_PATH, READY_PATH};

pub const DEFAULT_NSQD_URL: &str = "http://localhost:4151";
pub const DEFAULT_LISTEN_PORT: u16 = 30000;
pub const DEFAULT_SCRAPE_INTERVAL_SECS: i64 = 30;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Paths the metrics endpoint may not take over.
pub const RESERVED_PATHS: &[&str] = &[HEALTH_PATH, READY_PATH];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
}

/// A value that was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidNsqdUrl(String),
    InvalidListenPort(String),
    InvalidScrapeInterval(String),
    InvalidMetricsPath(String),
    InvalidLogLevel(String),
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::InvalidNsqdUrl(v) => write!(
                f,
                "Invalid nsqd URL {:?} set, continuing with default ({})",
                v, DEFAULT_NSQD_URL
            ),
            ConfigWarning::InvalidListenPort(v) => write!(
                f,
                "Invalid listen port {:?} set, continuing with default ({})",
                v, DEFAULT_LISTEN_PORT
            ),
            ConfigWarning::InvalidScrapeInterval(v) => write!(
                f,
                "Invalid scrape interval {:?} set, continuing with default ({}s)",
                v, DEFAULT_SCRAPE_INTERVAL_SECS
            ),
            ConfigWarning::InvalidMetricsPath(v) => write!(
                f,
                "Invalid metrics path {:?} set, continuing with default ({})",
                v, DEFAULT_METRICS_PATH
            ),
            ConfigWarning::InvalidLogLevel(v) => write!(
                f,
                "Invalid log level {:?} set, continuing with default ({})",
                v, DEFAULT_LOG_LEVEL
            ),
        }
    }
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Upstream nsqd settings.
    #[serde(default)]
    pub nsqd: NsqdConfig,

    /// Prometheus endpoint settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Polling settings.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream nsqd configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsqdConfig {
    /// Base URL of the nsqd HTTP API (default: "http://localhost:4151").
    #[serde(default = "default_nsqd_url")]
    pub url: String,
}

fn default_nsqd_url() -> String {
    DEFAULT_NSQD_URL.to_string()
}

impl Default for NsqdConfig {
    fn default() -> Self {
        Self {
            url: default_nsqd_url(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0").
    #[serde(default = "default_listen_host")]
    pub listen_host: IpAddr,

    /// Port to listen on (default: 30000).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            path: default_path(),
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Seconds between the end of one poll and the start of the next (default: 30).
    #[serde(default = "default_interval")]
    pub interval_secs: i64,
}

fn default_interval() -> i64 {
    DEFAULT_SCRAPE_INTERVAL_SECS
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Raw values from CLI flags or environment variables.
///
/// Kept as strings so unparsable input can be coerced instead of rejected.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub nsqd_url: Option<String>,
    pub listen_port: Option<String>,
    pub scrape_interval: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Apply CLI/environment overrides, then sanitize.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Some(url) = overrides.nsqd_url {
            self.nsqd.url = url;
        }

        if let Some(port) = overrides.listen_port {
            match port.trim().parse::<u16>() {
                Ok(p) => self.prometheus.listen_port = p,
                Err(_) => {
                    warnings.push(ConfigWarning::InvalidListenPort(port));
                    self.prometheus.listen_port = DEFAULT_LISTEN_PORT;
                }
            }
        }

        if let Some(interval) = overrides.scrape_interval {
            match interval.trim().parse::<i64>() {
                Ok(secs) => self.scrape.interval_secs = secs,
                Err(_) => {
                    warnings.push(ConfigWarning::InvalidScrapeInterval(interval));
                    self.scrape.interval_secs = DEFAULT_SCRAPE_INTERVAL_SECS;
                }
            }
        }

        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }

        warnings.extend(self.sanitize());
        warnings
    }

    /// Replace invalid values with their defaults.
    pub fn sanitize(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match normalize_url(&self.nsqd.url) {
            Some(url) => self.nsqd.url = url,
            None => {
                warnings.push(ConfigWarning::InvalidNsqdUrl(self.nsqd.url.clone()));
                self.nsqd.url = default_nsqd_url();
            }
        }

        if self.prometheus.listen_port == 0 {
            warnings.push(ConfigWarning::InvalidListenPort("0".to_string()));
            self.prometheus.listen_port = DEFAULT_LISTEN_PORT;
        }

        if self.scrape.interval_secs < 1 {
            warnings.push(ConfigWarning::InvalidScrapeInterval(
                self.scrape.interval_secs.to_string(),
            ));
            self.scrape.interval_secs = DEFAULT_SCRAPE_INTERVAL_SECS;
        }

        let path = self.prometheus.path.as_str();
        if !path.starts_with('/') || RESERVED_PATHS.contains(&path.trim_end_matches('/')) {
            warnings.push(ConfigWarning::InvalidMetricsPath(
                self.prometheus.path.clone(),
            ));
            self.prometheus.path = default_path();
        }

        if EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(ConfigWarning::InvalidLogLevel(self.logging.level.clone()));
            self.logging.level = default_log_level();
        }

        warnings
    }

    /// Socket address of the metrics endpoint.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.prometheus.listen_host, self.prometheus.listen_port)
    }

    /// Pause between poll cycles.
    pub fn scrape_interval(&self) -> Duration {
        let secs = if self.scrape.interval_secs < 1 {
            DEFAULT_SCRAPE_INTERVAL_SECS
        } else {
            self.scrape.interval_secs
        };
        Duration::from_secs(secs.unsigned_abs())
    }
}

/// Trim and validate an nsqd base URL. `None` if unusable.
fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    Some(trimmed.to_string())
}
