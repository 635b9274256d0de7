//! Error types for the exporter.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised while fetching and decoding nsqd stats.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, connect, reset, ...).
    #[error("HTTP request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// nsqd answered with something other than 200 OK.
    #[error("nsqd returned HTTP status {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// A legacy envelope decoded fine but carried an error status.
    #[error("nsqd reported status {code} ({text})")]
    Upstream { code: i64, text: String },

    /// The body was neither a legacy envelope nor a root-level stats document.
    #[error("Failed to decode nsqd stats: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }
}

/// Errors raised by the metric registry.
///
/// These indicate a mismatch between the metric catalogue and the code
/// writing to it, never a runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A series was declared twice with different label names.
    #[error("Metric {name} already declared with labels {existing:?}, got {requested:?}")]
    SchemaMismatch {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    /// A write supplied the wrong number of label values.
    #[error("Metric {name} expects {expected} label values, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A handle that does not belong to this registry.
    #[error("Unknown metric handle {0}")]
    UnknownHandle(usize),
}

/// Fatal errors that stop the exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Polling nsqd failed; the process is expected to be restarted externally.
    #[error("Error scraping stats from nsqd: {0}")]
    Fetch(#[from] FetchError),

    /// The metric catalogue and the registry disagree.
    #[error("Metric registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The metrics listener could not be bound.
    #[error("Failed to bind metrics listener to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The metrics server stopped with an I/O error.
    #[error("Metrics server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The metrics server returned without being asked to stop.
    #[error("Metrics server exited unexpectedly")]
    ServerExited,

    /// A background task panicked or was cancelled.
    #[error("Exporter task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_wraps_into_exporter_error() {
        let err: ExporterError = FetchError::Upstream {
            code: 500,
            text: "INTERNAL_ERROR".to_string(),
        }
        .into();

        let message = err.to_string();
        assert!(message.starts_with("Error scraping stats from nsqd"));
        assert!(message.contains("500"));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::LabelArity {
            name: "nsqd_depth".to_string(),
            expected: 4,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "Metric nsqd_depth expects 4 label values, got 3"
        );
    }
}
