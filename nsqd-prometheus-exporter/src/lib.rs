//! Prometheus metrics exporter for nsqd.
//!
//! This crate polls the nsqd `/stats` HTTP API on a fixed interval and
//! exposes topic and channel statistics via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │      nsqd       │────>│     Poller      │────>│    Registry     │
//! │ (/stats?json)   │     │ (fetch/project) │     │   (gauges)      │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────▼────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! When a topic or channel seen in the previous poll is missing from the
//! current one, or a live one changes its paused state, every series is
//! purged and rebuilt from the current snapshot in the same cycle. Each
//! cycle is published to the registry in one swap, so `/metrics` never
//! waits on a poll.
//!
//! # Usage
//!
//! ```bash
//! nsqd-prometheus-exporter --nsqd-url http://localhost:4151 --listen-port 30000
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod error;
pub mod exporter;
pub mod fetcher;
pub mod http;
pub mod poller;
pub mod projector;
pub mod reconcile;
pub mod registry;
pub mod stats;

pub use config::ExporterConfig;
pub use error::{ExporterError, FetchError, RegistryError};
pub use exporter::Exporter;
pub use fetcher::StatsClient;
pub use http::HttpServer;
pub use poller::{PollStatus, StatsPoller};
pub use projector::NsqdMetrics;
pub use reconcile::{Reconciler, Verdict};
pub use registry::{MetricRegistry, SharedRegistry};
pub use stats::Snapshot;
