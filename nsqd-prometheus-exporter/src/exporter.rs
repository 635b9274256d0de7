//! Wiring of the poll loop and the metrics server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::fetcher::StatsClient;
use crate::http::HttpServer;
use crate::poller::{SharedPollStatus, StatsPoller};
use crate::projector::NsqdMetrics;
use crate::registry::{MetricRegistry, SharedRegistry};

/// How long stopped tasks get to wind down.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bound exporter, ready to poll and serve.
pub struct Exporter {
    poller: StatsPoller,
    server: HttpServer,
    registry: SharedRegistry,
}

impl Exporter {
    /// Declare the metric catalogue and bind the metrics listener.
    ///
    /// Nothing is fetched from nsqd until [`Exporter::run`].
    pub async fn bind(config: &ExporterConfig) -> Result<Self> {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = NsqdMetrics::declare(&registry, env!("CARGO_PKG_VERSION"))?;

        let poller = StatsPoller::new(
            StatsClient::new(&config.nsqd.url),
            registry.clone(),
            metrics,
            config.scrape_interval(),
        );

        let server = HttpServer::bind(
            registry.clone(),
            poller.status(),
            config.listen_addr(),
            &config.prometheus.path,
        )
        .await?;

        Ok(Self {
            poller,
            server,
            registry,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn status(&self) -> SharedPollStatus {
        self.poller.status()
    }

    /// Poll and serve until a task fails or `shutdown` flips to `true`.
    ///
    /// Either way both tasks are stopped and the listener is closed before
    /// this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            poller,
            server,
            registry,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut poller_task = tokio::spawn(poller.run(stop_rx.clone()));
        let mut server_task = tokio::spawn(server.run(stop_rx));

        let outcome = tokio::select! {
            result = &mut poller_task => result.map_err(ExporterError::from).and_then(|r| r),
            result = &mut server_task => match result {
                Ok(Ok(())) => Err(ExporterError::ServerExited),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            },
            _ = wait_for_shutdown(&mut shutdown) => Ok(()),
        };

        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            if !poller_task.is_finished() {
                let _ = (&mut poller_task).await;
            }
            if !server_task.is_finished() {
                let _ = (&mut server_task).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Tasks did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            poller_task.abort();
            server_task.abort();
        }

        info!(series_count = registry.series_count(), "Exporter stopped");
        outcome
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone without a signal; keep running.
            std::future::pending::<()>().await;
        }
    }
}
