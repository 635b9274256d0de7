//! nsqd polling loop.
//!
//! Each cycle fetches a snapshot, reconciles its entity keys against the
//! previous cycle, then stages an optional purge plus the new values and
//! publishes them in one swap. Cycles never overlap: the loop sleeps for the
//! full interval after a cycle finishes, so a slow nsqd delays the next cycle
//! instead of stacking them.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetcher::StatsClient;
use crate::projector::NsqdMetrics;
use crate::reconcile::{Churn, EntityKeys, Reconciler, Verdict};
use crate::registry::SharedRegistry;
use crate::stats::{ResponseShape, Snapshot};

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollState {
    /// Between cycles.
    #[default]
    Idle,
    /// A cycle is executing.
    Polling,
}

/// Progress of the poll loop, shared with the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct PollStatus {
    pub state: PollState,
    /// Cycles whose values were committed to the registry.
    pub cycles_completed: u64,
    /// Cycles that purged the registry because of churn.
    pub registry_resets: u64,
    pub last_shape: Option<ResponseShape>,
    pub last_success: Option<SystemTime>,
}

impl PollStatus {
    pub fn is_ready(&self) -> bool {
        self.cycles_completed > 0
    }
}

/// Create a shareable status handle.
pub type SharedPollStatus = Arc<RwLock<PollStatus>>;

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub shape: ResponseShape,
    pub topics: usize,
    pub channels: usize,
    pub values_written: usize,
    /// Present when the registry was purged before projecting.
    pub churn: Option<Churn>,
}

/// Drives fetch, reconcile and projection on a fixed pause.
pub struct StatsPoller {
    client: StatsClient,
    registry: SharedRegistry,
    metrics: NsqdMetrics,
    reconciler: Reconciler,
    interval: Duration,
    status: SharedPollStatus,
}

impl StatsPoller {
    pub fn new(
        client: StatsClient,
        registry: SharedRegistry,
        metrics: NsqdMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            metrics,
            reconciler: Reconciler::new(),
            interval,
            status: SharedPollStatus::default(),
        }
    }

    /// Handle to the poll status, for readiness checks.
    pub fn status(&self) -> SharedPollStatus {
        self.status.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Entity keys remembered from the last cycle.
    pub fn known(&self) -> &EntityKeys {
        self.reconciler.known()
    }

    /// Run one cycle.
    ///
    /// A fetch failure leaves the registry untouched and is returned as a
    /// fatal error.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        self.status.write().state = PollState::Polling;
        let result = self.cycle().await;

        let mut status = self.status.write();
        status.state = PollState::Idle;
        if let Ok(report) = &result {
            status.cycles_completed += 1;
            status.last_shape = Some(report.shape);
            status.last_success = Some(SystemTime::now());
            if report.churn.is_some() {
                status.registry_resets += 1;
            }
        }

        result
    }

    async fn cycle(&mut self) -> Result<CycleReport> {
        let (shape, snapshot) = self.client.fetch_with_shape().await?;

        let verdict = self.reconciler.reconcile(EntityKeys::from_snapshot(&snapshot));
        let (churn, values_written) = self.commit(verdict, &snapshot)?;

        Ok(CycleReport {
            shape,
            topics: snapshot.topics.len(),
            channels: snapshot.channel_count(),
            values_written,
            churn,
        })
    }

    /// Apply a verdict and project `snapshot` as one published batch.
    fn commit(
        &self,
        verdict: Verdict,
        snapshot: &Snapshot,
    ) -> Result<(Option<Churn>, usize)> {
        let mut writer = self.registry.write();

        let churn = match verdict {
            Verdict::Unchanged => None,
            Verdict::Reset(churn) => {
                log_churn(&churn);
                let removed = writer.reset_all();
                debug!(removed, "Registry reset");
                Some(churn)
            }
        };

        let written = self.metrics.project(&mut writer, snapshot)?;
        writer.publish();
        Ok((churn, written))
    }

    /// Poll until a cycle fails or `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            url = %self.client.url(),
            interval_secs = self.interval.as_secs(),
            "Starting nsqd poller"
        );

        loop {
            let report = self.poll_once().await?;

            debug!(
                shape = report.shape.as_str(),
                topics = report.topics,
                channels = report.channels,
                values = report.values_written,
                reset = report.churn.is_some(),
                "Poll cycle complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("nsqd poller stopped");
        Ok(())
    }
}

fn log_churn(churn: &Churn) {
    if churn.topic_churn() {
        warn!(
            dead_topics = ?churn.dead_topics,
            "At least one old topic no longer included in nsqd stats - rebuilding metrics"
        );
    }
    if churn.channel_churn() {
        let dead: Vec<String> = churn.dead_channels.iter().map(|c| c.to_string()).collect();
        warn!(
            dead_channels = ?dead,
            "At least one old channel no longer included in nsqd stats - rebuilding metrics"
        );
    }
    if churn.relabeled() {
        let channels: Vec<String> = churn
            .relabeled_channels
            .iter()
            .map(|c| c.to_string())
            .collect();
        info!(
            topics = ?churn.relabeled_topics,
            channels = ?channels,
            "Paused state changed - rebuilding metrics"
        );
    }
    if churn.info_changed {
        info!("nsqd health, start time or version changed - rebuilding metrics");
    }
}
