//! Mapping from an nsqd [`Snapshot`] to gauge series.
//!
//! Topic and channel series share the label names `type`, `topic`,
//! `paused` and `channel`. Channel series are always labeled with their
//! owning topic, so same-named channels on different topics stay distinct.

use crate::error::RegistryError;
use crate::registry::{GaugeHandle, MetricRegistry, RegistryWriter};
use crate::stats::{Channel, Snapshot, Topic};

/// Labels shared by topic and channel series.
pub const ENTITY_LABELS: &[&str] = &["type", "topic", "paused", "channel"];

/// Labels of the `nsqd_info` series.
pub const INFO_LABELS: &[&str] = &["health", "start_time", "version"];

pub const BUILD_INFO_METRIC: &str = "nsqd_prometheus_exporter_build_info";
pub const INFO_METRIC: &str = "nsqd_info";
pub const DEPTH_METRIC: &str = "nsqd_depth";
pub const BACKEND_DEPTH_METRIC: &str = "nsqd_backend_depth";
pub const IN_FLIGHT_METRIC: &str = "nsqd_in_flight_count";
pub const TIMEOUT_COUNT_METRIC: &str = "nsqd_timeout_count_total";
pub const REQUEUE_COUNT_METRIC: &str = "nsqd_requeue_count_total";
pub const DEFERRED_COUNT_METRIC: &str = "nsqd_deferred_count_total";
pub const MESSAGE_COUNT_METRIC: &str = "nsqd_message_count_total";
pub const CLIENT_COUNT_METRIC: &str = "nsqd_client_count";
pub const CHANNEL_COUNT_METRIC: &str = "nsqd_channel_count";

const TOPIC_TYPE: &str = "topic";
const CHANNEL_TYPE: &str = "channel";

/// Render a paused flag as the literal label text.
pub fn paused_label(paused: bool) -> &'static str {
    if paused { "true" } else { "false" }
}

/// Handles to every series the exporter writes.
#[derive(Debug, Clone)]
pub struct NsqdMetrics {
    version: String,
    pub build_info: GaugeHandle,
    pub info: GaugeHandle,
    pub depth: GaugeHandle,
    pub backend_depth: GaugeHandle,
    pub in_flight: GaugeHandle,
    pub timeout_count: GaugeHandle,
    pub requeue_count: GaugeHandle,
    pub deferred_count: GaugeHandle,
    pub message_count: GaugeHandle,
    pub client_count: GaugeHandle,
    pub channel_count: GaugeHandle,
}

impl NsqdMetrics {
    /// Declare the full catalogue on `registry`.
    ///
    /// `version` is the exporter's own version, reported by the build-info series.
    pub fn declare(registry: &MetricRegistry, version: &str) -> Result<Self, RegistryError> {
        let entity = |name: &str, help: &str| registry.declare(name, help, ENTITY_LABELS);

        Ok(Self {
            version: version.to_string(),
            build_info: registry.declare(
                BUILD_INFO_METRIC,
                "nsqd-prometheus-exporter build info",
                &["version"],
            )?,
            info: registry.declare(INFO_METRIC, "nsqd info", INFO_LABELS)?,
            depth: entity(DEPTH_METRIC, "Queue depth")?,
            backend_depth: entity(BACKEND_DEPTH_METRIC, "Queue backend depth")?,
            in_flight: entity(IN_FLIGHT_METRIC, "In flight count")?,
            timeout_count: entity(TIMEOUT_COUNT_METRIC, "Timeout count")?,
            requeue_count: entity(REQUEUE_COUNT_METRIC, "Requeue count")?,
            deferred_count: entity(DEFERRED_COUNT_METRIC, "Deferred count")?,
            message_count: entity(MESSAGE_COUNT_METRIC, "Total message count")?,
            client_count: entity(CLIENT_COUNT_METRIC, "Number of clients")?,
            channel_count: entity(CHANNEL_COUNT_METRIC, "Number of channels")?,
        })
    }

    /// Write every value derived from `snapshot`.
    ///
    /// Returns the number of values written.
    pub fn project(
        &self,
        writer: &mut RegistryWriter<'_>,
        snapshot: &Snapshot,
    ) -> Result<usize, RegistryError> {
        let mut written = 0;

        writer.set(self.build_info, &[self.version.as_str()], 1.0)?;
        let start_time = snapshot.start_time.to_string();
        writer.set(
            self.info,
            &[
                snapshot.health.as_str(),
                start_time.as_str(),
                snapshot.version.as_str(),
            ],
            1.0,
        )?;
        written += 2;

        for topic in &snapshot.topics {
            written += self.project_topic(writer, topic)?;
            for channel in &topic.channels {
                written += self.project_channel(writer, topic, channel)?;
            }
        }

        Ok(written)
    }

    fn project_topic(
        &self,
        writer: &mut RegistryWriter<'_>,
        topic: &Topic,
    ) -> Result<usize, RegistryError> {
        let labels = [
            TOPIC_TYPE,
            topic.name.as_str(),
            paused_label(topic.paused),
            "",
        ];
        let values = [
            (self.depth, topic.depth as f64),
            (self.backend_depth, topic.backend_depth as f64),
            (self.channel_count, topic.channels.len() as f64),
        ];

        for (handle, value) in values {
            writer.set(handle, &labels, value)?;
        }
        Ok(values.len())
    }

    fn project_channel(
        &self,
        writer: &mut RegistryWriter<'_>,
        topic: &Topic,
        channel: &Channel,
    ) -> Result<usize, RegistryError> {
        let labels = [
            CHANNEL_TYPE,
            topic.name.as_str(),
            paused_label(channel.paused),
            channel.name.as_str(),
        ];
        let values = [
            (self.depth, channel.depth as f64),
            (self.backend_depth, channel.backend_depth as f64),
            (self.in_flight, channel.in_flight_count as f64),
            (self.timeout_count, channel.timeout_count as f64),
            (self.requeue_count, channel.requeue_count as f64),
            (self.deferred_count, channel.deferred_count as f64),
            (self.message_count, channel.message_count as f64),
            (self.client_count, channel.clients.len() as f64),
        ];

        for (handle, value) in values {
            writer.set(handle, &labels, value)?;
        }
        Ok(values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Client;

    fn channel(name: &str, paused: bool, depth: i64, clients: usize) -> Channel {
        Channel {
            name: name.to_string(),
            paused,
            depth,
            backend_depth: 1,
            message_count: 100,
            in_flight_count: 2,
            deferred_count: 3,
            requeue_count: 4,
            timeout_count: 5,
            clients: vec![Client::default(); clients],
        }
    }

    fn topic(name: &str, paused: bool, channels: Vec<Channel>) -> Topic {
        Topic {
            name: name.to_string(),
            paused,
            depth: 10,
            backend_depth: 20,
            message_count: 30,
            channels,
        }
    }

    fn snapshot(topics: Vec<Topic>) -> Snapshot {
        Snapshot {
            version: "1.2.1".to_string(),
            health: "OK".to_string(),
            start_time: 1_700_000_000,
            topics,
        }
    }

    fn setup() -> (MetricRegistry, NsqdMetrics) {
        let registry = MetricRegistry::new();
        let metrics = NsqdMetrics::declare(&registry, "0.2.0").unwrap();
        (registry, metrics)
    }

    fn project(registry: &MetricRegistry, metrics: &NsqdMetrics, snapshot: &Snapshot) -> usize {
        let mut writer = registry.write();
        let written = metrics.project(&mut writer, snapshot).unwrap();
        writer.publish();
        written
    }

    #[test]
    fn test_declare_twice_reuses_handles() {
        let (registry, metrics) = setup();
        let again = NsqdMetrics::declare(&registry, "0.2.0").unwrap();

        assert_eq!(metrics.depth, again.depth);
        assert_eq!(registry.declared_count(), 11);
    }

    #[test]
    fn test_project_info_series() {
        let (registry, metrics) = setup();
        project(&registry, &metrics, &snapshot(vec![]));

        assert_eq!(
            registry.value(metrics.info, &["OK", "1700000000", "1.2.1"]),
            Some(1.0)
        );
        assert_eq!(registry.value(metrics.build_info, &["0.2.0"]), Some(1.0));
    }

    #[test]
    fn test_project_topic_series() {
        let (registry, metrics) = setup();
        let s = snapshot(vec![topic("orders", true, vec![channel("a", false, 1, 0)])]);
        project(&registry, &metrics, &s);

        let labels = ["topic", "orders", "true", ""];
        assert_eq!(registry.value(metrics.depth, &labels), Some(10.0));
        assert_eq!(registry.value(metrics.backend_depth, &labels), Some(20.0));
        assert_eq!(registry.value(metrics.channel_count, &labels), Some(1.0));
        assert_eq!(registry.value(metrics.in_flight, &labels), None);
    }

    #[test]
    fn test_project_channel_series() {
        let (registry, metrics) = setup();
        let s = snapshot(vec![topic("orders", false, vec![channel("worker", true, 7, 3)])]);
        let written = project(&registry, &metrics, &s);

        assert_eq!(written, 2 + 3 + 8);

        let labels = ["channel", "orders", "true", "worker"];
        assert_eq!(registry.value(metrics.depth, &labels), Some(7.0));
        assert_eq!(registry.value(metrics.backend_depth, &labels), Some(1.0));
        assert_eq!(registry.value(metrics.in_flight, &labels), Some(2.0));
        assert_eq!(registry.value(metrics.deferred_count, &labels), Some(3.0));
        assert_eq!(registry.value(metrics.requeue_count, &labels), Some(4.0));
        assert_eq!(registry.value(metrics.timeout_count, &labels), Some(5.0));
        assert_eq!(registry.value(metrics.message_count, &labels), Some(100.0));
        assert_eq!(registry.value(metrics.client_count, &labels), Some(3.0));
    }

    #[test]
    fn test_same_channel_name_on_two_topics() {
        let (registry, metrics) = setup();
        let s = snapshot(vec![
            topic("a", false, vec![channel("retry", false, 1, 0)]),
            topic("b", false, vec![channel("retry", false, 2, 0)]),
        ]);
        project(&registry, &metrics, &s);

        assert_eq!(
            registry.value(metrics.depth, &["channel", "a", "false", "retry"]),
            Some(1.0)
        );
        assert_eq!(
            registry.value(metrics.depth, &["channel", "b", "false", "retry"]),
            Some(2.0)
        );
    }

    #[test]
    fn test_project_is_idempotent() {
        let (registry, metrics) = setup();
        let s = snapshot(vec![
            topic("orders", false, vec![channel("worker", false, 5, 1)]),
            topic("events", true, vec![]),
        ]);

        project(&registry, &metrics, &s);
        let first = registry.render();
        let first_count = registry.series_count();

        project(&registry, &metrics, &s);

        assert_eq!(registry.render(), first);
        assert_eq!(registry.series_count(), first_count);
    }

    #[test]
    fn test_paused_rendered_as_text() {
        let (registry, metrics) = setup();
        let s = snapshot(vec![
            topic("paused", true, vec![]),
            topic("running", false, vec![]),
        ]);
        project(&registry, &metrics, &s);

        let output = registry.render();
        assert!(output.contains("topic=\"paused\",paused=\"true\""));
        assert!(output.contains("topic=\"running\",paused=\"false\""));
        assert!(!output.contains("paused=\"1\""));
        assert!(!output.contains("paused=\"0\""));
    }

    #[test]
    fn test_paused_label() {
        assert_eq!(paused_label(true), "true");
        assert_eq!(paused_label(false), "false");
    }
}
