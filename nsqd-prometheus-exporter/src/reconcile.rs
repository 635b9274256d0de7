//! Detection of series that would go stale between polls.
//!
//! nsqd topologies change during normal operation. When a previously seen
//! topic or channel is gone, its series would otherwise linger with their
//! last values, so the poll loop purges the whole registry and rebuilds it
//! from the current snapshot. The same applies when a live entity's label
//! tuple moves: a paused flag flips, or nsqd restarts with a new start time.

use std::collections::BTreeSet;
use std::fmt;

use crate::stats::Snapshot;

/// Identity of a channel across polls.
///
/// Channel names are only unique within a topic, so the owning topic is
/// part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey {
    pub topic: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.channel)
    }
}

/// Label values of the daemon-wide info series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInfo {
    pub health: String,
    pub start_time: i64,
    pub version: String,
}

/// Entity names and label-bearing state observed in one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityKeys {
    pub topics: BTreeSet<String>,
    pub channels: BTreeSet<ChannelKey>,
    pub paused_topics: BTreeSet<String>,
    pub paused_channels: BTreeSet<ChannelKey>,
    pub info: Option<DaemonInfo>,
}

impl EntityKeys {
    /// Collect topic and channel keys from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut keys = Self {
            info: Some(DaemonInfo {
                health: snapshot.health.clone(),
                start_time: snapshot.start_time,
                version: snapshot.version.clone(),
            }),
            ..Self::default()
        };
        for topic in &snapshot.topics {
            keys.topics.insert(topic.name.clone());
            if topic.paused {
                keys.paused_topics.insert(topic.name.clone());
            }
            for channel in &topic.channels {
                let key = ChannelKey::new(topic.name.as_str(), channel.name.as_str());
                if channel.paused {
                    keys.paused_channels.insert(key.clone());
                }
                keys.channels.insert(key);
            }
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.channels.is_empty()
    }
}

/// Keys present in `known` but missing from `detected`.
pub fn dead_keys<T: Ord + Clone>(known: &BTreeSet<T>, detected: &BTreeSet<T>) -> Vec<T> {
    known.difference(detected).cloned().collect()
}

/// Keys alive in both polls whose paused state differs.
pub fn flipped_keys<T: Ord + Clone>(
    known: &BTreeSet<T>,
    known_paused: &BTreeSet<T>,
    detected: &BTreeSet<T>,
    detected_paused: &BTreeSet<T>,
) -> Vec<T> {
    known_paused
        .symmetric_difference(detected_paused)
        .filter(|key| known.contains(*key) && detected.contains(*key))
        .cloned()
        .collect()
}

/// Series made stale since the previous poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Churn {
    pub dead_topics: Vec<String>,
    pub dead_channels: Vec<ChannelKey>,
    /// Live topics whose paused label flipped.
    pub relabeled_topics: Vec<String>,
    /// Live channels whose paused label flipped.
    pub relabeled_channels: Vec<ChannelKey>,
    /// Health, start time or version changed.
    pub info_changed: bool,
}

impl Churn {
    pub fn topic_churn(&self) -> bool {
        !self.dead_topics.is_empty()
    }

    pub fn channel_churn(&self) -> bool {
        !self.dead_channels.is_empty()
    }

    pub fn relabeled(&self) -> bool {
        !self.relabeled_topics.is_empty() || !self.relabeled_channels.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.topic_churn() && !self.channel_churn() && !self.relabeled() && !self.info_changed
    }
}

/// What the poll loop should do with the registry before projecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every old tuple is rewritten by this poll; overwrite in place.
    Unchanged,
    /// Some old tuple would go stale; purge all series, then project.
    Reset(Churn),
}

impl Verdict {
    pub fn requires_reset(&self) -> bool {
        matches!(self, Verdict::Reset(_))
    }
}

/// Carries the entity keys seen in the previous poll.
#[derive(Debug, Default)]
pub struct Reconciler {
    known: EntityKeys,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys remembered from the last call to [`Reconciler::reconcile`].
    pub fn known(&self) -> &EntityKeys {
        &self.known
    }

    /// Compare `detected` against the previous poll and remember it.
    ///
    /// `detected` replaces the known set whatever the verdict.
    pub fn reconcile(&mut self, detected: EntityKeys) -> Verdict {
        let known = &self.known;
        let churn = Churn {
            dead_topics: dead_keys(&known.topics, &detected.topics),
            dead_channels: dead_keys(&known.channels, &detected.channels),
            relabeled_topics: flipped_keys(
                &known.topics,
                &known.paused_topics,
                &detected.topics,
                &detected.paused_topics,
            ),
            relabeled_channels: flipped_keys(
                &known.channels,
                &known.paused_channels,
                &detected.channels,
                &detected.paused_channels,
            ),
            info_changed: known.info.is_some() && known.info != detected.info,
        };
        self.known = detected;

        if churn.is_empty() {
            Verdict::Unchanged
        } else {
            Verdict::Reset(churn)
        }
    }
}
