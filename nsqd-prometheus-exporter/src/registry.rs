//! Gauge registry shared by the poll loop and the `/metrics` handler.
//!
//! Every series is a named gauge with a fixed list of label names. Values
//! are keyed by the exact label-value tuple.
//!
//! The registry is copy-on-write. A poll cycle takes a [`RegistryWriter`],
//! which stages its reset and projection on a private copy and publishes it
//! with a pointer swap. Readers clone the published `Arc` and render from
//! it without holding any lock, so a render never waits on a cycle and
//! never observes a half-applied one.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::error::RegistryError;

/// Handle to a declared gauge series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GaugeHandle(usize);

#[derive(Debug, Clone)]
struct GaugeSeries {
    name: String,
    help: String,
    label_names: Vec<String>,
    values: BTreeMap<Vec<String>, f64>,
}

impl GaugeSeries {
    fn set(&mut self, label_values: &[&str], value: f64) -> Result<(), RegistryError> {
        if label_values.len() != self.label_names.len() {
            return Err(RegistryError::LabelArity {
                name: self.name.clone(),
                expected: self.label_names.len(),
                got: label_values.len(),
            });
        }

        let key: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();
        self.values.insert(key, value);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Inner {
    series: Vec<GaugeSeries>,
    by_name: HashMap<String, usize>,
}

impl Inner {
    fn series_mut(&mut self, handle: GaugeHandle) -> Result<&mut GaugeSeries, RegistryError> {
        self.series
            .get_mut(handle.0)
            .ok_or(RegistryError::UnknownHandle(handle.0))
    }

    fn reset_all(&mut self) -> usize {
        let mut removed = 0;
        for series in &mut self.series {
            removed += series.values.len();
            series.values.clear();
        }
        removed
    }
}

/// Thread-safe registry of labeled gauges.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    /// Last published state. The lock only guards the pointer swap.
    current: RwLock<Arc<Inner>>,
    /// Serializes writers so two staged copies never race.
    writer: Mutex<()>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Inner> {
        self.current.read().clone()
    }

    fn publish(&self, next: Inner) {
        *self.current.write() = Arc::new(next);
    }

    /// Declare a gauge series.
    ///
    /// Declaring an existing name again with the same label names returns
    /// the original handle; different label names are an error.
    pub fn declare(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeHandle, RegistryError> {
        let _guard = self.writer.lock();
        let current = self.snapshot();

        if let Some(&index) = current.by_name.get(name) {
            let existing = &current.series[index].label_names;
            if existing.iter().map(String::as_str).eq(label_names.iter().copied()) {
                return Ok(GaugeHandle(index));
            }
            return Err(RegistryError::SchemaMismatch {
                name: name.to_string(),
                existing: existing.clone(),
                requested: label_names.iter().map(|l| (*l).to_string()).collect(),
            });
        }

        let mut next = (*current).clone();
        let index = next.series.len();
        next.series.push(GaugeSeries {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
            values: BTreeMap::new(),
        });
        next.by_name.insert(name.to_string(), index);
        self.publish(next);

        debug!(metric = name, labels = ?label_names, "Declared gauge");
        Ok(GaugeHandle(index))
    }

    /// Upsert a single value. Prefer [`MetricRegistry::write`] for batches.
    pub fn set(
        &self,
        handle: GaugeHandle,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), RegistryError> {
        let mut writer = self.write();
        writer.set(handle, label_values, value)?;
        writer.publish();
        Ok(())
    }

    /// Remove every label tuple from every series, keeping the declarations.
    pub fn reset_all(&self) -> usize {
        let mut writer = self.write();
        let removed = writer.reset_all();
        writer.publish();
        removed
    }

    /// Start a batch of writes on a staged copy of the registry.
    ///
    /// Nothing is visible to readers until [`RegistryWriter::publish`].
    /// Dropping the writer without publishing discards the batch. Other
    /// writers wait; readers do not.
    pub fn write(&self) -> RegistryWriter<'_> {
        let guard = self.writer.lock();
        let staged = (*self.snapshot()).clone();
        RegistryWriter {
            registry: self,
            _guard: guard,
            staged,
        }
    }

    /// Current value of one label tuple, if present.
    pub fn value(&self, handle: GaugeHandle, label_values: &[&str]) -> Option<f64> {
        let inner = self.snapshot();
        let series = inner.series.get(handle.0)?;
        let key: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();
        series.values.get(&key).copied()
    }

    /// All label tuples currently held by a series.
    pub fn label_sets(&self, handle: GaugeHandle) -> Vec<Vec<String>> {
        self.snapshot()
            .series
            .get(handle.0)
            .map(|s| s.values.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of declared series.
    pub fn declared_count(&self) -> usize {
        self.snapshot().series.len()
    }

    /// Number of label tuples across all series.
    pub fn series_count(&self) -> usize {
        self.snapshot().series.iter().map(|s| s.values.len()).sum()
    }

    /// Render all series in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let inner = self.snapshot();

        let mut series: Vec<&GaugeSeries> = inner
            .series
            .iter()
            .filter(|s| !s.values.is_empty())
            .collect();
        series.sort_by(|a, b| a.name.cmp(&b.name));

        let mut output = String::with_capacity(series.len() * 256);
        for s in series {
            writeln!(output, "# HELP {} {}", s.name, escape_help(&s.help)).ok();
            writeln!(output, "# TYPE {} gauge", s.name).ok();

            for (label_values, value) in &s.values {
                writeln!(
                    output,
                    "{}{} {}",
                    s.name,
                    format_labels(&s.label_names, label_values),
                    format_value(*value)
                )
                .ok();
            }
        }

        output
    }
}

/// A staged batch of writes for one poll cycle.
pub struct RegistryWriter<'a> {
    registry: &'a MetricRegistry,
    _guard: MutexGuard<'a, ()>,
    staged: Inner,
}

impl RegistryWriter<'_> {
    /// Upsert the value for an exact label tuple.
    pub fn set(
        &mut self,
        handle: GaugeHandle,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), RegistryError> {
        self.staged.series_mut(handle)?.set(label_values, value)
    }

    /// Remove every label tuple, returning how many were dropped.
    pub fn reset_all(&mut self) -> usize {
        self.staged.reset_all()
    }

    /// Make the staged state visible to readers in one swap.
    pub fn publish(self) {
        self.registry.publish(self.staged);
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// HELP text escapes backslash and newline only.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(names: &[String], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
