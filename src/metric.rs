use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::series::{AppendOutcome, Sample, SnapshotSeries};

/// Static definition of a well-known metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub id: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
}

const fn def(id: &'static str, label: &'static str, unit: &'static str) -> MetricDef {
    MetricDef { id, label, unit }
}

/// Metrics collected per monitored instance.
pub const INSTANCE_METRICS: &[MetricDef] = &[
    def("heap_used_mb", "Used Heap", "MB"),
    def("thread_count", "Thread Count", "threads"),
    def("peak_thread_count", "Peak Thread Count", "threads"),
    def("busy_thread_count", "Busy Thread Count", "threads"),
    def("commit_count", "TX Commit", "#"),
    def("rollback_count", "TX Rollback", "#"),
    def("total_errors", "Errors", "#"),
    def("active_sessions", "HTTP Sessions", "#"),
    def("expired_sessions", "Expired Sessions", "#"),
    def("queued_connections", "Queued Connections", "connections"),
    def("deadlocked_threads", "Deadlocked Threads", "threads"),
    def("commits_per_second", "Commits Per Second", "1/s"),
    def("rollbacks_per_second", "Rollbacks Per Second", "1/s"),
];

/// Metrics collected per connection pool.
pub const POOL_METRICS: &[MetricDef] = &[
    def("busy_connections", "Busy Connections", "connections"),
    def("free_connections", "Free Connections", "connections"),
    def("wait_queue_length", "Wait Queue Length", "threads"),
    def("potential_leaks", "Potential Connection Leaks", "connections"),
];

/// Monotonic counters paired with the per-second metric derived from them.
pub const RATE_PAIRS: &[(&str, &str)] = &[
    ("commit_count", "commits_per_second"),
    ("rollback_count", "rollbacks_per_second"),
];

pub fn instance_metric(id: &str) -> Option<&'static MetricDef> {
    INSTANCE_METRICS.iter().find(|d| d.id == id)
}

pub fn pool_metric(id: &str) -> Option<&'static MetricDef> {
    POOL_METRICS.iter().find(|d| d.id == id)
}

pub fn rate_target(counter_id: &str) -> Option<&'static str> {
    RATE_PAIRS
        .iter()
        .find(|(source, _)| *source == counter_id)
        .map(|(_, derived)| *derived)
}

/// What happened to a submitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Coalesced,
    Stale,
}

/// A single named, unit-tagged reactive scalar with bounded history.
///
/// `last_updated` is monotonically non-decreasing: samples older than the
/// last accepted one are rejected rather than silently overwritten.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub id: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub current: f64,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    series: SnapshotSeries,
}

impl Metric {
    pub fn new(def: &'static MetricDef, history_capacity: usize) -> Self {
        Self {
            id: def.id,
            label: def.label,
            unit: def.unit,
            current: 0.0,
            last_updated: None,
            series: SnapshotSeries::new(history_capacity),
        }
    }

    pub fn update(&mut self, value: f64, ts: DateTime<Utc>) -> UpdateOutcome {
        if let Some(last) = self.last_updated {
            if ts < last {
                return UpdateOutcome::Stale;
            }
        }

        self.current = value;
        self.last_updated = Some(ts);
        match self.series.append(Sample::new(ts, value)) {
            AppendOutcome::Coalesced => UpdateOutcome::Coalesced,
            _ => UpdateOutcome::Applied,
        }
    }

    pub fn series(&self) -> Vec<Sample> {
        self.series.values()
    }

    pub fn history_len(&self) -> usize {
        self.series.len()
    }
}

/// A keyed bundle of metrics sharing one lifecycle (an instance, or one pool).
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct MetricSet {
    metrics: HashMap<&'static str, Metric>,
}

impl MetricSet {
    pub fn instance(history_capacity: usize) -> Self {
        Self::from_defs(INSTANCE_METRICS, history_capacity)
    }

    pub fn pool(history_capacity: usize) -> Self {
        Self::from_defs(POOL_METRICS, history_capacity)
    }

    pub fn empty() -> Self {
        Self {
            metrics: HashMap::new(),
        }
    }

    fn from_defs(defs: &'static [MetricDef], history_capacity: usize) -> Self {
        let metrics = defs
            .iter()
            .map(|def| (def.id, Metric::new(def, history_capacity)))
            .collect();
        Self { metrics }
    }

    /// Returns `None` when the id is not part of this bundle.
    pub fn update(&mut self, id: &str, value: f64, ts: DateTime<Utc>) -> Option<UpdateOutcome> {
        self.metrics.get_mut(id).map(|m| m.update(value, ts))
    }

    pub fn get(&self, id: &str) -> Option<&Metric> {
        self.metrics.get(id)
    }

    pub fn current(&self, id: &str) -> Option<f64> {
        self.metrics.get(id).map(|m| m.current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// Most recent accepted timestamp across the bundle.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.metrics.values().filter_map(|m| m.last_updated).max()
    }
}

/// Derives a per-second rate from successive observations of a monotonic
/// counter.
#[derive(Debug, Default, Clone)]
pub struct RateTracker {
    previous: Option<(DateTime<Utc>, f64)>,
}

impl RateTracker {
    /// Records the observation and returns the rate against the previous one.
    /// Yields nothing on the first observation, on zero elapsed time, or on a
    /// negative delta (counter reset in the monitored process).
    pub fn observe(&mut self, ts: DateTime<Utc>, value: f64) -> Option<f64> {
        let rate = self.previous.and_then(|(prev_ts, prev_value)| {
            let elapsed = ts.signed_duration_since(prev_ts).num_milliseconds() as f64 / 1000.0;
            let delta = value - prev_value;
            if elapsed <= 0.0 || delta < 0.0 {
                None
            } else {
                Some(delta / elapsed)
            }
        });
        self.previous = Some((ts, value));
        rate
    }
}
