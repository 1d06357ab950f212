use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One timestamped observation, immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub ts: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(ts: DateTime<Utc>, value: f64) -> Self {
        Self { ts, value }
    }
}

/// What happened to a sample pushed into a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored as a new point (evicting the oldest if the buffer was full).
    Appended,
    /// Same timestamp as the newest point: its value was replaced in place.
    Coalesced,
    /// Older than the newest point: dropped, buffer untouched.
    Rejected,
}

/// Bounded, timestamp-ascending history buffer behind one metric.
///
/// Capacity is fixed at creation. When full, appending evicts the oldest
/// point. Same-instant appends coalesce instead of duplicating the point.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSeries {
    capacity: usize,
    points: VecDeque<Sample>,
}

impl SnapshotSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, sample: Sample) -> AppendOutcome {
        if let Some(newest) = self.points.back_mut() {
            if sample.ts < newest.ts {
                return AppendOutcome::Rejected;
            }
            if sample.ts == newest.ts {
                newest.value = sample.value;
                return AppendOutcome::Coalesced;
            }
        }

        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(sample);
        AppendOutcome::Appended
    }

    /// Owned snapshot of the current contents in ascending timestamp order.
    /// Readers never observe a partial eviction.
    pub fn values(&self) -> Vec<Sample> {
        self.points.iter().copied().collect()
    }

    pub fn newest(&self) -> Option<Sample> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[test]
    fn series_evicts_oldest_when_full() {
        let mut series = SnapshotSeries::new(10);
        for i in 0..25 {
            series.append(Sample::new(t(i), i as f64));
        }
        assert_eq!(series.len(), 10);
        let values = series.values();
        assert_eq!(values.first().unwrap().ts, t(15), "oldest should be evicted");
        assert!((values.last().unwrap().value - 24.0).abs() < 1e-9);
    }

    #[test]
    fn series_stays_timestamp_ascending() {
        let mut series = SnapshotSeries::new(5);
        series.append(Sample::new(t(0), 1.0));
        series.append(Sample::new(t(2), 2.0));
        series.append(Sample::new(t(5), 3.0));
        let values = series.values();
        assert!(values.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn same_instant_append_coalesces() {
        let mut series = SnapshotSeries::new(5);
        assert_eq!(series.append(Sample::new(t(10), 1.0)), AppendOutcome::Appended);
        assert_eq!(series.append(Sample::new(t(10), 2.0)), AppendOutcome::Coalesced);
        assert_eq!(series.len(), 1);
        assert!((series.newest().unwrap().value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let mut series = SnapshotSeries::new(5);
        series.append(Sample::new(t(10), 1.0));
        assert_eq!(series.append(Sample::new(t(5), 9.0)), AppendOutcome::Rejected);
        assert_eq!(series.len(), 1);
        assert!((series.newest().unwrap().value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut series = SnapshotSeries::new(0);
        series.append(Sample::new(t(0), 1.0));
        assert_eq!(series.len(), 1);
        assert_eq!(series.capacity(), 1);
    }
}
