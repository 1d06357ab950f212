use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::MetricSet;

/// Escalation categories detected from instance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    DeadlockedThreads,
    TotalErrors,
    QueuedConnections,
}

impl EscalationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationKind::DeadlockedThreads => "deadlocked_threads",
            EscalationKind::TotalErrors => "total_errors",
            EscalationKind::QueuedConnections => "queued_connections",
        }
    }
}

/// Predicate over current metric values that decides whether an escalation
/// is firing.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    /// Fires while the referenced metric is greater than zero.
    Positive { metric: &'static str },
    /// Fires while the referenced metric exceeds the configured bound.
    Threshold { metric: &'static str, limit: f64 },
}

impl Trigger {
    pub fn metric(&self) -> &'static str {
        match self {
            Trigger::Positive { metric } | Trigger::Threshold { metric, .. } => metric,
        }
    }

    fn fires(&self, metrics: &MetricSet) -> bool {
        match self {
            Trigger::Positive { metric } => {
                metrics.current(metric).map(|v| v > 0.0).unwrap_or(false)
            }
            Trigger::Threshold { metric, limit } => {
                metrics.current(metric).map(|v| v > *limit).unwrap_or(false)
            }
        }
    }
}

/// A state change produced by `recompute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Cleared,
}

/// Derived alert state with Inactive/Active transition semantics.
///
/// `since` records the activation time and is cleared on return to Inactive.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationState {
    pub kind: EscalationKind,
    pub active: bool,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip)]
    trigger: Trigger,
}

impl EscalationState {
    pub fn new(kind: EscalationKind, trigger: Trigger) -> Self {
        Self {
            kind,
            active: false,
            since: None,
            trigger,
        }
    }

    /// Pure function of the current metric values; transitions happen only on
    /// an actual change, so repeated recomputes with the same readings emit
    /// nothing.
    pub fn recompute(&mut self, metrics: &MetricSet, now: DateTime<Utc>) -> Option<Transition> {
        let firing = self.trigger.fires(metrics);
        match (self.active, firing) {
            (false, true) => {
                self.active = true;
                self.since = Some(now);
                Some(Transition::Started)
            }
            (true, false) => {
                self.active = false;
                self.since = None;
                Some(Transition::Cleared)
            }
            _ => None,
        }
    }

}

/// Ledger entry for one escalation episode.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationEvent {
    pub kind: EscalationKind,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub cleared_at: Option<DateTime<Utc>>,
}

/// Bounds for the threshold-style escalations; deadlock detection needs none.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationThresholds {
    #[serde(default = "EscalationThresholds::default_total_errors")]
    pub total_errors: f64,
    #[serde(default = "EscalationThresholds::default_queued_connections")]
    pub queued_connections: f64,
}

impl EscalationThresholds {
    const fn default_total_errors() -> f64 {
        100.0
    }

    const fn default_queued_connections() -> f64 {
        10.0
    }
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            total_errors: Self::default_total_errors(),
            queued_connections: Self::default_queued_connections(),
        }
    }
}

/// The escalation set registered for every instance.
pub fn standard_set(thresholds: &EscalationThresholds) -> Vec<EscalationState> {
    vec![
        EscalationState::new(
            EscalationKind::DeadlockedThreads,
            Trigger::Positive {
                metric: "deadlocked_threads",
            },
        ),
        EscalationState::new(
            EscalationKind::TotalErrors,
            Trigger::Threshold {
                metric: "total_errors",
                limit: thresholds.total_errors,
            },
        ),
        EscalationState::new(
            EscalationKind::QueuedConnections,
            Trigger::Threshold {
                metric: "queued_connections",
                limit: thresholds.queued_connections,
            },
        ),
    ]
}
