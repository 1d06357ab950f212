use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metric::{MetricSet, UpdateOutcome};

/// Structural change produced by a reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "pool", rename_all = "snake_case")]
pub enum PoolEvent {
    Added(String),
    Removed(String),
}

/// The metric bundle scoped to one connection pool.
///
/// Created when the pool is first observed, destroyed when it disappears. A
/// same-named pool observed later is a fresh entity with empty history.
#[derive(Debug, Clone, Serialize)]
pub struct PoolBundle {
    pub name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub discovered_at: DateTime<Utc>,
    pub metrics: MetricSet,
}

impl PoolBundle {
    fn new(name: String, discovered_at: DateTime<Utc>, history_capacity: usize) -> Self {
        Self {
            name,
            discovered_at,
            metrics: MetricSet::pool(history_capacity),
        }
    }
}

/// Keyed collection of pool bundles synchronized against a full-set discovery
/// feed. The feed reports the complete set of known pool names each tick; the
/// registry computes the diff itself.
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    history_capacity: usize,
    pools: BTreeMap<String, PoolBundle>,
}

impl PoolRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history_capacity,
            pools: BTreeMap::new(),
        }
    }

    /// Diff the observed set against current membership: create bundles for
    /// new names, drop bundles for vanished ones, leave survivors untouched.
    /// Events come out in deterministic order, additions before removals.
    /// Reconciling the same set twice emits nothing on the second pass.
    pub fn reconcile(&mut self, observed: &BTreeSet<String>, now: DateTime<Utc>) -> Vec<PoolEvent> {
        let mut events = Vec::new();

        for name in observed {
            if !self.pools.contains_key(name) {
                self.pools.insert(
                    name.clone(),
                    PoolBundle::new(name.clone(), now, self.history_capacity),
                );
                events.push(PoolEvent::Added(name.clone()));
            }
        }

        let vanished: Vec<String> = self
            .pools
            .keys()
            .filter(|name| !observed.contains(*name))
            .cloned()
            .collect();
        for name in vanished {
            self.pools.remove(&name);
            events.push(PoolEvent::Removed(name));
        }

        events
    }

    /// Returns `None` when the pool is unknown; `Some(None)` when the metric
    /// id is not a pool metric.
    pub fn update(
        &mut self,
        pool: &str,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
    ) -> Option<Option<UpdateOutcome>> {
        self.pools
            .get_mut(pool)
            .map(|bundle| bundle.metrics.update(metric, value, ts))
    }

    pub fn get(&self, pool: &str) -> Option<&PoolBundle> {
        self.pools.get(pool)
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoolBundle> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn clear(&mut self) {
        self.pools.clear();
    }
}
