use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::escalation::{
    standard_set, EscalationEvent, EscalationKind, EscalationState, EscalationThresholds,
    Transition,
};
use crate::metric::{rate_target, Metric, MetricSet, RateTracker, UpdateOutcome};
use crate::pools::{PoolBundle, PoolEvent, PoolRegistry};
use crate::series::Sample;

const ESCALATION_LOG_CAPACITY: usize = 256;

/// Sizing knobs for one presenter, derived from configuration.
#[derive(Debug, Clone)]
pub struct PresenterSettings {
    pub history_capacity: usize,
    pub event_capacity: usize,
    pub thresholds: EscalationThresholds,
}

impl Default for PresenterSettings {
    fn default() -> Self {
        Self {
            history_capacity: 60,
            event_capacity: 256,
            thresholds: EscalationThresholds::default(),
        }
    }
}

/// Terminal status of a submitted sample. Everything except `Applied` and
/// `Coalesced` means the sample was dropped; none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Applied,
    Coalesced,
    Stale,
    UnknownMetric,
    UnknownPool,
    UnknownInstance,
    Disposed,
}

impl SampleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleOutcome::Applied => "applied",
            SampleOutcome::Coalesced => "coalesced",
            SampleOutcome::Stale => "stale",
            SampleOutcome::UnknownMetric => "unknown_metric",
            SampleOutcome::UnknownPool => "unknown_pool",
            SampleOutcome::UnknownInstance => "unknown_instance",
            SampleOutcome::Disposed => "disposed",
        }
    }

    pub fn accepted(self) -> bool {
        matches!(self, SampleOutcome::Applied | SampleOutcome::Coalesced)
    }
}

impl From<UpdateOutcome> for SampleOutcome {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Applied => SampleOutcome::Applied,
            UpdateOutcome::Coalesced => SampleOutcome::Coalesced,
            UpdateOutcome::Stale => SampleOutcome::Stale,
        }
    }
}

/// Notification stream consumed by the rendering layer. The channel is
/// bounded; a consumer that falls behind loses the oldest events instead of
/// stalling the collector.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    MetricUpdated {
        metric: &'static str,
        value: f64,
        ts: DateTime<Utc>,
    },
    PoolMetricUpdated {
        pool: String,
        metric: &'static str,
        value: f64,
        ts: DateTime<Utc>,
    },
    PoolAdded {
        pool: String,
    },
    PoolRemoved {
        pool: String,
    },
    EscalationStarted {
        kind: EscalationKind,
        since: DateTime<Utc>,
    },
    EscalationCleared {
        kind: EscalationKind,
    },
}

/// Token returned by `subscribe_metric`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type MetricListener = Arc<dyn Fn(Sample) + Send + Sync>;

/// Serializable view of everything one instance currently exposes.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub instance: String,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub generated_at: Option<DateTime<Utc>>,
    pub metrics: Vec<Metric>,
    pub pools: Vec<PoolBundle>,
    pub escalations: Vec<EscalationState>,
}

struct PresenterState {
    disposed: bool,
    metrics: MetricSet,
    pools: PoolRegistry,
    escalations: Vec<EscalationState>,
    escalation_log: Vec<EscalationEvent>,
    rates: HashMap<&'static str, RateTracker>,
    listeners: HashMap<&'static str, Vec<(SubscriptionId, MetricListener)>>,
    next_subscription: u64,
}

impl PresenterState {
    /// Runs everything that follows an accepted instance-metric update while
    /// the presenter lock is held: listener collection, event emission,
    /// derived-rate feeding, escalation recompute. Listener callbacks are
    /// gathered into `pending` and invoked after the lock is released.
    fn apply_accepted(
        &mut self,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
        events: &broadcast::Sender<MonitorEvent>,
        pending: &mut Vec<(MetricListener, Sample)>,
    ) {
        let id = match self.metrics.get(metric) {
            Some(m) => m.id,
            None => return,
        };
        self.queue_metric_update(id, value, ts, events, pending);

        if let Some(derived) = rate_target(id) {
            let rate = self.rates.entry(id).or_default().observe(ts, value);
            if let Some(rate) = rate {
                match self.metrics.update(derived, rate, ts) {
                    Some(UpdateOutcome::Applied) | Some(UpdateOutcome::Coalesced) => {
                        self.queue_metric_update(derived, rate, ts, events, pending);
                    }
                    _ => {}
                }
            }
        }

        self.recompute_escalations(ts, events);
    }

    fn queue_metric_update(
        &mut self,
        id: &'static str,
        value: f64,
        ts: DateTime<Utc>,
        events: &broadcast::Sender<MonitorEvent>,
        pending: &mut Vec<(MetricListener, Sample)>,
    ) {
        let sample = Sample::new(ts, value);
        if let Some(subs) = self.listeners.get(id) {
            // Snapshot the listener list so an unsubscribe racing with this
            // notification cannot skip the remaining listeners.
            pending.extend(subs.iter().map(|(_, cb)| (cb.clone(), sample)));
        }
        let _ = events.send(MonitorEvent::MetricUpdated {
            metric: id,
            value,
            ts,
        });
    }

    fn recompute_escalations(&mut self, ts: DateTime<Utc>, events: &broadcast::Sender<MonitorEvent>) {
        for escalation in &mut self.escalations {
            match escalation.recompute(&self.metrics, ts) {
                Some(Transition::Started) => {
                    self.escalation_log.push(EscalationEvent {
                        kind: escalation.kind,
                        started_at: ts,
                        cleared_at: None,
                    });
                    if self.escalation_log.len() > ESCALATION_LOG_CAPACITY {
                        let excess = self.escalation_log.len() - ESCALATION_LOG_CAPACITY;
                        self.escalation_log.drain(..excess);
                    }
                    let _ = events.send(MonitorEvent::EscalationStarted {
                        kind: escalation.kind,
                        since: ts,
                    });
                }
                Some(Transition::Cleared) => {
                    if let Some(open) = self
                        .escalation_log
                        .iter_mut()
                        .rev()
                        .find(|e| e.kind == escalation.kind && e.cleared_at.is_none())
                    {
                        open.cleared_at = Some(ts);
                    }
                    let _ = events.send(MonitorEvent::EscalationCleared {
                        kind: escalation.kind,
                    });
                }
                None => {}
            }
        }
    }
}

struct PresenterShared {
    id: String,
    events: broadcast::Sender<MonitorEvent>,
    state: RwLock<PresenterState>,
}

/// Aggregation root for one monitored instance: the metric map, the pool
/// registry, the escalation set, and all subscriptions.
///
/// All mutation is serialized behind a single lock so cross-metric consumers
/// (escalation triggers, snapshots) always see a consistent view. Disposal is
/// safe to call concurrently with in-flight updates; anything arriving after
/// it is silently discarded.
#[derive(Clone)]
pub struct InstancePresenter {
    shared: Arc<PresenterShared>,
}

impl InstancePresenter {
    pub fn new(id: impl Into<String>, settings: &PresenterSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let state = PresenterState {
            disposed: false,
            metrics: MetricSet::instance(settings.history_capacity),
            pools: PoolRegistry::new(settings.history_capacity),
            escalations: standard_set(&settings.thresholds),
            escalation_log: Vec::new(),
            rates: HashMap::new(),
            listeners: HashMap::new(),
            next_subscription: 0,
        };
        Self {
            shared: Arc::new(PresenterShared {
                id: id.into(),
                events,
                state: RwLock::new(state),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Fire-and-forget ingest of one instance-metric sample.
    pub async fn submit_sample(
        &self,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
    ) -> SampleOutcome {
        let mut pending = Vec::new();
        let outcome = {
            let mut state = self.shared.state.write().await;
            if state.disposed {
                return SampleOutcome::Disposed;
            }
            let Some(update) = state.metrics.update(metric, value, ts) else {
                debug!(instance = %self.shared.id, metric, "sample for unknown metric dropped");
                return SampleOutcome::UnknownMetric;
            };
            if update == UpdateOutcome::Stale {
                debug!(instance = %self.shared.id, metric, ts = %ts, "stale sample dropped");
                return SampleOutcome::Stale;
            }
            state.apply_accepted(metric, value, ts, &self.shared.events, &mut pending);
            SampleOutcome::from(update)
        };

        for (listener, sample) in pending {
            listener(sample);
        }
        outcome
    }

    /// Ingest of one sample scoped to a connection pool.
    pub async fn submit_pool_sample(
        &self,
        pool: &str,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
    ) -> SampleOutcome {
        let mut state = self.shared.state.write().await;
        if state.disposed {
            return SampleOutcome::Disposed;
        }
        match state.pools.update(pool, metric, value, ts) {
            None => {
                debug!(instance = %self.shared.id, pool, "sample for unknown pool dropped");
                SampleOutcome::UnknownPool
            }
            Some(None) => {
                debug!(instance = %self.shared.id, pool, metric, "sample for unknown pool metric dropped");
                SampleOutcome::UnknownMetric
            }
            Some(Some(UpdateOutcome::Stale)) => {
                debug!(instance = %self.shared.id, pool, metric, "stale pool sample dropped");
                SampleOutcome::Stale
            }
            Some(Some(update)) => {
                let id = state
                    .pools
                    .get(pool)
                    .and_then(|b| b.metrics.get(metric))
                    .map(|m| m.id);
                if let Some(id) = id {
                    let _ = self.shared.events.send(MonitorEvent::PoolMetricUpdated {
                        pool: pool.to_string(),
                        metric: id,
                        value,
                        ts,
                    });
                }
                SampleOutcome::from(update)
            }
        }
    }

    /// Reconcile pool membership against the full observed set and emit the
    /// structural diff. A disposed presenter returns no events.
    pub async fn submit_pool_snapshot(&self, observed: &BTreeSet<String>) -> Vec<PoolEvent> {
        let mut state = self.shared.state.write().await;
        if state.disposed {
            return Vec::new();
        }
        let events = state.pools.reconcile(observed, Utc::now());
        for event in &events {
            match event {
                PoolEvent::Added(pool) => {
                    info!(instance = %self.shared.id, pool = %pool, "pool discovered");
                    let _ = self
                        .shared
                        .events
                        .send(MonitorEvent::PoolAdded { pool: pool.clone() });
                }
                PoolEvent::Removed(pool) => {
                    info!(instance = %self.shared.id, pool = %pool, "pool removed");
                    let _ = self
                        .shared
                        .events
                        .send(MonitorEvent::PoolRemoved { pool: pool.clone() });
                }
            }
        }
        events
    }

    /// Registers a synchronous listener for one instance metric. The listener
    /// runs on the update path for every accepted sample of that metric.
    pub async fn subscribe_metric(
        &self,
        metric: &str,
        listener: impl Fn(Sample) + Send + Sync + 'static,
    ) -> Option<SubscriptionId> {
        let mut state = self.shared.state.write().await;
        if state.disposed {
            return None;
        }
        let id = state.metrics.get(metric)?.id;
        state.next_subscription += 1;
        let token = SubscriptionId(state.next_subscription);
        state
            .listeners
            .entry(id)
            .or_default()
            .push((token, Arc::new(listener)));
        Some(token)
    }

    pub async fn unsubscribe(&self, token: SubscriptionId) -> bool {
        let mut state = self.shared.state.write().await;
        let mut removed = false;
        for subs in state.listeners.values_mut() {
            let before = subs.len();
            subs.retain(|(t, _)| *t != token);
            removed |= subs.len() != before;
        }
        removed
    }

    /// New receiver on the bounded event stream.
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        let state = self.shared.state.read().await;
        let mut metrics: Vec<Metric> = state.metrics.iter().cloned().collect();
        metrics.sort_by_key(|m| m.id);
        InstanceSnapshot {
            instance: self.shared.id.clone(),
            generated_at: state.metrics.last_updated(),
            metrics,
            pools: state.pools.iter().cloned().collect(),
            escalations: state.escalations.clone(),
        }
    }

    pub async fn series(&self, metric: &str) -> Option<Vec<Sample>> {
        let state = self.shared.state.read().await;
        state.metrics.get(metric).map(|m| m.series())
    }

    pub async fn pool_series(&self, pool: &str, metric: &str) -> Option<Vec<Sample>> {
        let state = self.shared.state.read().await;
        state
            .pools
            .get(pool)
            .and_then(|b| b.metrics.get(metric))
            .map(|m| m.series())
    }

    pub async fn pool_names(&self) -> Vec<String> {
        self.shared.state.read().await.pools.names()
    }

    pub async fn escalations(&self) -> Vec<EscalationState> {
        self.shared.state.read().await.escalations.clone()
    }

    pub async fn escalation_log(&self) -> Vec<EscalationEvent> {
        self.shared.state.read().await.escalation_log.clone()
    }

    pub async fn is_disposed(&self) -> bool {
        self.shared.state.read().await.disposed
    }

    /// Tears the presenter down: every owned metric, series, pool bundle,
    /// escalation and subscription is released. Idempotent.
    pub async fn dispose(&self) {
        let mut state = self.shared.state.write().await;
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.metrics = MetricSet::empty();
        state.pools.clear();
        state.escalations.clear();
        state.escalation_log.clear();
        state.rates.clear();
        state.listeners.clear();
        info!(instance = %self.shared.id, "presenter disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[tokio::test]
    async fn listener_fires_once_per_accepted_update() {
        let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        presenter
            .subscribe_metric("heap_used_mb", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .expect("subscription");

        presenter.submit_sample("heap_used_mb", 100.0, t(1)).await;
        presenter.submit_sample("heap_used_mb", 90.0, t(0)).await; // stale, no call
        presenter.submit_sample("heap_used_mb", 110.0, t(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications() {
        let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let token = presenter
            .subscribe_metric("thread_count", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .expect("subscription");

        presenter.submit_sample("thread_count", 10.0, t(1)).await;
        assert!(presenter.unsubscribe(token).await);
        presenter.submit_sample("thread_count", 12.0, t(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disposed_presenter_discards_everything() {
        let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
        presenter.submit_sample("heap_used_mb", 100.0, t(1)).await;
        presenter.dispose().await;
        presenter.dispose().await; // idempotent

        assert_eq!(
            presenter.submit_sample("heap_used_mb", 200.0, t(2)).await,
            SampleOutcome::Disposed
        );
        let observed: BTreeSet<String> = ["jdbc/orders".to_string()].into();
        assert!(presenter.submit_pool_snapshot(&observed).await.is_empty());
        assert!(presenter.subscribe_metric("heap_used_mb", |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn counter_updates_feed_derived_rates() {
        let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
        presenter.submit_sample("commit_count", 1_000.0, t(0)).await;
        presenter.submit_sample("commit_count", 1_060.0, t(30)).await;

        let snapshot = presenter.snapshot().await;
        let rate = snapshot
            .metrics
            .iter()
            .find(|m| m.id == "commits_per_second")
            .expect("derived metric");
        assert!((rate.current - 2.0).abs() < 1e-9);
        assert_eq!(rate.last_updated, Some(t(30)));
    }
}
