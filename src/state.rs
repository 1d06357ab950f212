use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::pools::PoolEvent;
use crate::presenter::{InstancePresenter, PresenterSettings, SampleOutcome};

/// Health of the sample feed for one monitored instance.
#[derive(Debug, Clone, Serialize)]
pub struct FeedHealth {
    pub instance: String,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl FeedHealth {
    fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            last_success_at: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

struct HubInner {
    settings: PresenterSettings,
    presenters: RwLock<HashMap<String, InstancePresenter>>,
    feeds: RwLock<HashMap<String, FeedHealth>>,
}

/// Registry of instance presenters keyed by monitored-instance id.
///
/// Monitoring starts explicitly with `start`; samples for an id that was
/// never started are dropped.
#[derive(Clone)]
pub struct MonitorHub {
    inner: Arc<HubInner>,
}

impl MonitorHub {
    pub fn new(settings: PresenterSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                settings,
                presenters: RwLock::new(HashMap::new()),
                feeds: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get-or-create the presenter for an instance id.
    pub async fn start(&self, id: &str) -> InstancePresenter {
        let mut presenters = self.inner.presenters.write().await;
        if let Some(existing) = presenters.get(id) {
            return existing.clone();
        }
        info!(instance = id, "monitoring started");
        let presenter = InstancePresenter::new(id, &self.inner.settings);
        presenters.insert(id.to_string(), presenter.clone());
        presenter
    }

    pub async fn get(&self, id: &str) -> Option<InstancePresenter> {
        self.inner.presenters.read().await.get(id).cloned()
    }

    /// Dispose the presenter and forget the instance. Returns false when the
    /// id was never started.
    pub async fn dispose(&self, id: &str) -> bool {
        let removed = self.inner.presenters.write().await.remove(id);
        match removed {
            Some(presenter) => {
                presenter.dispose().await;
                self.inner.feeds.write().await.remove(id);
                info!(instance = id, "monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.presenters.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn submit_sample(
        &self,
        instance: &str,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
    ) -> SampleOutcome {
        match self.get(instance).await {
            Some(presenter) => presenter.submit_sample(metric, value, ts).await,
            None => SampleOutcome::UnknownInstance,
        }
    }

    pub async fn submit_pool_sample(
        &self,
        instance: &str,
        pool: &str,
        metric: &str,
        value: f64,
        ts: DateTime<Utc>,
    ) -> SampleOutcome {
        match self.get(instance).await {
            Some(presenter) => presenter.submit_pool_sample(pool, metric, value, ts).await,
            None => SampleOutcome::UnknownInstance,
        }
    }

    /// Returns `None` when the instance was never started.
    pub async fn submit_pool_snapshot(
        &self,
        instance: &str,
        observed: &BTreeSet<String>,
    ) -> Option<Vec<PoolEvent>> {
        match self.get(instance).await {
            Some(presenter) => Some(presenter.submit_pool_snapshot(observed).await),
            None => None,
        }
    }

    pub async fn record_feed_success(&self, instance: &str) {
        let mut feeds = self.inner.feeds.write().await;
        let entry = feeds
            .entry(instance.to_string())
            .or_insert_with(|| FeedHealth::new(instance));
        entry.last_success_at = Some(Utc::now());
        entry.consecutive_failures = 0;
        entry.last_error = None;
    }

    pub async fn record_feed_failure(&self, instance: &str, error: String) {
        let mut feeds = self.inner.feeds.write().await;
        let entry = feeds
            .entry(instance.to_string())
            .or_insert_with(|| FeedHealth::new(instance));
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(error);
    }

    pub async fn feed_health(&self) -> Vec<FeedHealth> {
        let mut health: Vec<FeedHealth> =
            self.inner.feeds.read().await.values().cloned().collect();
        health.sort_by(|a, b| a.instance.cmp(&b.instance));
        health
    }

    /// Ready when every started instance has a healthy, fresh feed. An empty
    /// hub is ready; a started instance that never produced a sample is not.
    pub async fn is_ready(&self, max_staleness: Duration) -> bool {
        let instances = self.list().await;
        if instances.is_empty() {
            return true;
        }
        let feeds = self.inner.feeds.read().await;
        let now = Utc::now();
        let staleness = chrono::Duration::from_std(max_staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        instances.iter().all(|id| {
            let Some(entry) = feeds.get(id) else {
                return false;
            };
            if entry.consecutive_failures > 0 {
                return false;
            }
            match entry.last_success_at {
                Some(last) => now.signed_duration_since(last) <= staleness,
                None => false,
            }
        })
    }
}
