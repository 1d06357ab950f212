use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::AppContext;

/// Full reading of the monitored process taken by one poll: instance metric
/// values plus the complete set of currently known pools with their values.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub taken_at: DateTime<Utc>,
    pub metrics: Vec<(String, f64)>,
    pub pools: BTreeMap<String, Vec<(String, f64)>>,
}

pub type PollFuture<'a> = Pin<Box<dyn Future<Output = Result<SourceSnapshot>> + Send + 'a>>;

/// Transport seam: something that can read the monitored process at the
/// configured location. Concrete transports (management REST endpoints, JMX
/// bridges) live outside this crate; tests drive the loop with an in-memory
/// source.
pub trait SampleSource: Send + Sync + 'static {
    fn instance(&self) -> &str;
    fn poll(&self) -> PollFuture<'_>;
}

/// Spawn the collector loop for one source and return its join handle.
pub fn spawn_collector(
    ctx: AppContext,
    source: Arc<dyn SampleSource>,
    interval: Duration,
    budget: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let instance = source.instance().to_string();
        ctx.hub.start(&instance).await;
        info!(
            instance = %instance,
            interval = ?interval,
            budget = ?budget,
            "starting collector loop"
        );

        // tokio::time::interval() completes the first tick immediately, so
        // the dashboard has data before the first full interval elapses.
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = collect_once(&ctx, source.as_ref(), &instance, budget).await {
                error!(instance = %instance, error = ?err, "collector iteration failed");
            }
        }
    })
}

async fn collect_once(
    ctx: &AppContext,
    source: &dyn SampleSource,
    instance: &str,
    budget: Duration,
) -> Result<()> {
    let start = Instant::now();
    match source.poll().await {
        Ok(snapshot) => {
            apply_snapshot(ctx, instance, snapshot).await;
            let elapsed = start.elapsed();
            ctx.metrics.observe_poll(instance, elapsed);
            if elapsed > budget {
                warn!(
                    instance = %instance,
                    elapsed = ?elapsed,
                    budget = ?budget,
                    "collector iteration exceeded budget"
                );
            }
            ctx.metrics.record_poll_success(instance, true);
            ctx.hub.record_feed_success(instance).await;
            Ok(())
        }
        Err(err) => {
            ctx.metrics.record_poll_success(instance, false);
            ctx.metrics.inc_poll_error(instance);
            ctx.hub
                .record_feed_failure(instance, err.to_string())
                .await;
            Err(err)
        }
    }
}

/// Feed one snapshot through the hub: instance metrics first, then pool
/// membership reconciliation, then per-pool metrics, all stamped with the
/// snapshot's collection time.
async fn apply_snapshot(ctx: &AppContext, instance: &str, snapshot: SourceSnapshot) {
    for (metric, value) in &snapshot.metrics {
        let outcome = ctx
            .hub
            .submit_sample(instance, metric, *value, snapshot.taken_at)
            .await;
        ctx.metrics.record_outcome(instance, outcome);
    }

    let observed: BTreeSet<String> = snapshot.pools.keys().cloned().collect();
    if let Some(events) = ctx.hub.submit_pool_snapshot(instance, &observed).await {
        ctx.metrics.record_pool_events(instance, &events);
    }

    for (pool, samples) in &snapshot.pools {
        for (metric, value) in samples {
            let outcome = ctx
                .hub
                .submit_pool_sample(instance, pool, metric, *value, snapshot.taken_at)
                .await;
            ctx.metrics.record_outcome(instance, outcome);
        }
    }
}
