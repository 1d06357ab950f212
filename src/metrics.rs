use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::pools::PoolEvent;
use crate::presenter::SampleOutcome;
use crate::state::MonitorHub;

/// Metrics registry for the agent itself, scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    ingest: IngestMetrics,
    collector: CollectorMetrics,
    exported: ExportedMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("appmon".into()), None)?);

        let ingest = IngestMetrics::register(&registry)?;
        let collector = CollectorMetrics::register(&registry)?;
        let exported = ExportedMetrics::register(&registry)?;

        Ok(Self {
            registry,
            ingest,
            collector,
            exported,
        })
    }

    /// Count a sample by its terminal outcome.
    pub fn record_outcome(&self, instance: &str, outcome: SampleOutcome) {
        self.ingest
            .samples_total
            .with_label_values(&[instance, outcome.as_str()])
            .inc();
    }

    pub fn record_pool_events(&self, instance: &str, events: &[PoolEvent]) {
        for event in events {
            let label = match event {
                PoolEvent::Added(_) => "added",
                PoolEvent::Removed(_) => "removed",
            };
            self.ingest
                .pool_events_total
                .with_label_values(&[instance, label])
                .inc();
        }
    }

    pub fn observe_poll(&self, instance: &str, duration: Duration) {
        self.collector
            .poll_duration
            .with_label_values(&[instance])
            .observe(duration.as_secs_f64());
    }

    /// Record a success flag for a collector iteration (1=success, 0=failed).
    pub fn record_poll_success(&self, instance: &str, success: bool) {
        self.collector
            .last_success
            .with_label_values(&[instance])
            .set(if success { 1 } else { 0 });
    }

    pub fn inc_poll_error(&self, instance: &str) {
        self.collector
            .errors_total
            .with_label_values(&[instance])
            .inc();
    }

    /// Refresh the exported gauges from current hub state. Called on scrape;
    /// reset-then-set so disposed instances and removed pools drop out.
    pub async fn export_hub(&self, hub: &MonitorHub) {
        self.exported.metric_value.reset();
        self.exported.pool_value.reset();
        self.exported.escalation_active.reset();

        for id in hub.list().await {
            let Some(presenter) = hub.get(&id).await else {
                continue;
            };
            let snapshot = presenter.snapshot().await;

            for metric in &snapshot.metrics {
                if metric.last_updated.is_some() {
                    self.exported
                        .metric_value
                        .with_label_values(&[&id, metric.id])
                        .set(metric.current);
                }
            }

            for pool in &snapshot.pools {
                let pool_label = sanitize_label(&pool.name);
                for metric in pool.metrics.iter() {
                    if metric.last_updated.is_some() {
                        self.exported
                            .pool_value
                            .with_label_values(&[&id, pool_label.as_str(), metric.id])
                            .set(metric.current);
                    }
                }
            }

            for escalation in &snapshot.escalations {
                self.exported
                    .escalation_active
                    .with_label_values(&[&id, escalation.kind.as_str()])
                    .set(if escalation.active { 1 } else { 0 });
            }
        }
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct IngestMetrics {
    samples_total: IntCounterVec,
    pool_events_total: IntCounterVec,
}

impl IngestMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let samples_total = IntCounterVec::new(
            Opts::new(
                "samples_total",
                "Submitted samples grouped by terminal outcome",
            ),
            &["instance", "outcome"],
        )?;
        registry.register(Box::new(samples_total.clone()))?;

        let pool_events_total = IntCounterVec::new(
            Opts::new(
                "pool_events_total",
                "Pool add/remove events emitted by reconciliation",
            ),
            &["instance", "event"],
        )?;
        registry.register(Box::new(pool_events_total.clone()))?;

        Ok(Self {
            samples_total,
            pool_events_total,
        })
    }
}

#[derive(Clone)]
struct CollectorMetrics {
    poll_duration: HistogramVec,
    last_success: IntGaugeVec,
    errors_total: IntCounterVec,
}

impl CollectorMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let poll_duration = HistogramVec::new(
            HistogramOpts::new("poll_duration_seconds", "Collector iteration duration"),
            &["instance"],
        )?;
        registry.register(Box::new(poll_duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "last_poll_success",
                "Collector success flag (1=success, 0=failure)",
            ),
            &["instance"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("poll_errors_total", "Total collector errors"),
            &["instance"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            poll_duration,
            last_success,
            errors_total,
        })
    }
}

#[derive(Clone)]
struct ExportedMetrics {
    metric_value: GaugeVec,
    pool_value: GaugeVec,
    escalation_active: IntGaugeVec,
}

impl ExportedMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let metric_value = GaugeVec::new(
            Opts::new("metric_value", "Current value per instance metric"),
            &["instance", "metric"],
        )?;
        registry.register(Box::new(metric_value.clone()))?;

        let pool_value = GaugeVec::new(
            Opts::new("pool_metric_value", "Current value per pool metric"),
            &["instance", "pool", "metric"],
        )?;
        registry.register(Box::new(pool_value.clone()))?;

        let escalation_active = IntGaugeVec::new(
            Opts::new(
                "escalation_active",
                "Escalation state per kind (1=active, 0=inactive)",
            ),
            &["instance", "kind"],
        )?;
        registry.register(Box::new(escalation_active.clone()))?;

        Ok(Self {
            metric_value,
            pool_value,
            escalation_active,
        })
    }
}

fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
