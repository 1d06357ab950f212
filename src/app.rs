use std::sync::Arc;

use crate::config::AppConfig;
use crate::metrics::AppMetrics;
use crate::state::MonitorHub;

/// Shared application context passed to HTTP handlers and collector loops.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub metrics: AppMetrics,
    pub hub: MonitorHub,
}

impl AppContext {
    pub fn new(config: AppConfig, metrics: AppMetrics, hub: MonitorHub) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            hub,
        }
    }
}
