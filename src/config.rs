use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::escalation::EscalationThresholds;
use crate::presenter::PresenterSettings;

const DEFAULT_CONFIG_PATH: &str = "/config/appmon.yaml";

const MIN_LOCATION_LEN: usize = 5;
const MAX_LOCATION_LEN: usize = 30;

/// Top-level configuration for the appmon agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorTarget,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default)]
    pub escalations: EscalationThresholds,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorTarget::default(),
            history: HistoryConfig::default(),
            events: EventConfig::default(),
            escalations: EscalationThresholds::default(),
            http: HttpConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn presenter_settings(&self) -> PresenterSettings {
        PresenterSettings {
            history_capacity: self.history.capacity,
            event_capacity: self.events.capacity,
            thresholds: self.escalations.clone(),
        }
    }
}

/// Which process to monitor and how often the collector samples it. The
/// transport that actually reads the process consumes this; the core does
/// not own it.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorTarget {
    #[serde(default = "MonitorTarget::default_instance")]
    pub instance: String,
    /// host:port of the monitored process' management endpoint.
    #[serde(default = "MonitorTarget::default_location")]
    pub location: String,
    #[serde(default = "MonitorTarget::default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl MonitorTarget {
    fn default_instance() -> String {
        "server".to_string()
    }

    fn default_location() -> String {
        "localhost:4848".to_string()
    }

    const fn default_interval() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for MonitorTarget {
    fn default() -> Self {
        Self {
            instance: Self::default_instance(),
            location: Self::default_location(),
            interval: Self::default_interval(),
        }
    }
}

/// Bounded in-memory history window per metric.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "HistoryConfig::default_capacity")]
    pub capacity: usize,
}

impl HistoryConfig {
    const fn default_capacity() -> usize {
        60
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

/// Capacity of the consumer-facing event channel. Lagging consumers lose the
/// oldest events rather than backpressuring the collector.
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default = "EventConfig::default_capacity")]
    pub capacity: usize,
}

impl EventConfig {
    const fn default_capacity() -> usize {
        256
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

/// HTTP listener configuration (bind address).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8282".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

/// Load configuration from a YAML file, falling back to defaults + env
/// overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("APPMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(instance) = env::var("APPMON_INSTANCE") {
        if !instance.is_empty() {
            config.monitor.instance = instance;
        }
    }
    if let Ok(location) = env::var("APPMON_LOCATION") {
        if !location.is_empty() {
            config.monitor.location = location;
        }
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.monitor.interval < Duration::from_secs(1) {
        bail!(
            "monitor.interval must be at least 1s, got {:?}",
            config.monitor.interval
        );
    }

    let location_len = config.monitor.location.len();
    if !(MIN_LOCATION_LEN..=MAX_LOCATION_LEN).contains(&location_len) {
        bail!(
            "monitor.location length must be between {MIN_LOCATION_LEN} and {MAX_LOCATION_LEN} characters, got {location_len}"
        );
    }

    if config.monitor.instance.trim().is_empty() {
        bail!("monitor.instance must not be empty");
    }

    Ok(())
}
