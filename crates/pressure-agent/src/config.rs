//! Agent configuration

use pressure_lib::controller::ControllerConfig;
use pressure_lib::evicter::EvicterConfig;
use pressure_lib::models::MetricWindow;
use pressure_lib::source::SourceSelection;
use pressure_lib::watcher::WatcherConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "PRESSURE_AGENT_CONFIG";

const ENV_PREFIX: &str = "PRESSURE_AGENT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("node name is not set (NODE_NAME or PRESSURE_AGENT_NODE_NAME)")]
    MissingNodeName,

    #[error("{field} must be a positive number, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },

    #[error("evict_threshold ({evict}) is below taint_threshold ({taint})")]
    ThresholdOrder { taint: f64, evict: f64 },

    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from the Kubernetes downward API
    #[serde(default)]
    pub node_name: String,

    /// Explicit kubeconfig; in-cluster configuration when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_taint_threshold")]
    pub taint_threshold: f64,

    #[serde(default = "default_evict_threshold")]
    pub evict_threshold: f64,

    #[serde(default = "default_evict_backoff", with = "humantime_serde")]
    pub evict_backoff: Duration,

    #[serde(default = "default_min_pod_age", with = "humantime_serde")]
    pub min_pod_age: Duration,

    #[serde(default)]
    pub target_window: MetricWindow,

    #[serde(default)]
    pub metric_source: SourceSelection,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

fn default_api_port() -> u16 {
    8080
}

fn default_taint_threshold() -> f64 {
    25.0
}

fn default_evict_threshold() -> f64 {
    50.0
}

fn default_evict_backoff() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_min_pod_age() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl AgentConfig {
    /// Load configuration from an optional file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Ok(node_name) = std::env::var("NODE_NAME") {
            builder = builder.set_default("node_name", node_name)?;
        }

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already assembled configuration
    pub fn from_config(config: config::Config) -> Result<Self, ConfigError> {
        let agent: AgentConfig = config.try_deserialize()?;
        agent.validate()?;
        Ok(agent)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.trim().is_empty() {
            return Err(ConfigError::MissingNodeName);
        }

        for (field, value) in [
            ("taint_threshold", self.taint_threshold),
            ("evict_threshold", self.evict_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }

        if self.evict_threshold < self.taint_threshold {
            return Err(ConfigError::ThresholdOrder {
                taint: self.taint_threshold,
                evict: self.evict_threshold,
            });
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(())
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            threshold: self.taint_threshold,
            target_window: self.target_window,
            interval: self.poll_interval,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            evict_threshold: self.evict_threshold,
            evicter: EvicterConfig {
                backoff: self.evict_backoff,
                min_pod_age: self.min_pod_age,
            },
            ..ControllerConfig::default()
        }
    }
}
