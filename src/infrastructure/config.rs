use crate::application::query_rewriter::NO_INSTANCE_SENTINEL;
use crate::domain::series::{DEFAULT_RANGE_MINUTES, DEFAULT_STEP_SECS};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/promdash";
const ENV_PREFIX: &str = "PROMDASH";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub prometheus: PrometheusSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrometheusSettings {
    pub endpoint: String,
    #[serde(default = "default_range_path")]
    pub range_path: String,
    #[serde(default = "default_instance_details_path")]
    pub instance_details_path: String,
    #[serde(default = "default_step_secs")]
    pub step_secs: i64,
    #[serde(default = "default_range_minutes")]
    pub default_range_minutes: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PrometheusSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

impl StorageSettings {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default = "default_no_instance_sentinel")]
    pub no_instance_sentinel: String,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            no_instance_sentinel: default_no_instance_sentinel(),
        }
    }
}

fn default_range_path() -> String {
    "/api/metrics/range".to_string()
}

fn default_instance_details_path() -> String {
    "/control-node/instance/details".to_string()
}

fn default_step_secs() -> i64 {
    DEFAULT_STEP_SECS
}

fn default_range_minutes() -> i64 {
    DEFAULT_RANGE_MINUTES
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_snapshot_path() -> String {
    "data/dashboard-state.json".to_string()
}

fn default_save_interval_ms() -> u64 {
    1000
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_no_instance_sentinel() -> String {
    NO_INSTANCE_SENTINEL.to_string()
}

/// `config/promdash.toml`, overridden by `PROMDASH_<SECTION>__<KEY>` variables.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
