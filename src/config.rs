use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Explicit kubeconfig path; falls back to the default kubeconfig or the
    /// in-cluster service account
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default = "default_pod_deletion_wait_secs")]
    pub pod_deletion_wait_secs: u64,

    #[serde(default = "default_pod_delete_grace_period_secs")]
    pub pod_delete_grace_period_secs: u32,

    #[serde(default = "default_cluster_poll_interval_secs")]
    pub cluster_poll_interval_secs: u64,

    /// Comma separated list of origins
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_pod_deletion_wait_secs() -> u64 {
    5
}

fn default_pod_delete_grace_period_secs() -> u32 {
    0
}

fn default_cluster_poll_interval_secs() -> u64 {
    10
}

fn default_cors_allowed_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn pod_deletion_wait(&self) -> Duration {
        Duration::from_secs(self.pod_deletion_wait_secs)
    }

    pub fn cluster_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_poll_interval_secs.max(1))
    }

    pub fn cors_origins(&self) -> impl Iterator<Item = &str> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            kubeconfig: None,
            pod_deletion_wait_secs: default_pod_deletion_wait_secs(),
            pod_delete_grace_period_secs: default_pod_delete_grace_period_secs(),
            cluster_poll_interval_secs: default_cluster_poll_interval_secs(),
            cors_allowed_origins: default_cors_allowed_origins(),
            log_json: false,
        }
    }
}
