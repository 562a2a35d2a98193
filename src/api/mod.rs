pub mod health;
pub mod metrics;
pub mod namespaces;
pub mod openapi;
pub mod pods;
pub mod response;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::k8s::{ClusterClient, PodReconciler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Published by the connection manager once the cluster answers
    pub cluster: Arc<RwLock<Option<Arc<dyn ClusterClient>>>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cluster: Arc::new(RwLock::new(None)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub async fn set_cluster(&self, client: Arc<dyn ClusterClient>) {
        let mut guard = self.cluster.write().await;
        *guard = Some(client);
    }

    pub async fn clear_cluster(&self) {
        let mut guard = self.cluster.write().await;
        *guard = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.cluster.read().await.is_some()
    }

    /// Current cluster client, or 503 while disconnected
    pub async fn cluster(&self) -> AppResult<Arc<dyn ClusterClient>> {
        self.cluster
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::unavailable("Kubernetes cluster not available"))
    }

    pub async fn reconciler(&self) -> AppResult<PodReconciler> {
        let client = self.cluster().await?;
        Ok(PodReconciler::new(client)
            .with_deletion_wait(self.config.pod_deletion_wait())
            .with_grace_period(self.config.pod_delete_grace_period_secs))
    }
}
