//! Kubernetes client wrapper for k8sadmin

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::ClusterError;

/// Change notification for a Pod, as delivered by a watch
#[derive(Debug, Clone)]
pub enum PodWatchEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
    /// The server reported a failure inside the stream (e.g. 410 Gone)
    Error(String),
}

impl PodWatchEvent {
    /// Name of the Pod the event is about, if any
    pub fn pod_name(&self) -> Option<&str> {
        match self {
            PodWatchEvent::Added(pod)
            | PodWatchEvent::Modified(pod)
            | PodWatchEvent::Deleted(pod) => pod.metadata.name.as_deref(),
            PodWatchEvent::Error(_) => None,
        }
    }
}

pub type PodEventStream = BoxStream<'static, Result<PodWatchEvent, ClusterError>>;

/// Operations the admin API needs from the cluster
///
/// Implemented by [`K8sClient`] against a live API server and mocked in tests.
/// Every method is namespace-scoped except the namespace listing itself.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a Pod; `Ok(None)` when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError>;

    /// Create a Pod. With `params.dry_run` the server validates and discards it.
    async fn create_pod(
        &self,
        namespace: &str,
        pod: &Pod,
        params: &PostParams,
    ) -> Result<Pod, ClusterError>;

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), ClusterError>;

    /// Stream Pod changes in a namespace, filtered by label selector
    ///
    /// An empty selector matches every Pod in the namespace.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, ClusterError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError>;

    /// Returns the API server version
    async fn health_check(&self) -> Result<String, ClusterError>;
}

/// Wrapper around kube::Client
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8sClient from an explicit kubeconfig path, or the default
    /// kubeconfig / in-cluster config when none is given
    #[instrument(skip_all)]
    pub async fn new(kubeconfig: Option<&str>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for K8sClient {
    #[instrument(skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    #[instrument(skip(self, pod, params), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown"), dry_run = params.dry_run))]
    async fn create_pod(
        &self,
        namespace: &str,
        pod: &Pod,
        params: &PostParams,
    ) -> Result<Pod, ClusterError> {
        let created = self.pods(namespace).create(params, pod).await?;
        if params.dry_run {
            debug!("Pod accepted by dry run");
        } else {
            info!("Created pod");
        }
        Ok(created)
    }

    #[instrument(skip(self, params))]
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), ClusterError> {
        self.pods(namespace).delete(name, params).await?;
        info!(name, "Deleted pod");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, ClusterError> {
        let mut params = WatchParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        let stream = self.pods(namespace).watch(&params, resource_version).await?;

        let events = stream.filter_map(|event| {
            future::ready(match event {
                Ok(WatchEvent::Added(pod)) => Some(Ok(PodWatchEvent::Added(pod))),
                Ok(WatchEvent::Modified(pod)) => Some(Ok(PodWatchEvent::Modified(pod))),
                Ok(WatchEvent::Deleted(pod)) => Some(Ok(PodWatchEvent::Deleted(pod))),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(status)) => Some(Ok(PodWatchEvent::Error(status.message))),
                Err(e) => Some(Err(ClusterError::from(e))),
            })
        });

        Ok(events.boxed())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let list = self.pods(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn health_check(&self) -> Result<String, ClusterError> {
        let version = self.client.apiserver_version().await?;
        debug!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(version.git_version)
    }
}
