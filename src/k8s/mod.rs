//! Kubernetes integration for k8sadmin
//!
//! This module handles all interactions with the cluster:
//! - Translating admin UI requests into Pod specs and back
//! - Creating or replacing Pods (delete, wait, recreate)
//! - Listing Pods and namespaces for the UI

mod client;
mod describe;
mod reconciler;
mod resources;

pub use client::{ClusterClient, K8sClient, PodEventStream, PodWatchEvent};
pub use describe::{namespace_item, pod_list_item, pod_request};
pub use reconciler::{
    label_selector, DeletionSignal, PodReconciler, ReconcileError, Reconciled,
    DEFAULT_DELETION_WAIT,
};
pub use resources::build_pod;

