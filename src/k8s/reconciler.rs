//! Pod replacement
//!
//! A Pod's spec cannot be changed once the API server has accepted it, so an
//! update is a delete followed by a create under the same name. The sequence
//! is:
//!
//! 1. read the existing Pod; when there is none, create directly
//! 2. dry-run create a `<name>-validate` clone so a spec the cluster would
//!    reject never costs the running Pod
//! 3. watch the Pod's labels, then force-delete it (grace 0, background)
//! 4. wait for a `Deleted` event naming the Pod, a Get that no longer finds it,
//!    or the deletion deadline, whichever comes first
//! 5. create the new Pod
//!
//! Nothing is retried and nothing is rolled back. Two concurrent runs for the
//! same Pod are not serialized here; the losing one fails on a conflicting
//! create or delete.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, PostParams};
use strum::Display;
use thiserror::Error;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument};

use super::client::{ClusterClient, PodEventStream, PodWatchEvent};
use super::resources::build_pod;
use crate::error::ClusterError;
use crate::models::pod::VALIDATION_SUFFIX;
use crate::models::PodRequest;

/// How long to wait for the old Pod to disappear before recreating anyway
pub const DEFAULT_DELETION_WAIT: Duration = Duration::from_secs(5);

/// What ended the wait for the old Pod's removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeletionSignal {
    /// The watch delivered `Deleted` for the target name
    DeletedEvent,
    /// A watch event woke us up and a Get no longer found the Pod
    ProbedAbsent,
    /// The deadline fired first (or the watch was unusable)
    TimedOut,
}

/// Successful outcome of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// No Pod existed under the name; it was created
    Created { namespace: String, name: String },
    /// The old Pod was deleted and recreated from the new spec
    Replaced {
        namespace: String,
        name: String,
        signal: DeletionSignal,
    },
}

impl Reconciled {
    pub fn namespace(&self) -> &str {
        match self {
            Reconciled::Created { namespace, .. } | Reconciled::Replaced { namespace, .. } => {
                namespace
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reconciled::Created { name, .. } | Reconciled::Replaced { name, .. } => name,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Reconciled::Created { .. } => "created",
            Reconciled::Replaced { .. } => "replaced",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Reconciled::Created { namespace, name } => {
                format!("Pod[namespace={},name={}] created", namespace, name)
            }
            Reconciled::Replaced {
                namespace,
                name,
                signal,
            } => format!(
                "Pod[namespace={},name={}] updated (old pod removal: {})",
                namespace, name, signal
            ),
        }
    }
}

/// Reconciliation failure. Every variant names the Pod and the failed step.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Pod[namespace={namespace},name={name}] lookup failed: {source}")]
    LookupFailed {
        namespace: String,
        name: String,
        source: ClusterError,
    },

    #[error("Pod[namespace={namespace},name={name}] create failed: {source}")]
    CreateFailed {
        namespace: String,
        name: String,
        source: ClusterError,
    },

    #[error("Pod[namespace={namespace},name={name}] update rejected by dry run, existing pod left untouched: {source}")]
    ValidationRejected {
        namespace: String,
        name: String,
        source: ClusterError,
    },

    #[error("Pod[namespace={namespace},name={name}] update failed deleting the existing pod, its state is unknown: {source}")]
    DeleteFailed {
        namespace: String,
        name: String,
        source: ClusterError,
    },

    #[error("Pod[namespace={namespace},name={name}] update failed after the old pod was deleted, pod is currently absent: {source}")]
    RecreateFailed {
        namespace: String,
        name: String,
        source: ClusterError,
    },
}

impl ReconcileError {
    pub fn namespace(&self) -> &str {
        match self {
            ReconcileError::LookupFailed { namespace, .. }
            | ReconcileError::CreateFailed { namespace, .. }
            | ReconcileError::ValidationRejected { namespace, .. }
            | ReconcileError::DeleteFailed { namespace, .. }
            | ReconcileError::RecreateFailed { namespace, .. } => namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ReconcileError::LookupFailed { name, .. }
            | ReconcileError::CreateFailed { name, .. }
            | ReconcileError::ValidationRejected { name, .. }
            | ReconcileError::DeleteFailed { name, .. }
            | ReconcileError::RecreateFailed { name, .. } => name,
        }
    }

    /// Underlying cluster error
    pub fn cause(&self) -> &ClusterError {
        match self {
            ReconcileError::LookupFailed { source, .. }
            | ReconcileError::CreateFailed { source, .. }
            | ReconcileError::ValidationRejected { source, .. }
            | ReconcileError::DeleteFailed { source, .. }
            | ReconcileError::RecreateFailed { source, .. } => source,
        }
    }

    /// The step that failed
    pub fn operation(&self) -> &'static str {
        match self {
            ReconcileError::LookupFailed { .. } => "lookup",
            ReconcileError::CreateFailed { .. } => "create",
            ReconcileError::ValidationRejected { .. } => "dry_run",
            ReconcileError::DeleteFailed { .. } => "delete",
            ReconcileError::RecreateFailed { .. } => "recreate",
        }
    }

    /// True when the Pod is known not to exist after the failure
    pub fn pod_absent(&self) -> bool {
        matches!(
            self,
            ReconcileError::CreateFailed { .. } | ReconcileError::RecreateFailed { .. }
        )
    }
}

/// Build a `k=v,k=v` selector from a label set. No labels gives an empty
/// selector, which matches every Pod in the namespace.
pub fn label_selector(labels: Option<&BTreeMap<String, String>>) -> String {
    labels
        .into_iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Creates or replaces a single Pod
#[derive(Clone)]
pub struct PodReconciler {
    client: Arc<dyn ClusterClient>,
    deletion_wait: Duration,
    grace_period_seconds: u32,
}

impl PodReconciler {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            deletion_wait: DEFAULT_DELETION_WAIT,
            grace_period_seconds: 0,
        }
    }

    /// Upper bound on the wait between delete and recreate
    pub fn with_deletion_wait(mut self, wait: Duration) -> Self {
        self.deletion_wait = wait;
        self
    }

    /// Grace period passed to the delete. Zero kills the Pod immediately.
    pub fn with_grace_period(mut self, seconds: u32) -> Self {
        self.grace_period_seconds = seconds;
        self
    }

    /// Run [`reconcile`](Self::reconcile) on its own task. Once started, a
    /// replace runs to completion even if the caller goes away, so the old
    /// Pod is never left deleted without a recreate attempt.
    pub fn spawn(&self, request: PodRequest) -> JoinHandle<Result<Reconciled, ReconcileError>> {
        let reconciler = self.clone();
        tokio::spawn(async move { reconciler.reconcile(&request).await }.in_current_span())
    }

    #[instrument(skip(self, request), fields(namespace = %request.namespace(), name = %request.name()))]
    pub async fn reconcile(&self, request: &PodRequest) -> Result<Reconciled, ReconcileError> {
        let started = Instant::now();
        let result = self.run(request).await;

        let outcome = match &result {
            Ok(done) => {
                info!(action = done.action(), "{}", done.message());
                done.action()
            }
            Err(e) => {
                warn!(operation = e.operation(), error = %e, "Pod reconcile failed");
                e.operation()
            }
        };
        metrics::counter!("k8sadmin_pod_reconcile_total", 1, "outcome" => outcome);
        metrics::histogram!(
            "k8sadmin_pod_reconcile_duration_seconds",
            started.elapsed().as_secs_f64()
        );

        result
    }

    async fn run(&self, request: &PodRequest) -> Result<Reconciled, ReconcileError> {
        let namespace = request.namespace().to_string();
        let name = request.name().to_string();
        let pod = build_pod(request);

        let existing = match self.client.get_pod(&namespace, &name).await {
            Ok(existing) => existing,
            Err(source) => {
                return Err(ReconcileError::LookupFailed {
                    namespace,
                    name,
                    source,
                })
            }
        };

        let Some(existing) = existing else {
            return match self
                .client
                .create_pod(&namespace, &pod, &PostParams::default())
                .await
            {
                Ok(_) => Ok(Reconciled::Created { namespace, name }),
                Err(source) => Err(ReconcileError::CreateFailed {
                    namespace,
                    name,
                    source,
                }),
            };
        };

        if let Err(source) = self.dry_run(&namespace, &name, &pod).await {
            return Err(ReconcileError::ValidationRejected {
                namespace,
                name,
                source,
            });
        }

        // Watch before deleting so a fast removal cannot slip past us.
        let selector = label_selector(existing.metadata.labels.as_ref());
        let resource_version = existing.metadata.resource_version.as_deref().unwrap_or("0");
        let events = match self
            .client
            .watch_pods(&namespace, &selector, resource_version)
            .await
        {
            Ok(events) => Some(events),
            Err(e) => {
                warn!(error = %e, selector = %selector, "Pod watch unavailable, relying on deletion deadline");
                None
            }
        };

        let params = DeleteParams::background().grace_period(self.grace_period_seconds);
        if let Err(source) = self.client.delete_pod(&namespace, &name, &params).await {
            return Err(ReconcileError::DeleteFailed {
                namespace,
                name,
                source,
            });
        }
        debug!(grace_period = self.grace_period_seconds, "Deleted old pod");

        let signal = self.await_deletion(&namespace, &name, events).await;
        debug!(%signal, "Old pod gone, recreating");

        match self
            .client
            .create_pod(&namespace, &pod, &PostParams::default())
            .await
        {
            Ok(_) => Ok(Reconciled::Replaced {
                namespace,
                name,
                signal,
            }),
            Err(source) => Err(ReconcileError::RecreateFailed {
                namespace,
                name,
                source,
            }),
        }
    }

    /// Server-side dry run of the new spec under a name that cannot collide
    /// with the Pod being replaced. The clone is never persisted.
    async fn dry_run(&self, namespace: &str, name: &str, pod: &Pod) -> Result<(), ClusterError> {
        let mut clone = pod.clone();
        clone.metadata.name = Some(format!("{}{}", name, VALIDATION_SUFFIX));
        let params = PostParams {
            dry_run: true,
            ..Default::default()
        };
        self.client.create_pod(namespace, &clone, &params).await?;
        Ok(())
    }

    /// Wait for the deleted Pod to disappear. Always returns by the deadline;
    /// a broken or missing watch only means we wait for the deadline.
    async fn await_deletion(
        &self,
        namespace: &str,
        name: &str,
        mut events: Option<PodEventStream>,
    ) -> DeletionSignal {
        let deadline = Instant::now() + self.deletion_wait;
        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);

        loop {
            let next = match events.as_mut() {
                Some(stream) => tokio::select! {
                    _ = &mut timeout => return DeletionSignal::TimedOut,
                    event = stream.next() => event,
                },
                None => {
                    timeout.as_mut().await;
                    return DeletionSignal::TimedOut;
                }
            };

            match next {
                Some(Ok(PodWatchEvent::Deleted(pod)))
                    if pod.metadata.name.as_deref() == Some(name) =>
                {
                    return DeletionSignal::DeletedEvent;
                }
                Some(Ok(PodWatchEvent::Error(message))) => {
                    warn!(%message, "Pod watch reported an error, waiting for deadline");
                    events = None;
                }
                Some(Ok(event)) => {
                    debug!(event_pod = ?event.pod_name(), "Pod watch event, probing");
                    match tokio::time::timeout_at(deadline, self.probe_absent(namespace, name)).await {
                        Ok(true) => return DeletionSignal::ProbedAbsent,
                        Ok(false) => {}
                        Err(_) => return DeletionSignal::TimedOut,
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Pod watch failed, waiting for deadline");
                    events = None;
                }
                None => {
                    debug!("Pod watch ended, waiting for deadline");
                    events = None;
                }
            }
        }
    }

    /// Get is the ground truth; a watch event is only a hint to look.
    async fn probe_absent(&self, namespace: &str, name: &str) -> bool {
        match self.client.get_pod(namespace, name).await {
            Ok(found) => found.is_none(),
            Err(e) => {
                debug!(error = %e, "Probe failed, still waiting");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::client::MockClusterClient;
    use crate::models::pod::{Base, Container, ListMapItem};
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures::stream;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use kube::api::PropagationPolicy;
    use mockall::Sequence;

    fn request() -> PodRequest {
        PodRequest {
            base: Base {
                name: "web-1".to_string(),
                namespace: "ns".to_string(),
                labels: vec![ListMapItem::new("app", "web")],
                ..Default::default()
            },
            containers: vec![Container {
                name: "main".to_string(),
                image: "nginx:1.26".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn pod_named(name: &str, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                labels: (!labels.is_empty()).then(|| {
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                }),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn existing() -> Pod {
        pod_named("web-1", &[("app", "web")])
    }

    fn is_named(pod: &Pod, name: &str) -> bool {
        pod.metadata.name.as_deref() == Some(name)
    }

    fn reconciler(mock: MockClusterClient) -> PodReconciler {
        PodReconciler::new(Arc::new(mock))
    }

    /// Expectations shared by every replace-path test up to the delete
    fn expect_validated_replace(mock: &mut MockClusterClient, seq: &mut Sequence) {
        mock.expect_get_pod()
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(Some(existing())));
        mock.expect_create_pod()
            .withf(|_, pod, params| params.dry_run && is_named(pod, "web-1-validate"))
            .times(1)
            .in_sequence(seq)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));
    }

    /// Delete succeeds and the recreate is accepted
    fn expect_delete_and_recreate(mock: &mut MockClusterClient) {
        mock.expect_delete_pod()
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));
    }

    fn timed_out(result: &Reconciled) -> bool {
        matches!(
            result,
            Reconciled::Replaced {
                signal: DeletionSignal::TimedOut,
                ..
            }
        )
    }

    /// Delegates to a mock, except that every lookup after the first never
    /// answers within the test's horizon
    struct StalledLookups {
        inner: MockClusterClient,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ClusterClient for StalledLookups {
        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }
            self.inner.get_pod(namespace, name).await
        }

        async fn create_pod(
            &self,
            namespace: &str,
            pod: &Pod,
            params: &PostParams,
        ) -> Result<Pod, ClusterError> {
            self.inner.create_pod(namespace, pod, params).await
        }

        async fn delete_pod(
            &self,
            namespace: &str,
            name: &str,
            params: &DeleteParams,
        ) -> Result<(), ClusterError> {
            self.inner.delete_pod(namespace, name, params).await
        }

        async fn watch_pods(
            &self,
            namespace: &str,
            label_selector: &str,
            resource_version: &str,
        ) -> Result<PodEventStream, ClusterError> {
            self.inner
                .watch_pods(namespace, label_selector, resource_version)
                .await
        }

        async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
            self.inner.list_pods(namespace).await
        }

        async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
            self.inner.list_namespaces().await
        }

        async fn health_check(&self) -> Result<String, ClusterError> {
            self.inner.health_check().await
        }
    }

    #[test]
    fn test_label_selector() {
        let labels: BTreeMap<String, String> = [
            ("tier".to_string(), "frontend".to_string()),
            ("app".to_string(), "web".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(label_selector(Some(&labels)), "app=web,tier=frontend");
        assert_eq!(label_selector(None), "");
        assert_eq!(label_selector(Some(&BTreeMap::new())), "");
    }

    #[tokio::test]
    async fn test_creates_directly_when_absent() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_pod()
            .times(1)
            .returning(|_, _| Ok(None));
        mock.expect_create_pod()
            .withf(|ns, pod, params| ns == "ns" && !params.dry_run && is_named(pod, "web-1"))
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));
        mock.expect_delete_pod().never();
        mock.expect_watch_pods().never();

        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        assert_eq!(
            result,
            Reconciled::Created {
                namespace: "ns".to_string(),
                name: "web-1".to_string()
            }
        );
        assert!(result.message().contains("namespace=ns,name=web-1"));
    }

    #[tokio::test]
    async fn test_direct_create_failure() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_pod().returning(|_, _| Ok(None));
        mock.expect_create_pod()
            .times(1)
            .returning(|_, _, _| Err(ClusterError::api(422, "Invalid", "spec.containers: Required value")));

        let err = reconciler(mock).reconcile(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::CreateFailed { .. }));
        assert_eq!(err.operation(), "create");
        assert_eq!(err.cause().code(), Some(422));
    }

    #[tokio::test]
    async fn test_lookup_error_is_not_treated_as_absent() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_pod()
            .returning(|_, _| Err(ClusterError::api(403, "Forbidden", "pods is forbidden")));
        mock.expect_create_pod().never();

        let err = reconciler(mock).reconcile(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::LookupFailed { .. }));
        assert!(!err.pod_absent());
    }

    #[tokio::test]
    async fn test_rejected_dry_run_never_deletes() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_pod().returning(|_, _| Ok(Some(existing())));
        mock.expect_create_pod()
            .withf(|_, pod, params| params.dry_run && is_named(pod, "web-1-validate"))
            .times(1)
            .returning(|_, _, _| Err(ClusterError::api(422, "Invalid", "bad image")));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .never();
        mock.expect_watch_pods().never();
        mock.expect_delete_pod().never();

        let err = reconciler(mock).reconcile(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ValidationRejected { .. }));
        assert!(err.to_string().contains("left untouched"));
        assert!(!err.pod_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_event_triggers_recreate_before_deadline() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);

        let (tx, rx) = mpsc::unbounded();
        mock.expect_watch_pods()
            .withf(|ns, selector, version| ns == "ns" && selector == "app=web" && version == "42")
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _, _| Ok(rx.boxed()));
        mock.expect_delete_pod()
            .withf(|ns, name, params| {
                ns == "ns"
                    && name == "web-1"
                    && params.grace_period_seconds == Some(0)
                    && matches!(params.propagation_policy, Some(PropagationPolicy::Background))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        mock.expect_create_pod()
            .withf(|_, pod, params| !params.dry_run && is_named(pod, "web-1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            let _ = tx.unbounded_send(Ok(PodWatchEvent::Deleted(existing())));
        });

        let start = Instant::now();
        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(
            result,
            Reconciled::Replaced {
                namespace: "ns".to_string(),
                name: "web-1".to_string(),
                signal: DeletionSignal::DeletedEvent,
            }
        );
        assert!(elapsed >= Duration::from_millis(1200));
        assert!(elapsed < DEFAULT_DELETION_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_recreate_surfaces_already_exists() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(futures::stream::pending().boxed()));
        mock.expect_delete_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(ClusterError::already_exists("pods \"web-1\" already exists")));

        let start = Instant::now();
        let err = reconciler(mock).reconcile(&request()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, ReconcileError::RecreateFailed { .. }));
        assert!(err.pod_absent());
        assert!(err.to_string().contains("pod is currently absent"));
        assert!(err.cause().is_conflict());
        assert!(elapsed >= DEFAULT_DELETION_WAIT);
        assert!(elapsed < DEFAULT_DELETION_WAIT + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_skips_recreate() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods()
            .returning(|_, _, _| Ok(futures::stream::pending().boxed()));
        mock.expect_delete_pod()
            .times(1)
            .returning(|_, _, _| Err(ClusterError::not_found("pods \"web-1\" not found")));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .never();

        let err = reconciler(mock).reconcile(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DeleteFailed { .. }));
        assert_eq!(err.operation(), "delete");
        assert!(err.to_string().contains("namespace=ns,name=web-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_after_any_event_short_circuits_wait() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);

        let (tx, rx) = mpsc::unbounded();
        mock.expect_watch_pods()
            .return_once(move |_, _, _| Ok(rx.boxed()));
        mock.expect_delete_pod().returning(|_, _, _| Ok(()));
        // The Modified event for the terminating pod arrives; by then it is gone.
        mock.expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.unbounded_send(Ok(PodWatchEvent::Modified(existing())));
        });

        let start = Instant::now();
        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        assert!(matches!(
            result,
            Reconciled::Replaced {
                signal: DeletionSignal::ProbedAbsent,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_deletion_is_ignored() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        // Unlabelled pod: the watch covers the whole namespace.
        mock.expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(pod_named("web-1", &[]))));
        mock.expect_create_pod()
            .withf(|_, _, params| params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        let (tx, rx) = mpsc::unbounded();
        mock.expect_watch_pods()
            .withf(|_, selector, _| selector.is_empty())
            .return_once(move |_, _, _| Ok(rx.boxed()));
        mock.expect_delete_pod().returning(|_, _, _| Ok(()));
        // Probe triggered by the unrelated event still sees web-1.
        mock.expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(pod_named("web-1", &[]))));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.unbounded_send(Ok(PodWatchEvent::Deleted(pod_named("other", &[]))));
            // keep the stream open until after the deadline
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(tx);
        });

        let start = Instant::now();
        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        assert!(matches!(
            result,
            Reconciled::Replaced {
                signal: DeletionSignal::TimedOut,
                ..
            }
        ));
        assert!(start.elapsed() >= DEFAULT_DELETION_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_watch_falls_back_to_deadline() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods().returning(|_, _, _| {
            Ok(futures::stream::iter(vec![Err(ClusterError::Transport(
                "connection reset".to_string(),
            ))])
            .boxed())
        });
        mock.expect_delete_pod().returning(|_, _, _| Ok(()));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        let start = Instant::now();
        let result = reconciler(mock)
            .with_deletion_wait(Duration::from_secs(2))
            .reconcile(&request())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Reconciled::Replaced {
                signal: DeletionSignal::TimedOut,
                ..
            }
        ));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_open_failure_still_replaces() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods()
            .returning(|_, _, _| Err(ClusterError::api(403, "Forbidden", "watch is forbidden")));
        mock.expect_delete_pod()
            .withf(|_, _, params| params.grace_period_seconds == Some(30))
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(|_, pod, _| Ok(Pod::clone(pod)));

        let start = Instant::now();
        let result = reconciler(mock)
            .with_grace_period(30)
            .reconcile(&request())
            .await
            .unwrap();
        assert_eq!(result.action(), "replaced");
        assert!(start.elapsed() >= DEFAULT_DELETION_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_error_event_waits_out_deadline() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        // e.g. 410 Gone: the stream says nothing about our pod
        mock.expect_watch_pods().returning(|_, _, _| {
            Ok(stream::iter(vec![Ok(PodWatchEvent::Error(
                "too old resource version".to_string(),
            ))])
            .chain(stream::pending())
            .boxed())
        });
        expect_delete_and_recreate(&mut mock);

        let start = Instant::now();
        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        assert!(timed_out(&result));
        assert!(start.elapsed() >= DEFAULT_DELETION_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ending_immediately_waits_out_deadline() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods()
            .returning(|_, _, _| Ok(stream::empty().boxed()));
        expect_delete_and_recreate(&mut mock);

        let start = Instant::now();
        let result = reconciler(mock)
            .with_deletion_wait(Duration::from_secs(3))
            .reconcile(&request())
            .await
            .unwrap();
        assert!(timed_out(&result));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_after_event_keeps_waiting() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods().returning(|_, _, _| {
            Ok(stream::iter(vec![Ok(PodWatchEvent::Modified(existing()))])
                .chain(stream::pending())
                .boxed())
        });
        mock.expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ClusterError::Transport("connection refused".to_string())));
        expect_delete_and_recreate(&mut mock);

        let start = Instant::now();
        let result = reconciler(mock).reconcile(&request()).await.unwrap();
        assert!(timed_out(&result));
        assert!(start.elapsed() >= DEFAULT_DELETION_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_is_cut_off_at_deadline() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods().returning(|_, _, _| {
            Ok(stream::iter(vec![Ok(PodWatchEvent::Modified(existing()))])
                .chain(stream::pending())
                .boxed())
        });
        expect_delete_and_recreate(&mut mock);
        let client = StalledLookups {
            inner: mock,
            lookups: AtomicUsize::new(0),
        };

        let start = Instant::now();
        let result = PodReconciler::new(Arc::new(client))
            .reconcile(&request())
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(timed_out(&result));
        assert!(elapsed >= DEFAULT_DELETION_WAIT);
        assert!(elapsed < DEFAULT_DELETION_WAIT + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_finishes_after_caller_gives_up() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_validated_replace(&mut mock, &mut seq);
        mock.expect_watch_pods()
            .returning(|_, _, _| Ok(stream::pending().boxed()));
        mock.expect_delete_pod()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let recreated = Arc::new(AtomicUsize::new(0));
        let counter = recreated.clone();
        mock.expect_create_pod()
            .withf(|_, _, params| !params.dry_run)
            .times(1)
            .returning(move |_, pod, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Pod::clone(pod))
            });

        let reconciler = reconciler(mock);
        // The caller stops waiting one second into the deletion wait.
        let caller = tokio::time::timeout(Duration::from_secs(1), reconciler.spawn(request())).await;
        assert!(caller.is_err());
        assert_eq!(recreated.load(Ordering::SeqCst), 0);

        tokio::time::sleep(DEFAULT_DELETION_WAIT).await;
        assert_eq!(recreated.load(Ordering::SeqCst), 1);
    }
}
