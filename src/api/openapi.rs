//! OpenAPI documentation for the k8sadmin API

use utoipa::OpenApi;

use crate::models::pod;

/// API Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "k8sadmin API",
        version = "1.0.0",
        description = "Kubernetes admin back end.\n\n## Features\n- Create or replace Pods from a form-shaped spec\n- List, inspect and delete Pods\n- List namespaces",
        license(name = "MIT"),
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    tags(
        (name = "pods", description = "Pod create-or-replace, list, detail, delete"),
        (name = "namespaces", description = "Namespace listing"),
        (name = "cluster", description = "Process and cluster status"),
        (name = "metrics", description = "Prometheus metrics")
    ),
    paths(
        crate::api::pods::create_or_update,
        crate::api::pods::list,
        crate::api::pods::detail,
        crate::api::pods::delete,
        crate::api::namespaces::list,
        crate::api::health::health_check,
        crate::api::health::cluster_status,
        crate::api::metrics::metrics_handler,
    ),
    components(
        schemas(
            // Pod request
            pod::PodRequest,
            pod::Base,
            pod::ListMapItem,
            pod::Toleration,
            pod::NodeScheduling,
            pod::SchedulingType,
            pod::NodeSelectorTermExpression,
            pod::Volume,
            pod::VolumeType,
            pod::ConfigMapRefVolume,
            pod::SecretRefVolume,
            pod::HostPathVolume,
            pod::DownwardApiVolume,
            pod::DownwardApiVolumeItem,
            pod::PvcVolume,
            pod::Networking,
            pod::DnsConfig,
            pod::Container,
            pod::ContainerPort,
            pod::EnvVar,
            pod::EnvVarType,
            pod::EnvVarFromResource,
            pod::RefType,
            pod::Resources,
            pod::VolumeMount,
            pod::ContainerProbe,
            pod::ProbeType,
            pod::ProbeHttpGet,
            pod::ProbeTcpSocket,
            pod::ProbeCommand,
            // Responses
            crate::models::PodListItem,
            crate::models::NamespaceItem,
            crate::api::pods::ReconcileResponse,
            crate::api::pods::PodListResponse,
            crate::api::pods::PodDetailResponse,
            crate::api::pods::PodDeleteResponse,
            crate::api::namespaces::NamespaceListResponse,
            crate::api::health::HealthResponse,
            crate::api::health::ClusterStatusResponse,
            ErrorResponse,
            ErrorBody,
        )
    )
)]
pub struct ApiDoc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error envelope returned by the API
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// NOT_FOUND, VALIDATION_ERROR, UNAVAILABLE, RECONCILE_ERROR, ...
    #[schema(example = "RECONCILE_ERROR")]
    pub code: String,
    pub message: String,
    /// For reconcile failures: namespace, name, operation, podAbsent
    pub details: Option<serde_json::Value>,
}
