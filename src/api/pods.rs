//! Pod endpoints under `/api/v1/k8s/pod`

use axum::{
    extract::{Path, Query, State},
    Json,
};
use kube::api::DeleteParams;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::k8s::{pod_list_item, pod_request, Reconciled};
use crate::models::{PodListItem, PodListQuery, PodRequest};

/// Outcome of a create-or-update
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    pub namespace: String,
    pub name: String,
    /// created | replaced
    #[schema(example = "replaced")]
    pub action: String,
    pub message: String,
}

impl From<Reconciled> for ReconcileResponse {
    fn from(done: Reconciled) -> Self {
        Self {
            namespace: done.namespace().to_string(),
            name: done.name().to_string(),
            action: done.action().to_string(),
            message: done.message(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodListResponse {
    pub pod_list: Vec<PodListItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PodDetailResponse {
    pub pod: PodRequest,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PodDeleteResponse {
    pub deleted: bool,
}

/// Create a Pod, or replace it when one already exists under the name
#[utoipa::path(
    post,
    path = "/api/v1/k8s/pod",
    tag = "pods",
    request_body = PodRequest,
    responses(
        (status = 200, description = "Pod created or replaced", body = ReconcileResponse),
        (status = 400, description = "Request invalid or rejected by the cluster's dry run"),
        (status = 500, description = "Cluster call failed; details.podAbsent tells whether the Pod is gone"),
        (status = 503, description = "No cluster connection"),
    )
)]
pub async fn create_or_update(
    State(state): State<AppState>,
    Json(req): Json<PodRequest>,
) -> AppResult<ApiResponse<ReconcileResponse>> {
    req.validate()?;

    let reconciler = state.reconciler().await?;
    // A client disconnect drops this future; the replace keeps going on its task.
    let done = reconciler
        .spawn(req)
        .await
        .map_err(|e| AppError::internal(&format!("Pod reconcile task failed: {}", e)))??;

    Ok(ApiResponse::success(done.into()))
}

/// List Pods in a namespace
#[utoipa::path(
    get,
    path = "/api/v1/k8s/pod/{namespace}",
    tag = "pods",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("keyword" = Option<String>, Query, description = "Substring of the Pod name"),
        ("nodeName" = Option<String>, Query, description = "Only Pods on this node"),
    ),
    responses(
        (status = 200, description = "Pod rows", body = PodListResponse),
        (status = 503, description = "No cluster connection"),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<PodListQuery>,
) -> AppResult<ApiResponse<PodListResponse>> {
    let cluster = state.cluster().await?;

    let pod_list = cluster
        .list_pods(&namespace)
        .await?
        .iter()
        .map(pod_list_item)
        .filter(|item| query.matches(item))
        .collect();

    Ok(ApiResponse::success(PodListResponse { pod_list }))
}

/// Get a Pod, in the same shape the create endpoint accepts
#[utoipa::path(
    get,
    path = "/api/v1/k8s/pod/{namespace}/{name}",
    tag = "pods",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Pod name"),
    ),
    responses(
        (status = 200, description = "Pod detail", body = PodDetailResponse),
        (status = 404, description = "Pod not found"),
        (status = 503, description = "No cluster connection"),
    )
)]
pub async fn detail(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> AppResult<ApiResponse<PodDetailResponse>> {
    let cluster = state.cluster().await?;

    let pod = cluster
        .get_pod(&namespace, &name)
        .await?
        .ok_or_else(|| AppError::not_found(&format!("Pod {}/{} not found", namespace, name)))?;

    Ok(ApiResponse::success(PodDetailResponse {
        pod: pod_request(&pod),
    }))
}

/// Delete a Pod
#[utoipa::path(
    delete,
    path = "/api/v1/k8s/pod/{namespace}/{name}",
    tag = "pods",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Pod name"),
    ),
    responses(
        (status = 200, description = "Pod deleted", body = PodDeleteResponse),
        (status = 404, description = "Pod not found"),
        (status = 503, description = "No cluster connection"),
    )
)]
pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> AppResult<ApiResponse<PodDeleteResponse>> {
    let cluster = state.cluster().await?;

    let params = DeleteParams::background().grace_period(state.config.pod_delete_grace_period_secs);
    cluster
        .delete_pod(&namespace, &name, &params)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::not_found(&format!("Pod {}/{} not found", namespace, name))
            } else {
                e.into()
            }
        })?;

    info!(namespace = %namespace, name = %name, "Pod deleted via API");
    Ok(ApiResponse::success(PodDeleteResponse { deleted: true }))
}
