use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ClusterStatusResponse {
    pub connected: bool,
    pub message: String,
    /// API server version, when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "cluster",
    responses(
        (status = 200, description = "Process is up", body = HealthResponse),
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get Kubernetes cluster connection status
#[utoipa::path(
    get,
    path = "/api/cluster/status",
    tag = "cluster",
    responses(
        (status = 200, description = "Cluster status", body = ClusterStatusResponse),
    )
)]
pub async fn cluster_status(State(state): State<AppState>) -> Json<ClusterStatusResponse> {
    let cluster = state.cluster.read().await.clone();

    let response = match cluster {
        Some(client) => match client.health_check().await {
            Ok(version) => ClusterStatusResponse {
                connected: true,
                message: "Kubernetes cluster connected".to_string(),
                version: Some(version),
            },
            Err(e) => ClusterStatusResponse {
                connected: false,
                message: format!("Kubernetes cluster unhealthy: {}", e),
                version: None,
            },
        },
        None => ClusterStatusResponse {
            connected: false,
            message: "Kubernetes cluster not available".to_string(),
            version: None,
        },
    };

    Json(response)
}
