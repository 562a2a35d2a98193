use axum::extract::State;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::AppResult;
use crate::k8s::namespace_item;
use crate::models::NamespaceItem;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NamespaceListResponse {
    pub namespaces: Vec<NamespaceItem>,
}

/// List cluster namespaces
#[utoipa::path(
    get,
    path = "/api/v1/k8s/namespace",
    tag = "namespaces",
    responses(
        (status = 200, description = "Namespaces", body = NamespaceListResponse),
        (status = 503, description = "No cluster connection"),
    )
)]
pub async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<NamespaceListResponse>> {
    let cluster = state.cluster().await?;

    let namespaces = cluster
        .list_namespaces()
        .await?
        .iter()
        .map(namespace_item)
        .collect();

    Ok(ApiResponse::success(NamespaceListResponse { namespaces }))
}
