//! k8sadmin Backend Library
//!
//! HTTP front end for a Kubernetes admin UI. The interesting part is Pod
//! create-or-replace, see [`k8s::PodReconciler`].

pub mod api;
pub mod config;
pub mod error;
pub mod k8s;
pub mod models;

use axum::http::{header, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api::openapi::ApiDoc;
use crate::api::AppState;
use crate::config::Config;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/api/cluster/status", get(api::health::cluster_status))
        // Pods
        .route("/api/v1/k8s/pod", post(api::pods::create_or_update))
        .route("/api/v1/k8s/pod/:namespace", get(api::pods::list))
        .route(
            "/api/v1/k8s/pod/:namespace/:name",
            get(api::pods::detail).delete(api::pods::delete),
        )
        // Namespaces
        .route("/api/v1/k8s/namespace", get(api::namespaces::list))
        // Metrics (Prometheus)
        .route("/metrics", get(api::metrics::metrics_handler))
        // OpenAPI
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Create CORS layer from the configured origin list
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .filter_map(|s| s.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
}
