//! Error types
//!
//! `ClusterError` is what the cluster client seam returns; `AppError` is what
//! HTTP handlers return and knows how to render itself as a response.

use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::api::response::ApiResponse;
use crate::k8s::ReconcileError;
use crate::models::ValidationError;

/// Error returned by the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server answered with a failure status
    #[error("{reason} ({code}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },
    /// The request never got an answer (connection, TLS, decoding, ...)
    #[error("cluster request failed: {0}")]
    Transport(String),
}

impl ClusterError {
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        ClusterError::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::api(404, "NotFound", message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::api(409, "AlreadyExists", message)
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            ClusterError::Api { code, .. } => Some(*code),
            ClusterError::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == Some(409)
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => ClusterError::Api {
                code: resp.code,
                reason: resp.reason,
                message: resp.message,
            },
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Error returned by HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn unavailable(msg: &str) -> Self {
        AppError::Unavailable(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    /// Machine readable code placed in the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Cluster(e) if e.is_not_found() => "NOT_FOUND",
            AppError::Cluster(e) if e.is_conflict() => "CONFLICT",
            AppError::Cluster(_) => "KUBERNETES_ERROR",
            AppError::Reconcile(ReconcileError::ValidationRejected { .. }) => "VALIDATION_ERROR",
            AppError::Reconcile(_) => "RECONCILE_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation(e) => Some(json!({ "field": e.field })),
            AppError::Reconcile(e) => Some(json!({
                "namespace": e.namespace(),
                "name": e.name(),
                "operation": e.operation(),
                "podAbsent": e.pod_absent(),
            })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let response = match self.details() {
            Some(details) => ApiResponse::error_with_details(self.code(), message, details),
            None => ApiResponse::error(self.code(), message),
        };
        response.into_response()
    }
}
