use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Namespace row in the namespace list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceItem {
    pub name: String,
    /// Unix seconds
    pub creation_timestamp: i64,
    /// Active | Terminating
    pub status: String,
}
