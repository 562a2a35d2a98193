use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Pod row in the list view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PodListItem {
    pub name: String,
    /// "ready/total" containers
    pub ready: String,
    /// Running | Error
    pub status: String,
    pub restarts: i32,
    /// Creation time, unix seconds
    pub age: i64,
    #[serde(rename = "IP")]
    pub ip: String,
    pub node: String,
}

/// Query parameters of the Pod list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodListQuery {
    /// Substring the Pod name must contain
    pub keyword: String,
    /// Only Pods scheduled on this node
    pub node_name: String,
}

impl PodListQuery {
    pub fn matches(&self, item: &PodListItem) -> bool {
        if !self.node_name.is_empty() && item.node != self.node_name {
            return false;
        }
        item.name.contains(&self.keyword)
    }
}
