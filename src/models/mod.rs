mod namespace;
pub mod pod;
mod pod_list;

pub use namespace::NamespaceItem;
pub use pod::{PodRequest, ValidationError};
pub use pod_list::{PodListItem, PodListQuery};
