//! Pod request model
//!
//! The JSON shape accepted by `POST /api/v1/k8s/pod` and returned by the
//! detail endpoint. Field names follow the admin UI's camelCase contract.

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use utoipa::ToSchema;

/// Suffix appended to a Pod name for the dry-run validation clone
pub const VALIDATION_SUFFIX: &str = "-validate";

/// Longest Pod name accepted, leaving room for the validation suffix
pub const MAX_POD_NAME_LEN: usize = 63 - VALIDATION_SUFFIX.len();

/// Generic key/value pair used for labels, selectors, headers and host aliases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListMapItem {
    pub key: String,
    pub value: String,
}

impl ListMapItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Base {
    pub name: String,
    pub namespace: String,
    pub labels: Vec<ListMapItem>,
    /// Always | Never | OnFailure
    pub restart_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    pub value: String,
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
pub enum SchedulingType {
    #[default]
    #[serde(rename = "nodeAny")]
    #[strum(serialize = "nodeAny")]
    NodeAny,
    #[serde(rename = "nodeName")]
    #[strum(serialize = "nodeName")]
    NodeName,
    #[serde(rename = "nodeSelector")]
    #[strum(serialize = "nodeSelector")]
    NodeSelector,
    #[serde(rename = "nodeAffinity")]
    #[strum(serialize = "nodeAffinity")]
    NodeAffinity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct NodeSelectorTermExpression {
    pub key: String,
    /// In | NotIn | Exists | DoesNotExist | Gt | Lt
    pub operator: String,
    /// Comma separated values
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeScheduling {
    #[serde(rename = "type")]
    pub type_: SchedulingType,
    pub node_name: String,
    pub node_selector: Vec<ListMapItem>,
    pub node_affinity: Vec<NodeSelectorTermExpression>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
pub enum VolumeType {
    #[default]
    #[serde(rename = "emptyDir")]
    #[strum(serialize = "emptyDir")]
    EmptyDir,
    #[serde(rename = "configMap")]
    #[strum(serialize = "configMap")]
    ConfigMap,
    #[serde(rename = "secret")]
    #[strum(serialize = "secret")]
    Secret,
    #[serde(rename = "hostPath")]
    #[strum(serialize = "hostPath")]
    HostPath,
    #[serde(rename = "downward")]
    #[strum(serialize = "downward")]
    Downward,
    #[serde(rename = "pvc")]
    #[strum(serialize = "pvc")]
    Pvc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ConfigMapRefVolume {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SecretRefVolume {
    pub name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HostPathVolume {
    /// DirectoryOrCreate, Directory, FileOrCreate, File, Socket, ...
    #[serde(rename = "type")]
    pub type_: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct DownwardApiVolumeItem {
    pub path: String,
    pub field_ref_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DownwardApiVolume {
    pub items: Vec<DownwardApiVolumeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PvcVolume {
    /// Claim name
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: VolumeType,
    pub config_map_ref_volume: ConfigMapRefVolume,
    pub secret_ref_volume: SecretRefVolume,
    pub host_path_volume: HostPathVolume,
    #[serde(rename = "downwardAPIVolume")]
    pub downward_api_volume: DownwardApiVolume,
    #[serde(rename = "PVCVolume")]
    pub pvc_volume: PvcVolume,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DnsConfig {
    pub nameservers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Networking {
    pub host_network: bool,
    pub host_name: String,
    pub dns_policy: String,
    pub dns_config: DnsConfig,
    /// key = IP, value = comma separated hostnames
    pub host_aliases: Vec<ListMapItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: i32,
    pub host_port: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RefType {
    #[default]
    ConfigMap,
    Secret,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EnvVarType {
    /// Plain key/value
    #[default]
    Default,
    ConfigMap,
    Secret,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    /// ConfigMap or Secret name when `type` is a reference
    pub ref_name: String,
    /// Literal value, or the referenced key
    pub value: String,
    #[serde(rename = "type")]
    pub type_: EnvVarType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvVarFromResource {
    pub name: String,
    pub ref_type: RefType,
    pub prefix: String,
}

/// Container quotas. Memory in MiB, CPU in millicores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Resources {
    pub enable: bool,
    pub mem_request: i32,
    pub mem_limit: i32,
    pub cpu_request: i32,
    pub cpu_limit: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeMount {
    pub mount_name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProbeType {
    #[default]
    Http,
    Tcp,
    Exec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeHttpGet {
    /// HTTP | HTTPS
    pub scheme: String,
    /// Empty means the Pod IP
    pub host: String,
    pub path: String,
    pub port: i32,
    pub http_headers: Vec<ListMapItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ProbeCommand {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ProbeTcpSocket {
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerProbe {
    pub enable: bool,
    #[serde(rename = "type")]
    pub type_: ProbeType,
    pub http_get: ProbeHttpGet,
    pub exec: ProbeCommand,
    pub tcp_socket: ProbeTcpSocket,
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
    pub timeout_seconds: i32,
    pub success_threshold: i32,
    pub failure_threshold: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    pub tty: bool,
    pub ports: Vec<ContainerPort>,
    pub working_dir: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub envs: Vec<EnvVar>,
    pub envs_from: Vec<EnvVarFromResource>,
    pub privileged: bool,
    pub resources: Resources,
    pub volume_mounts: Vec<VolumeMount>,
    pub startup_probe: ContainerProbe,
    pub liveness_probe: ContainerProbe,
    pub readiness_probe: ContainerProbe,
}

/// Desired Pod, as submitted by the admin UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PodRequest {
    pub base: Base,
    pub tolerations: Vec<Toleration>,
    pub node_scheduling: NodeScheduling,
    pub volumes: Vec<Volume>,
    #[serde(rename = "netWorking")]
    pub networking: Networking,
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
}

/// A request field that failed validation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl PodRequest {
    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn namespace(&self) -> &str {
        &self.base.namespace
    }

    /// Check the fields the cluster would otherwise reject late, after a
    /// destructive step may already have happened.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_dns_label("base.name", &self.base.name, MAX_POD_NAME_LEN)?;
        validate_dns_label("base.namespace", &self.base.namespace, 63)?;

        if self.containers.is_empty() {
            return Err(ValidationError::new(
                "containers",
                "at least one container is required",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let all = self
            .init_containers
            .iter()
            .map(|c| ("initContainers", c))
            .chain(self.containers.iter().map(|c| ("containers", c)));

        for (group, container) in all {
            if container.name.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("{}.name", group),
                    "container name is required",
                ));
            }
            if !seen.insert(container.name.as_str()) {
                return Err(ValidationError::new(
                    format!("{}.name", group),
                    format!("duplicate container name '{}'", container.name),
                ));
            }
            if container.image.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("{}[{}].image", group, container.name),
                    "container image is required",
                ));
            }
            for mount in &container.volume_mounts {
                if !self.volumes.iter().any(|v| v.name == mount.mount_name) {
                    return Err(ValidationError::new(
                        format!("{}[{}].volumeMounts", group, container.name),
                        format!("volume '{}' is not declared", mount.mount_name),
                    ));
                }
            }
        }

        if self.node_scheduling.type_ == SchedulingType::NodeName
            && self.node_scheduling.node_name.trim().is_empty()
        {
            return Err(ValidationError::new(
                "nodeScheduling.nodeName",
                "nodeName scheduling requires a node name",
            ));
        }

        Ok(())
    }
}

fn validate_dns_label(field: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || value.starts_with('-') || value.ends_with('-') {
        return Err(ValidationError::new(
            field,
            "must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}
