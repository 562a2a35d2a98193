//! Cluster objects back into the admin UI's shapes
//!
//! The inverse of [`super::resources`], used by the list and detail endpoints.
//! Volumes the request model cannot express are dropped, along with any
//! mounts that point at them.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{self as corev1, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use crate::models::pod::*;
use crate::models::{NamespaceItem, PodListItem};

/// Summarize a Pod for the list view
pub fn pod_list_item(pod: &Pod) -> PodListItem {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let total = statuses.len();
    let ready = statuses.iter().filter(|s| s.ready).count();
    let restarts = statuses.iter().map(|s| s.restart_count).sum();

    let running = pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");

    PodListItem {
        name: pod.metadata.name.clone().unwrap_or_default(),
        ready: format!("{}/{}", ready, total),
        status: if running { "Running" } else { "Error" }.to_string(),
        restarts,
        age: pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.timestamp())
            .unwrap_or_default(),
        ip: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        node: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default(),
    }
}

pub fn namespace_item(namespace: &Namespace) -> NamespaceItem {
    NamespaceItem {
        name: namespace.metadata.name.clone().unwrap_or_default(),
        creation_timestamp: namespace
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.timestamp())
            .unwrap_or_default(),
        status: namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
    }
}

/// Translate a Pod into the request shape, for the detail view
///
/// Lossy where the request model is narrower than the Pod: cpu and memory
/// quantities that do not parse come back as 0 (logged at debug), as do
/// named probe ports. Memory below 1Mi rounds down to 0.
pub fn pod_request(pod: &Pod) -> PodRequest {
    let spec = pod.spec.clone().unwrap_or_default();

    let volumes: Vec<Volume> = spec
        .volumes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(describe_volume)
        .collect();
    let known_volumes: HashSet<&str> = volumes.iter().map(|v| v.name.as_str()).collect();

    let containers = |list: &[corev1::Container]| -> Vec<Container> {
        list.iter()
            .map(|c| describe_container(c, &known_volumes))
            .collect()
    };

    PodRequest {
        base: Base {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            labels: pod
                .metadata
                .labels
                .iter()
                .flatten()
                .map(|(k, v)| ListMapItem::new(k.clone(), v.clone()))
                .collect(),
            restart_policy: spec.restart_policy.clone().unwrap_or_default(),
        },
        tolerations: spec
            .tolerations
            .iter()
            .flatten()
            .map(|t| Toleration {
                key: t.key.clone().unwrap_or_default(),
                operator: t.operator.clone().unwrap_or_default(),
                value: t.value.clone().unwrap_or_default(),
                effect: t.effect.clone().unwrap_or_default(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
        node_scheduling: describe_scheduling(&spec),
        init_containers: containers(spec.init_containers.as_deref().unwrap_or_default()),
        containers: containers(&spec.containers),
        networking: describe_networking(&spec),
        volumes,
    }
}

/// Node selector wins over affinity, which wins over a pinned node name
fn describe_scheduling(spec: &corev1::PodSpec) -> NodeScheduling {
    if let Some(selector) = &spec.node_selector {
        return NodeScheduling {
            type_: SchedulingType::NodeSelector,
            node_selector: selector
                .iter()
                .map(|(k, v)| ListMapItem::new(k.clone(), v.clone()))
                .collect(),
            ..Default::default()
        };
    }

    let first_term = spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|n| n.required_during_scheduling_ignored_during_execution.as_ref())
        .and_then(|s| s.node_selector_terms.first());
    if let Some(term) = first_term {
        return NodeScheduling {
            type_: SchedulingType::NodeAffinity,
            node_affinity: term
                .match_expressions
                .iter()
                .flatten()
                .map(|expr| NodeSelectorTermExpression {
                    key: expr.key.clone(),
                    operator: expr.operator.clone(),
                    value: expr.values.as_deref().unwrap_or_default().join(","),
                })
                .collect(),
            ..Default::default()
        };
    }

    match spec.node_name.as_deref() {
        Some(node) if !node.is_empty() => NodeScheduling {
            type_: SchedulingType::NodeName,
            node_name: node.to_string(),
            ..Default::default()
        },
        _ => NodeScheduling::default(),
    }
}

fn describe_networking(spec: &corev1::PodSpec) -> Networking {
    Networking {
        host_network: spec.host_network.unwrap_or(false),
        host_name: spec.hostname.clone().unwrap_or_default(),
        dns_policy: spec.dns_policy.clone().unwrap_or_default(),
        dns_config: DnsConfig {
            nameservers: spec
                .dns_config
                .as_ref()
                .and_then(|c| c.nameservers.clone())
                .unwrap_or_default(),
        },
        host_aliases: spec
            .host_aliases
            .iter()
            .flatten()
            .map(|alias| {
                ListMapItem::new(
                    alias.ip.clone().unwrap_or_default(),
                    alias.hostnames.as_deref().unwrap_or_default().join(","),
                )
            })
            .collect(),
    }
}

fn describe_volume(volume: &corev1::Volume) -> Option<Volume> {
    let mut described = Volume {
        name: volume.name.clone(),
        ..Default::default()
    };

    if volume.empty_dir.is_some() {
        described.type_ = VolumeType::EmptyDir;
    } else if let Some(cm) = &volume.config_map {
        described.type_ = VolumeType::ConfigMap;
        described.config_map_ref_volume = ConfigMapRefVolume {
            name: cm.name.clone().unwrap_or_default(),
            optional: cm.optional.unwrap_or(false),
        };
    } else if let Some(secret) = &volume.secret {
        described.type_ = VolumeType::Secret;
        described.secret_ref_volume = SecretRefVolume {
            name: secret.secret_name.clone().unwrap_or_default(),
            optional: secret.optional.unwrap_or(false),
        };
    } else if let Some(host_path) = &volume.host_path {
        described.type_ = VolumeType::HostPath;
        described.host_path_volume = HostPathVolume {
            type_: host_path.type_.clone().unwrap_or_default(),
            path: host_path.path.clone(),
        };
    } else if let Some(pvc) = &volume.persistent_volume_claim {
        described.type_ = VolumeType::Pvc;
        described.pvc_volume = PvcVolume {
            name: pvc.claim_name.clone(),
        };
    } else if let Some(downward) = &volume.downward_api {
        described.type_ = VolumeType::Downward;
        described.downward_api_volume = DownwardApiVolume {
            items: downward
                .items
                .iter()
                .flatten()
                .filter_map(|item| {
                    item.field_ref.as_ref().map(|field| DownwardApiVolumeItem {
                        path: item.path.clone(),
                        field_ref_path: field.field_path.clone(),
                    })
                })
                .collect(),
        };
    } else {
        // projected, csi, nfs, ...
        return None;
    }

    Some(described)
}

fn describe_container(container: &corev1::Container, known_volumes: &HashSet<&str>) -> Container {
    Container {
        name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        image_pull_policy: container.image_pull_policy.clone().unwrap_or_default(),
        tty: container.tty.unwrap_or(false),
        ports: container
            .ports
            .iter()
            .flatten()
            .map(|p| ContainerPort {
                name: p.name.clone().unwrap_or_default(),
                container_port: p.container_port,
                host_port: p.host_port.unwrap_or_default(),
            })
            .collect(),
        working_dir: container.working_dir.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        args: container.args.clone().unwrap_or_default(),
        envs: container.env.iter().flatten().map(describe_env_var).collect(),
        envs_from: container
            .env_from
            .iter()
            .flatten()
            .map(describe_env_from)
            .collect(),
        privileged: container
            .security_context
            .as_ref()
            .and_then(|sc| sc.privileged)
            .unwrap_or(false),
        resources: describe_resources(container.resources.as_ref()),
        volume_mounts: container
            .volume_mounts
            .iter()
            .flatten()
            .filter(|m| known_volumes.contains(m.name.as_str()))
            .map(|m| VolumeMount {
                mount_name: m.name.clone(),
                mount_path: m.mount_path.clone(),
                read_only: m.read_only.unwrap_or(false),
            })
            .collect(),
        startup_probe: describe_probe(container.startup_probe.as_ref()),
        liveness_probe: describe_probe(container.liveness_probe.as_ref()),
        readiness_probe: describe_probe(container.readiness_probe.as_ref()),
    }
}

fn describe_env_var(env: &corev1::EnvVar) -> EnvVar {
    let source = env.value_from.as_ref();
    if let Some(cm) = source.and_then(|s| s.config_map_key_ref.as_ref()) {
        return EnvVar {
            name: env.name.clone(),
            ref_name: cm.name.clone().unwrap_or_default(),
            value: cm.key.clone(),
            type_: EnvVarType::ConfigMap,
        };
    }
    if let Some(secret) = source.and_then(|s| s.secret_key_ref.as_ref()) {
        return EnvVar {
            name: env.name.clone(),
            ref_name: secret.name.clone().unwrap_or_default(),
            value: secret.key.clone(),
            type_: EnvVarType::Secret,
        };
    }
    EnvVar {
        name: env.name.clone(),
        value: env.value.clone().unwrap_or_default(),
        type_: EnvVarType::Default,
        ..Default::default()
    }
}

fn describe_env_from(source: &corev1::EnvFromSource) -> EnvVarFromResource {
    let (ref_type, name) = match (&source.config_map_ref, &source.secret_ref) {
        (Some(cm), _) => (RefType::ConfigMap, cm.name.clone()),
        (None, Some(secret)) => (RefType::Secret, secret.name.clone()),
        (None, None) => (RefType::default(), None),
    };
    EnvVarFromResource {
        name: name.unwrap_or_default(),
        ref_type,
        prefix: source.prefix.clone().unwrap_or_default(),
    }
}

fn describe_resources(requirements: Option<&corev1::ResourceRequirements>) -> Resources {
    let Some(requirements) = requirements else {
        return Resources::default();
    };
    let mut resources = Resources::default();

    if let Some(requests) = &requirements.requests {
        resources.enable = true;
        resources.cpu_request = requests.get("cpu").map(cpu_millis).unwrap_or_default();
        resources.mem_request = requests.get("memory").map(memory_mib).unwrap_or_default();
    }
    if let Some(limits) = &requirements.limits {
        resources.enable = true;
        resources.cpu_limit = limits.get("cpu").map(cpu_millis).unwrap_or_default();
        resources.mem_limit = limits.get("memory").map(memory_mib).unwrap_or_default();
    }
    resources
}

fn describe_probe(probe: Option<&corev1::Probe>) -> ContainerProbe {
    let Some(probe) = probe else {
        return ContainerProbe::default();
    };

    let mut described = ContainerProbe {
        enable: true,
        initial_delay_seconds: probe.initial_delay_seconds.unwrap_or_default(),
        period_seconds: probe.period_seconds.unwrap_or_default(),
        timeout_seconds: probe.timeout_seconds.unwrap_or_default(),
        success_threshold: probe.success_threshold.unwrap_or_default(),
        failure_threshold: probe.failure_threshold.unwrap_or_default(),
        ..Default::default()
    };

    if let Some(exec) = &probe.exec {
        described.type_ = ProbeType::Exec;
        described.exec.command = exec.command.clone().unwrap_or_default();
    } else if let Some(http) = &probe.http_get {
        described.type_ = ProbeType::Http;
        described.http_get = ProbeHttpGet {
            scheme: http.scheme.clone().unwrap_or_default(),
            host: http.host.clone().unwrap_or_default(),
            path: http.path.clone().unwrap_or_default(),
            port: port_number(&http.port),
            http_headers: http
                .http_headers
                .iter()
                .flatten()
                .map(|h| ListMapItem::new(h.name.clone(), h.value.clone()))
                .collect(),
        };
    } else if let Some(tcp) = &probe.tcp_socket {
        described.type_ = ProbeType::Tcp;
        described.tcp_socket = ProbeTcpSocket {
            host: tcp.host.clone().unwrap_or_default(),
            port: port_number(&tcp.port),
        };
    }

    described
}

/// Named ports have no number in the request model
fn port_number(port: &IntOrString) -> i32 {
    match port {
        IntOrString::Int(n) => *n,
        IntOrString::String(s) => s.parse().unwrap_or_default(),
    }
}

/// CPU quantity in millicores: "250m", "1", "0.5". Unparseable is 0.
fn cpu_millis(quantity: &Quantity) -> i32 {
    let value = quantity.0.trim();
    let millis = match value.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().ok(),
        None => value.parse::<f64>().ok().map(|cores| cores * 1000.0),
    };
    match millis {
        Some(millis) => millis.round() as i32,
        None => {
            debug!(quantity = %value, "Unparseable cpu quantity, showing 0");
            0
        }
    }
}

/// Memory quantity in MiB: "128Mi", "1Gi", "500M", "134217728". Unparseable is 0.
fn memory_mib(quantity: &Quantity) -> i32 {
    const MIB: f64 = 1024.0 * 1024.0;
    let value = quantity.0.trim();

    let suffixes: [(&str, f64); 14] = [
        ("Ki", 1024.0),
        ("Mi", MIB),
        ("Gi", MIB * 1024.0),
        ("Ti", MIB * 1024.0 * 1024.0),
        ("Pi", MIB * 1024.0 * 1024.0 * 1024.0),
        ("Ei", MIB * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
        ("", 1.0),
    ];

    for (suffix, multiplier) in suffixes {
        if let Some(number) = value.strip_suffix(suffix) {
            if let Ok(n) = number.parse::<f64>() {
                return (n * multiplier / MIB) as i32;
            }
        }
    }
    debug!(quantity = %value, "Unparseable memory quantity, showing 0");
    0
}
