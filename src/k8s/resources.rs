//! Kubernetes resource builders for k8sadmin
//!
//! Translates the admin UI's [`PodRequest`] into the Pod object the API server
//! accepts. Pure field mapping, no I/O.

use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapEnvSource, ConfigMapKeySelector, ConfigMapVolumeSource, Container,
    ContainerPort, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EmptyDirVolumeSource,
    EnvFromSource, EnvVar, EnvVarSource, ExecAction, HTTPGetAction, HTTPHeader, HostAlias,
    HostPathVolumeSource, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    ObjectFieldSelector, PersistentVolumeClaimVolumeSource, Pod, PodDNSConfig, PodSpec, Probe,
    ResourceRequirements, SecretEnvSource, SecretKeySelector, SecretVolumeSource,
    SecurityContext, TCPSocketAction, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::models::pod::{self as req, EnvVarType, ProbeType, RefType, SchedulingType, VolumeType};
use crate::models::PodRequest;

/// Create the Pod object for a request
pub fn build_pod(request: &PodRequest) -> Pod {
    let base = &request.base;

    let mut spec = PodSpec {
        init_containers: non_empty_vec(request.init_containers.iter().map(build_container).collect()),
        containers: request.containers.iter().map(build_container).collect(),
        restart_policy: non_empty(&base.restart_policy),
        tolerations: non_empty_vec(request.tolerations.iter().map(build_toleration).collect()),
        volumes: non_empty_vec(request.volumes.iter().map(build_volume).collect()),
        ..Default::default()
    };
    apply_scheduling(&mut spec, &request.node_scheduling);
    apply_networking(&mut spec, &request.networking);

    Pod {
        metadata: ObjectMeta {
            name: Some(base.name.clone()),
            namespace: Some(base.namespace.clone()),
            labels: non_empty_map(list_to_map(&base.labels)),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

fn build_toleration(t: &req::Toleration) -> Toleration {
    Toleration {
        key: non_empty(&t.key),
        operator: non_empty(&t.operator),
        value: non_empty(&t.value),
        effect: non_empty(&t.effect),
        toleration_seconds: t.toleration_seconds,
    }
}

fn apply_scheduling(spec: &mut PodSpec, scheduling: &req::NodeScheduling) {
    match scheduling.type_ {
        SchedulingType::NodeName => {
            spec.node_name = non_empty(&scheduling.node_name);
        }
        SchedulingType::NodeSelector => {
            spec.node_selector = non_empty_map(list_to_map(&scheduling.node_selector));
        }
        SchedulingType::NodeAffinity => {
            let expressions: Vec<NodeSelectorRequirement> = scheduling
                .node_affinity
                .iter()
                .map(|expr| NodeSelectorRequirement {
                    key: expr.key.clone(),
                    operator: expr.operator.clone(),
                    values: non_empty_vec(split_csv(&expr.value)),
                })
                .collect();

            spec.affinity = Some(Affinity {
                node_affinity: Some(NodeAffinity {
                    required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                        node_selector_terms: vec![NodeSelectorTerm {
                            match_expressions: Some(expressions),
                            ..Default::default()
                        }],
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        SchedulingType::NodeAny => {}
    }
}

fn apply_networking(spec: &mut PodSpec, networking: &req::Networking) {
    spec.host_network = Some(networking.host_network);
    spec.hostname = non_empty(&networking.host_name);
    spec.dns_policy = non_empty(&networking.dns_policy);

    if !networking.dns_config.nameservers.is_empty() {
        spec.dns_config = Some(PodDNSConfig {
            nameservers: Some(networking.dns_config.nameservers.clone()),
            ..Default::default()
        });
    }

    spec.host_aliases = non_empty_vec(
        networking
            .host_aliases
            .iter()
            .map(|alias| HostAlias {
                ip: Some(alias.key.clone()),
                hostnames: Some(split_csv(&alias.value)),
            })
            .collect(),
    );
}

fn build_volume(volume: &req::Volume) -> Volume {
    let mut k8s_volume = Volume {
        name: volume.name.clone(),
        ..Default::default()
    };

    match volume.type_ {
        VolumeType::EmptyDir => {
            k8s_volume.empty_dir = Some(EmptyDirVolumeSource::default());
        }
        VolumeType::ConfigMap => {
            let source = &volume.config_map_ref_volume;
            k8s_volume.config_map = Some(ConfigMapVolumeSource {
                name: Some(source.name.clone()),
                optional: Some(source.optional),
                ..Default::default()
            });
        }
        VolumeType::Secret => {
            let source = &volume.secret_ref_volume;
            k8s_volume.secret = Some(SecretVolumeSource {
                secret_name: Some(source.name.clone()),
                optional: Some(source.optional),
                ..Default::default()
            });
        }
        VolumeType::HostPath => {
            let source = &volume.host_path_volume;
            k8s_volume.host_path = Some(HostPathVolumeSource {
                path: source.path.clone(),
                type_: non_empty(&source.type_),
            });
        }
        VolumeType::Downward => {
            let items = volume
                .downward_api_volume
                .items
                .iter()
                .map(|item| DownwardAPIVolumeFile {
                    path: item.path.clone(),
                    field_ref: Some(ObjectFieldSelector {
                        field_path: item.field_ref_path.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect();
            k8s_volume.downward_api = Some(DownwardAPIVolumeSource {
                items: Some(items),
                ..Default::default()
            });
        }
        VolumeType::Pvc => {
            k8s_volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: volume.pvc_volume.name.clone(),
                ..Default::default()
            });
        }
    }

    k8s_volume
}

fn build_container(container: &req::Container) -> Container {
    Container {
        name: container.name.clone(),
        image: Some(container.image.clone()),
        image_pull_policy: non_empty(&container.image_pull_policy),
        tty: Some(container.tty),
        working_dir: non_empty(&container.working_dir),
        command: non_empty_vec(container.command.clone()),
        args: non_empty_vec(container.args.clone()),
        ports: non_empty_vec(container.ports.iter().map(build_port).collect()),
        env: non_empty_vec(container.envs.iter().map(build_env_var).collect()),
        env_from: non_empty_vec(container.envs_from.iter().map(build_env_from).collect()),
        security_context: container.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        resources: build_resource_requirements(&container.resources),
        volume_mounts: non_empty_vec(
            container
                .volume_mounts
                .iter()
                .map(|mount| VolumeMount {
                    name: mount.mount_name.clone(),
                    mount_path: mount.mount_path.clone(),
                    read_only: Some(mount.read_only),
                    ..Default::default()
                })
                .collect(),
        ),
        startup_probe: build_probe(&container.startup_probe),
        liveness_probe: build_probe(&container.liveness_probe),
        readiness_probe: build_probe(&container.readiness_probe),
        ..Default::default()
    }
}

fn build_port(port: &req::ContainerPort) -> ContainerPort {
    ContainerPort {
        name: non_empty(&port.name),
        container_port: port.container_port,
        host_port: (port.host_port > 0).then_some(port.host_port),
        ..Default::default()
    }
}

fn build_env_var(env: &req::EnvVar) -> EnvVar {
    match env.type_ {
        EnvVarType::Default => EnvVar {
            name: env.name.clone(),
            value: Some(env.value.clone()),
            ..Default::default()
        },
        EnvVarType::ConfigMap => EnvVar {
            name: env.name.clone(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    key: env.value.clone(),
                    name: Some(env.ref_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVarType::Secret => EnvVar {
            name: env.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    key: env.value.clone(),
                    name: Some(env.ref_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

fn build_env_from(source: &req::EnvVarFromResource) -> EnvFromSource {
    let mut env_from = EnvFromSource {
        prefix: non_empty(&source.prefix),
        ..Default::default()
    };
    match source.ref_type {
        RefType::ConfigMap => {
            env_from.config_map_ref = Some(ConfigMapEnvSource {
                name: Some(source.name.clone()),
                ..Default::default()
            });
        }
        RefType::Secret => {
            env_from.secret_ref = Some(SecretEnvSource {
                name: Some(source.name.clone()),
                ..Default::default()
            });
        }
    }
    env_from
}

/// Build resource requirements. Memory is in MiB and CPU in millicores.
fn build_resource_requirements(resources: &req::Resources) -> Option<ResourceRequirements> {
    if !resources.enable {
        return None;
    }

    let quantities = |cpu: i32, mem: i32| {
        let mut map = BTreeMap::new();
        if cpu > 0 {
            map.insert("cpu".to_string(), Quantity(format!("{}m", cpu)));
        }
        if mem > 0 {
            map.insert("memory".to_string(), Quantity(format!("{}Mi", mem)));
        }
        non_empty_map(map)
    };

    Some(ResourceRequirements {
        requests: quantities(resources.cpu_request, resources.mem_request),
        limits: quantities(resources.cpu_limit, resources.mem_limit),
        ..Default::default()
    })
}

fn build_probe(probe: &req::ContainerProbe) -> Option<Probe> {
    if !probe.enable {
        return None;
    }

    let mut k8s_probe = Probe {
        initial_delay_seconds: positive(probe.initial_delay_seconds),
        period_seconds: positive(probe.period_seconds),
        timeout_seconds: positive(probe.timeout_seconds),
        success_threshold: positive(probe.success_threshold),
        failure_threshold: positive(probe.failure_threshold),
        ..Default::default()
    };

    match probe.type_ {
        ProbeType::Http => {
            let http = &probe.http_get;
            k8s_probe.http_get = Some(HTTPGetAction {
                scheme: non_empty(&http.scheme),
                host: non_empty(&http.host),
                path: non_empty(&http.path),
                port: IntOrString::Int(http.port),
                http_headers: non_empty_vec(
                    http.http_headers
                        .iter()
                        .map(|h| HTTPHeader {
                            name: h.key.clone(),
                            value: h.value.clone(),
                        })
                        .collect(),
                ),
            });
        }
        ProbeType::Tcp => {
            k8s_probe.tcp_socket = Some(TCPSocketAction {
                host: non_empty(&probe.tcp_socket.host),
                port: IntOrString::Int(probe.tcp_socket.port),
            });
        }
        ProbeType::Exec => {
            k8s_probe.exec = Some(ExecAction {
                command: Some(probe.exec.command.clone()),
            });
        }
    }

    Some(k8s_probe)
}

fn list_to_map(items: &[req::ListMapItem]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|item| (item.key.clone(), item.value.clone()))
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn non_empty_vec<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

fn positive(value: i32) -> Option<i32> {
    (value > 0).then_some(value)
}
