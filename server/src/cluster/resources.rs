//! Kubernetes object builders
//!
//! Every object owned by an application carries the label
//! `web={app}-service`; the service selects its pods by the same label.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, Namespace, PodSpec, PodTemplateSpec,
    Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;

use crate::image::ImageTag;

/// Label key shared by every object of an application
pub const APP_LABEL_KEY: &str = "web";

/// Environment variable carrying the container's listen port
pub const PORT_ENV: &str = "PORT";

/// Secret type and data key of a registry pull secret
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Maximum length of a port name
const PORT_NAME_MAX: usize = 15;

/// How a service is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    NodePort,
    LoadBalancer,
}

impl ServiceKind {
    /// NodePort on local clusters, LoadBalancer otherwise
    pub fn for_cluster(is_local: bool) -> Self {
        if is_local {
            ServiceKind::NodePort
        } else {
            ServiceKind::LoadBalancer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::NodePort => "NodePort",
            ServiceKind::LoadBalancer => "LoadBalancer",
        }
    }
}

pub fn labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        APP_LABEL_KEY.to_string(),
        format!("{}-service", app_name.to_lowercase()),
    )])
}

/// Label selector matching the pods of `app_name`
pub fn label_selector(app_name: &str) -> String {
    format!("{}={}-service", APP_LABEL_KEY, app_name.to_lowercase())
}

/// Port name derived from the app name, cut to the 15 character limit.
///
/// Falls back to `suffix` alone if the cut name would contain no letter.
pub fn port_name(app_name: &str, suffix: &str) -> String {
    let mut name = String::with_capacity(PORT_NAME_MAX);
    for c in format!("{}-{}", app_name.to_lowercase(), suffix).chars() {
        if name.len() == PORT_NAME_MAX {
            break;
        }
        if c == '-' && (name.is_empty() || name.ends_with('-')) {
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '-' {
            name.push(c);
        }
    }
    let name = name.trim_end_matches('-').to_string();
    if name.chars().any(|c| c.is_ascii_alphabetic()) {
        name
    } else {
        suffix.chars().take(PORT_NAME_MAX).collect()
    }
}

fn metadata(namespace: &str, app_name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(app_name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(app_name)),
        ..Default::default()
    }
}

pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Pull secret holding a docker config `auths` document
pub fn build_pull_secret(namespace: &str, name: &str, document: Vec<u8>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(document),
        )])),
        ..Default::default()
    }
}

/// Service exposing `port` (used as both service and target port)
pub fn build_service(namespace: &str, app_name: &str, port: u16, kind: ServiceKind) -> Service {
    let port = i32::from(port);
    Service {
        metadata: metadata(namespace, app_name),
        spec: Some(ServiceSpec {
            type_: Some(kind.as_str().to_string()),
            selector: Some(labels(app_name)),
            ports: Some(vec![ServicePort {
                name: Some(port_name(app_name, "service")),
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Container environment: caller variables in key order, then `PORT`.
///
/// A caller-supplied `PORT` is replaced by the allocated one.
pub fn container_env(envs: &BTreeMap<String, String>, port: i32) -> Vec<EnvVar> {
    envs.iter()
        .filter(|(name, _)| name.as_str() != PORT_ENV)
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .chain(std::iter::once(EnvVar {
            name: PORT_ENV.to_string(),
            value: Some(port.to_string()),
            ..Default::default()
        }))
        .collect()
}

/// Single-replica deployment running `image` and listening on `port`
pub fn build_deployment(
    namespace: &str,
    app_name: &str,
    image: &ImageTag,
    envs: &BTreeMap<String, String>,
    port: i32,
    pull_secret: &str,
) -> Deployment {
    let container = Container {
        name: app_name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(container_env(envs, port)),
        ports: Some(vec![ContainerPort {
            name: Some(port_name(app_name, "port")),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(namespace, app_name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(app_name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(app_name.to_string()),
                    labels: Some(labels(app_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: pull_secret.to_string(),
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or(&[])
}

/// First non-zero integer target port of a service
pub fn service_target_port(service: &Service) -> Option<i32> {
    service_ports(service)
        .iter()
        .find_map(|p| match p.target_port {
            Some(IntOrString::Int(port)) if port != 0 => Some(port),
            _ => None,
        })
}

/// `http://localhost:{nodePort}` for the first allocated node port
pub fn node_port_address(service: &Service) -> Option<String> {
    service_ports(service)
        .iter()
        .find_map(|p| p.node_port.filter(|port| *port != 0))
        .map(|port| format!("http://localhost:{}", port))
}
