// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Conversion of Kubernetes API objects into store types.
//!
//! Annotation names lose their `<prefix>/` so `haproxy.org/ssl-redirect`,
//! `ingress.kubernetes.io/ssl-redirect` and the ConfigMap key `ssl-redirect` all
//! name the same annotation. The status of converted objects is left for the caller.

use super::types::*;
use crate::constants::NETWORKING_V1;
use crate::crd::TCP;
use k8s_openapi::api::core::v1::{
    ConfigMap as K8sConfigMap, Secret as K8sSecret, Service as K8sService,
};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{
    Ingress as K8sIngress, IngressBackend, IngressClass as K8sIngressClass,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

/// Label linking an endpoint slice to its service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Strip the `<prefix>/` part of an annotation name.
#[must_use]
pub fn annotation_name(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(_, name)| name)
}

/// Annotation map of an object's metadata, names stripped of their prefix.
///
/// When both a prefixed and an unprefixed spelling exist the first in key order wins.
#[must_use]
pub fn convert_annotations(raw: &BTreeMap<String, String>) -> Annotations {
    let mut result = Annotations::new();
    for (key, value) in raw {
        result
            .entry(annotation_name(key).to_string())
            .or_insert_with(|| AnnotationValue::added(value.clone()));
    }
    result
}

fn convert_backend(namespace: &str, backend: &IngressBackend) -> Option<IngressPath> {
    let service = backend.service.as_ref()?;
    let port = service.port.as_ref();
    Some(IngressPath {
        svc_namespace: namespace.to_string(),
        svc_name: service.name.clone(),
        svc_port_int: port.and_then(|p| p.number).map_or(0, i64::from),
        svc_port_string: port.and_then(|p| p.name.clone()).unwrap_or_default(),
        ..IngressPath::default()
    })
}

/// Convert a `networking.k8s.io/v1` ingress.
#[must_use]
pub fn convert_ingress(ingress: &K8sIngress) -> Ingress {
    let namespace = ingress.namespace().unwrap_or_default();
    let spec = ingress.spec.clone().unwrap_or_default();

    let mut rules: BTreeMap<String, IngressRule> = BTreeMap::new();
    for rule in spec.rules.unwrap_or_default() {
        let host = rule.host.unwrap_or_default();
        let entry = rules.entry(host.clone()).or_insert_with(|| IngressRule {
            host,
            ..IngressRule::default()
        });
        for http_path in rule.http.map(|h| h.paths).unwrap_or_default() {
            let Some(mut path) = convert_backend(&namespace, &http_path.backend) else {
                continue;
            };
            path.path = http_path.path.unwrap_or_default();
            path.path_type = PathType::parse(Some(http_path.path_type.as_str()));
            entry.paths.insert(path.key(), path);
        }
    }

    let mut tls = BTreeMap::new();
    for entry in spec.tls.unwrap_or_default() {
        let secret_name = entry.secret_name.unwrap_or_default();
        let mut hosts = entry.hosts.unwrap_or_default();
        if hosts.is_empty() {
            hosts.push(String::new());
        }
        for host in hosts {
            tls.insert(
                host.clone(),
                IngressTls {
                    host,
                    secret_name: secret_name.clone(),
                    status: Status::Empty,
                },
            );
        }
    }

    let default_backend = spec
        .default_backend
        .as_ref()
        .and_then(|b| convert_backend(&namespace, b))
        .map(|mut path| {
            path.is_default_backend = true;
            path
        });

    let addresses = ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.ip.clone().or_else(|| e.hostname.clone()))
                .collect()
        })
        .unwrap_or_default();

    Ingress {
        api_version: NETWORKING_V1.to_string(),
        namespace,
        name: ingress.name_any(),
        class: spec.ingress_class_name.unwrap_or_default(),
        annotations: convert_annotations(ingress.annotations()),
        rules,
        default_backend,
        tls,
        addresses,
        status: Status::Empty,
        class_updated: false,
        created: ingress.metadata.creation_timestamp
            .as_ref()
            .and_then(|t| chrono::DateTime::from_timestamp(t.0.as_second(), t.0.subsec_nanosecond() as u32)),
    }
}

/// Convert a service.
#[must_use]
pub fn convert_service(service: &K8sService) -> Service {
    let spec = service.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| ServicePort {
            name: p.name.unwrap_or_default(),
            protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
            port: i64::from(p.port),
            status: Status::Empty,
        })
        .collect();
    let mut addresses: Vec<String> = spec.external_ips.unwrap_or_default();
    if let Some(ingress) = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
    {
        addresses.extend(
            ingress
                .iter()
                .filter_map(|e| e.ip.clone().or_else(|| e.hostname.clone())),
        );
    }
    let dns = if spec.type_.as_deref() == Some("ExternalName") {
        spec.external_name.unwrap_or_default()
    } else {
        String::new()
    };
    Service {
        namespace: service.namespace().unwrap_or_default(),
        name: service.name_any(),
        ports,
        addresses,
        dns,
        annotations: convert_annotations(service.annotations()),
        status: Status::Empty,
        faked: false,
    }
}

/// Convert an endpoint slice; slices without a service label are skipped.
///
/// Only endpoints that are ready (or whose readiness is unknown) are kept.
#[must_use]
pub fn convert_endpoint_slice(slice: &EndpointSlice) -> Option<Endpoints> {
    let service = slice.labels().get(SERVICE_NAME_LABEL)?.clone();
    let addresses: BTreeSet<String> = slice
        .endpoints
        .iter()
        .filter(|e| {
            e.conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true)
        })
        .flat_map(|e| e.addresses.iter().cloned())
        .collect();
    let ports = slice
        .ports
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|p| {
            (
                p.name.unwrap_or_default(),
                PortEndpoints {
                    port: p.port.map_or(0, i64::from),
                    addresses: addresses.clone(),
                },
            )
        })
        .collect();
    Some(Endpoints {
        slice_name: slice.name_any(),
        namespace: slice.namespace().unwrap_or_default(),
        service,
        ports,
        status: Status::Empty,
    })
}

/// Convert a secret, merging `stringData` over `data`.
#[must_use]
pub fn convert_secret(secret: &K8sSecret) -> Secret {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .as_ref()
        .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    if let Some(string_data) = secret.string_data.as_ref() {
        for (k, v) in string_data {
            data.insert(k.clone(), v.as_bytes().to_vec());
        }
    }
    Secret {
        namespace: secret.namespace().unwrap_or_default(),
        name: secret.name_any(),
        data,
        status: Status::Empty,
    }
}

/// Convert a ConfigMap; its data keys become annotations.
#[must_use]
pub fn convert_config_map(config_map: &K8sConfigMap) -> ConfigMap {
    ConfigMap {
        namespace: config_map.namespace().unwrap_or_default(),
        name: config_map.name_any(),
        loaded: false,
        annotations: config_map
            .data
            .as_ref()
            .map(convert_annotations)
            .unwrap_or_default(),
        status: Status::Empty,
    }
}

/// Convert an IngressClass.
#[must_use]
pub fn convert_ingress_class(class: &K8sIngressClass) -> IngressClass {
    IngressClass {
        api_version: NETWORKING_V1.to_string(),
        name: class.name_any(),
        controller: class
            .spec
            .as_ref()
            .and_then(|s| s.controller.clone())
            .unwrap_or_default(),
        annotations: class.annotations().clone(),
        status: Status::Empty,
    }
}

/// Convert a TCP custom resource; entries are ordered by name.
#[must_use]
pub fn convert_tcp(tcp: &TCP) -> TcpResource {
    let name = tcp.name_any();
    let mut items: Vec<TcpItem> = tcp
        .spec
        .items
        .iter()
        .cloned()
        .map(|mut model| {
            model
                .frontend
                .binds
                .sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
            TcpItem {
                parent: name.clone(),
                model,
                collision: None,
                status: Status::Empty,
            }
        })
        .collect();
    items.sort_by(|a, b| a.model.name.cmp(&b.model.name));
    TcpResource {
        namespace: tcp.namespace().unwrap_or_default(),
        name,
        items,
        status: Status::Empty,
    }
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod convert_tests;
