// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed snapshot of the cluster objects the controller watches.
//!
//! Every entity carries a [`Status`] set by the event methods and swept back to
//! [`Status::Empty`] by [`crate::store::K8sStore::clean`] at the end of each reconcile.
//! Relationships are expressed by key (namespace/name), never by reference.

use crate::crd::{
    BackendCrSpec, DefaultsCrSpec, FrontendCrSpec, GlobalCrSpec, LogTargetsCrSpec, TcpModel,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle status of a stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// First seen since the last reconcile
    Added,
    /// Changed since the last reconcile
    Modified,
    /// Removed; dropped from the store by the next clean
    Deleted,
    /// Unchanged
    #[default]
    Empty,
    /// Rejected (e.g. a TCP frontend collision)
    Error,
}

impl Status {
    /// True for anything but [`Status::Empty`].
    #[must_use]
    pub fn is_changed(self) -> bool {
        self != Self::Empty
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Empty => "EMPTY",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One annotation as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationValue {
    pub value: String,
    /// Value seen by the previous reconcile when it differs
    pub old_value: Option<String>,
    pub status: Status,
}

impl AnnotationValue {
    /// A freshly added annotation.
    pub fn added(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            old_value: None,
            status: Status::Added,
        }
    }
}

/// Annotation map keyed by annotation name (prefix stripped).
pub type Annotations = BTreeMap<String, AnnotationValue>;

/// Build an annotation map where every entry is ADDED.
pub fn annotations_from<K, V, I>(pairs: I) -> Annotations
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), AnnotationValue::added(v)))
        .collect()
}

/// Diff `new` against `old`.
///
/// Keys only in `new` are ADDED, keys whose value changed are MODIFIED (carrying the old
/// value), keys only in `old` are kept as DELETED. Returns whether anything changed.
pub fn diff_annotations(old: &Annotations, new: &Annotations) -> (Annotations, bool) {
    let mut result = Annotations::new();
    let mut changed = false;
    for (name, value) in new {
        let entry = match old.get(name) {
            Some(previous) if previous.status != Status::Deleted => {
                if previous.value == value.value {
                    AnnotationValue {
                        value: value.value.clone(),
                        old_value: None,
                        status: Status::Empty,
                    }
                } else {
                    changed = true;
                    AnnotationValue {
                        value: value.value.clone(),
                        old_value: Some(previous.value.clone()),
                        status: Status::Modified,
                    }
                }
            }
            _ => {
                changed = true;
                AnnotationValue::added(value.value.clone())
            }
        };
        result.insert(name.clone(), entry);
    }
    for (name, previous) in old {
        if !new.contains_key(name) && previous.status != Status::Deleted {
            changed = true;
            result.insert(
                name.clone(),
                AnnotationValue {
                    value: previous.value.clone(),
                    old_value: Some(previous.value.clone()),
                    status: Status::Deleted,
                },
            );
        }
    }
    (result, changed)
}

/// Compare two annotation maps by live values only.
#[must_use]
pub fn annotations_equal(a: &Annotations, b: &Annotations) -> bool {
    let live = |m: &Annotations| -> BTreeMap<String, String> {
        m.iter()
            .filter(|(_, v)| v.status != Status::Deleted)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    };
    live(a) == live(b)
}

/// Service port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServicePort {
    pub name: String,
    pub protocol: String,
    pub port: i64,
    pub status: Status,
}

/// Kubernetes Service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub ports: Vec<ServicePort>,
    /// External addresses
    pub addresses: Vec<String>,
    /// ExternalName target; empty for regular services
    pub dns: String,
    pub annotations: Annotations,
    pub status: Status,
    /// Synthesized by the controller (prometheus, default local service)
    pub faked: bool,
}

impl Service {
    /// Compare by content, ignoring statuses.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        let ports = |s: &Self| -> Vec<(String, String, i64)> {
            s.ports
                .iter()
                .map(|p| (p.name.clone(), p.protocol.clone(), p.port))
                .collect()
        };
        self.namespace == other.namespace
            && self.name == other.name
            && ports(self) == ports(other)
            && self.addresses == other.addresses
            && self.dns == other.dns
            && annotations_equal(&self.annotations, &other.annotations)
    }
}

/// Addresses serving one named port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortEndpoints {
    pub port: i64,
    pub addresses: BTreeSet<String>,
}

/// Endpoints of a service as reported by one endpoint slice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoints {
    pub slice_name: String,
    pub namespace: String,
    pub service: String,
    /// Keyed by port name
    pub ports: BTreeMap<String, PortEndpoints>,
    pub status: Status,
}

/// A server slot of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HaproxySrv {
    /// `SRV_<n>`
    pub name: String,
    /// Empty for a disabled slot
    pub address: String,
    pub port: i64,
    /// Needs to be pushed to the proxy
    pub modified: bool,
}

/// Slot bookkeeping for one (service, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeBackend {
    /// Backend name, set once the backend has been created
    pub name: String,
    pub servers: Vec<HaproxySrv>,
    pub endpoints: PortEndpoints,
    pub dyn_update_failed: bool,
}

/// Path match type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum PathType {
    Exact,
    Prefix,
    #[default]
    ImplementationSpecific,
}

impl PathType {
    /// Parse the Kubernetes path type; unknown or missing values are ImplementationSpecific.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Exact") => Self::Exact,
            Some("Prefix") => Self::Prefix,
            _ => Self::ImplementationSpecific,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "Exact",
            Self::Prefix => "Prefix",
            Self::ImplementationSpecific => "ImplementationSpecific",
        }
    }
}

/// One path of an ingress rule, or a synthesized default backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngressPath {
    pub svc_namespace: String,
    pub svc_name: String,
    pub svc_port_int: i64,
    pub svc_port_string: String,
    /// Port resolved by the service translator
    pub svc_port_resolved: Option<ServicePort>,
    pub path: String,
    pub path_type: PathType,
    pub is_default_backend: bool,
    pub is_tcp: bool,
    pub is_ssl_passthrough: bool,
    pub status: Status,
}

impl IngressPath {
    fn same_content(&self, other: &Self) -> bool {
        self.svc_namespace == other.svc_namespace
            && self.svc_name == other.svc_name
            && self.svc_port_int == other.svc_port_int
            && self.svc_port_string == other.svc_port_string
            && self.path == other.path
            && self.path_type == other.path_type
            && self.is_default_backend == other.is_default_backend
    }

    /// Key of the path inside its rule.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}", self.path_type.as_str(), self.path)
    }
}

/// Host rule of an ingress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngressRule {
    pub host: String,
    /// Keyed by [`IngressPath::key`]
    pub paths: BTreeMap<String, IngressPath>,
    pub status: Status,
}

/// TLS entry of an ingress, keyed by host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngressTls {
    pub host: String,
    pub secret_name: String,
    pub status: Status,
}

/// Kubernetes Ingress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ingress {
    pub api_version: String,
    pub namespace: String,
    pub name: String,
    pub class: String,
    pub annotations: Annotations,
    /// Keyed by host
    pub rules: BTreeMap<String, IngressRule>,
    pub default_backend: Option<IngressPath>,
    /// Keyed by host
    pub tls: BTreeMap<String, IngressTls>,
    /// Publish addresses
    pub addresses: Vec<String>,
    pub status: Status,
    pub class_updated: bool,
    pub created: Option<DateTime<Utc>>,
}

impl Ingress {
    /// Compare by content, ignoring statuses.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        let rules_equal = self.rules.len() == other.rules.len()
            && self.rules.iter().all(|(host, rule)| {
                other.rules.get(host).is_some_and(|o| {
                    rule.paths.len() == o.paths.len()
                        && rule.paths.iter().all(|(k, p)| {
                            o.paths.get(k).is_some_and(|op| p.same_content(op))
                        })
                })
            });
        let tls_equal = self.tls.len() == other.tls.len()
            && self.tls.iter().all(|(host, t)| {
                other
                    .tls
                    .get(host)
                    .is_some_and(|o| o.secret_name == t.secret_name)
            });
        let default_equal = match (&self.default_backend, &other.default_backend) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_content(b),
            _ => false,
        };
        self.namespace == other.namespace
            && self.name == other.name
            && self.class == other.class
            && annotations_equal(&self.annotations, &other.annotations)
            && rules_equal
            && tls_equal
            && default_equal
            && self.addresses == other.addresses
    }

    /// Set `status` on the ingress and every sub-entity.
    pub fn set_status_recursive(&mut self, status: Status) {
        self.status = status;
        for rule in self.rules.values_mut() {
            rule.status = status;
            for path in rule.paths.values_mut() {
                path.status = status;
            }
        }
        for tls in self.tls.values_mut() {
            tls.status = status;
        }
        if let Some(default) = self.default_backend.as_mut() {
            default.status = status;
        }
        for value in self.annotations.values_mut() {
            value.status = status;
        }
    }
}

/// Kubernetes Secret.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
    pub status: Status,
}

/// Kubernetes ConfigMap in one of its recognized roles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigMap {
    pub namespace: String,
    pub name: String,
    pub loaded: bool,
    pub annotations: Annotations,
    pub status: Status,
}

/// The ConfigMaps the controller recognizes by role.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigMaps {
    pub main: ConfigMap,
    pub tcp_services: ConfigMap,
    pub errorfiles: ConfigMap,
    pub patternfiles: ConfigMap,
}

/// Role of a ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMapRole {
    Main,
    TcpServices,
    Errorfiles,
    Patternfiles,
}

/// Kubernetes IngressClass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IngressClass {
    pub api_version: String,
    pub name: String,
    pub controller: String,
    /// Raw annotations (prefix kept)
    pub annotations: BTreeMap<String, String>,
    pub status: Status,
}

/// One frontend entry of a TCP custom resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpItem {
    /// Name of the owning TCP resource
    pub parent: String,
    pub model: TcpModel,
    /// Set when the frontend collides with another TCP entry
    pub collision: Option<String>,
    pub status: Status,
}

/// A TCP custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpResource {
    pub namespace: String,
    pub name: String,
    pub items: Vec<TcpItem>,
    pub status: Status,
}

/// Custom resources of a namespace, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomResources {
    pub backends: BTreeMap<String, BackendCrSpec>,
    pub defaults: BTreeMap<String, DefaultsCrSpec>,
    pub globals: BTreeMap<String, GlobalCrSpec>,
    pub log_targets: BTreeMap<String, LogTargetsCrSpec>,
    pub frontends: BTreeMap<String, FrontendCrSpec>,
    pub tcps: BTreeMap<String, TcpResource>,
}

/// Everything stored for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Namespace {
    pub name: String,
    pub relevant: bool,
    pub labels: BTreeMap<String, String>,
    pub ingresses: BTreeMap<String, Ingress>,
    pub services: BTreeMap<String, Service>,
    /// service -> slice -> endpoints
    pub endpoints: BTreeMap<String, BTreeMap<String, Endpoints>>,
    pub secrets: BTreeMap<String, Secret>,
    /// service -> port name -> slots
    pub runtime: BTreeMap<String, BTreeMap<String, RuntimeBackend>>,
    pub crs: CustomResources,
    pub status: Status,
}
