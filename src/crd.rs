// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) understood by the ingress controller.
//!
//! All resources live in the `ingress.v3.haproxy.org/v3` API group and are namespaced.
//!
//! # Resource Types
//!
//! ## Referenced by annotation
//!
//! - [`Backend`] - backend section settings, referenced with `cr-backend`
//! - [`Defaults`] - defaults section settings, referenced with `cr-defaults`
//! - [`Global`] - global section settings, referenced with `cr-global`
//! - [`LogTargets`] - process log targets, referenced with `cr-log-targets`
//! - [`Frontend`] - overlay for a managed frontend, referenced with
//!   `cr-frontend-http`, `cr-frontend-https` or `cr-frontend-stats`
//!
//! ## Standalone
//!
//! - [`Tcp`] - one or more TCP frontends, each with its own binds and default service
//!
//! # Example: Creating a TCP frontend
//!
//! ```rust,no_run
//! use haproxy_ingress::crd::{CrBind, CrFrontend, TcpModel, TcpService, TcpSpec};
//!
//! let spec = TcpSpec {
//!     items: vec![TcpModel {
//!         name: "postgres".to_string(),
//!         frontend: CrFrontend {
//!             name: "pg".to_string(),
//!             binds: vec![CrBind {
//!                 name: "v4".to_string(),
//!                 address: "0.0.0.0".to_string(),
//!                 port: 5432,
//!                 ..Default::default()
//!             }],
//!             ..Default::default()
//!         },
//!         service: TcpService {
//!             name: "postgres".to_string(),
//!             port: 5432,
//!         },
//!         services: vec![],
//!     }],
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load-balancing algorithm of a backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrBalance {
    /// Algorithm name (`roundrobin`, `leastconn`, `uri`, `hdr`, ...)
    pub algorithm: String,

    /// Optional algorithm parameters, e.g. `whole` for `uri` or the header name for `hdr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

/// Cookie persistence settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrCookie {
    /// Cookie name
    pub name: String,

    /// Cookie mode: `insert`, `rewrite` or `prefix`.
    #[serde(default = "default_cookie_type")]
    pub r#type: String,

    #[serde(default)]
    pub indirect: bool,

    #[serde(default)]
    pub nocache: bool,

    /// Use a dynamic cookie derived from the server address.
    #[serde(default)]
    pub dynamic: bool,
}

fn default_cookie_type() -> String {
    "insert".to_string()
}

/// Default server parameters of a backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrDefaultServer {
    #[serde(default)]
    pub check: bool,

    /// Health check interval, e.g. `2s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,

    /// `send-proxy`, `send-proxy-v2`, `send-proxy-v2-ssl` or `send-proxy-v2-ssl-cn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_proxy: Option<String>,

    #[serde(default)]
    pub ssl: bool,

    /// `none` or `required`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
}

/// HTTP health check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrHttpCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    pub uri: String,
}

/// `Backend` holds the backend section settings applied to every backend that references it.
///
/// # Example
///
/// ```yaml
/// apiVersion: ingress.v3.haproxy.org/v3
/// kind: Backend
/// metadata:
///   name: sticky
///   namespace: prod
/// spec:
///   balance:
///     algorithm: leastconn
///   cookie:
///     name: SRV
///   defaultServer:
///     check: true
///     inter: 2s
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "Backend",
    namespaced,
    doc = "Backend holds backend section settings. Services and ingresses reference it with the cr-backend annotation."
)]
#[serde(rename_all = "camelCase")]
pub struct BackendCrSpec {
    /// `http` or `tcp`; the service translator decides when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<CrBalance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<CrCookie>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwardfor: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abortonclose: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<CrDefaultServer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub httpchk: Option<CrHttpCheck>,
}

/// `Defaults` replaces the annotation-built defaults section.
///
/// Timeouts are keyed by their proxy name (`client`, `server`, `connect`, `queue`,
/// `tunnel`, `http-request`, `http-keep-alive`).
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "Defaults",
    namespaced,
    doc = "Defaults holds the proxy defaults section. Referenced by the cr-defaults key of the main ConfigMap."
)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsCrSpec {
    #[serde(default)]
    pub timeouts: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(default)]
    pub dontlognull: bool,

    #[serde(default)]
    pub logasap: bool,

    /// `http-keep-alive`, `httpclose` or `http-server-close`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_connection_mode: Option<String>,
}

/// `Global` replaces the annotation-built global section.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "Global",
    namespaced,
    doc = "Global holds the proxy global section. Referenced by the cr-global key of the main ConfigMap."
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCrSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbthread: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_stop_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_default_bind_options: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_default_bind_ciphers: Option<String>,
}

/// One process log target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrLogTarget {
    /// `stdout`, `127.0.0.1:514`, `/dev/log`, ...
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

/// `LogTargets` replaces the log targets built from the `syslog-server` key.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "LogTargets",
    namespaced,
    doc = "LogTargets lists the process log targets. Referenced by the cr-log-targets key of the main ConfigMap."
)]
#[serde(rename_all = "camelCase")]
pub struct LogTargetsCrSpec {
    pub targets: Vec<CrLogTarget>,
}

/// `Frontend` overlays settings on one of the managed frontends.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "Frontend",
    namespaced,
    doc = "Frontend overlays settings on the http, https or stats frontend."
)]
#[serde(rename_all = "camelCase")]
pub struct FrontendCrSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,
}

/// A bind of a TCP frontend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrBind {
    pub name: String,

    /// Listen address; empty means all addresses.
    #[serde(default)]
    pub address: String,

    #[schemars(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default)]
    pub v4v6: bool,

    #[serde(default)]
    pub accept_proxy: bool,

    #[serde(default)]
    pub ssl: bool,

    /// Name of a TLS secret in the resource namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
}

/// Frontend of a TCP entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrFrontend {
    pub name: String,

    #[serde(default)]
    pub binds: Vec<CrBind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxconn: Option<i64>,

    #[serde(default)]
    pub tcplog: bool,
}

/// Service a TCP frontend forwards to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpService {
    pub name: String,

    #[schemars(range(min = 1, max = 65535))]
    pub port: i64,
}

/// One TCP frontend with its default service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpModel {
    pub name: String,

    pub frontend: CrFrontend,

    /// Default service of the frontend
    pub service: TcpService,

    /// Additional services, each materialized as a backend
    #[serde(default)]
    pub services: Vec<TcpService>,
}

/// `TCP` declares TCP frontends.
///
/// # Example
///
/// ```yaml
/// apiVersion: ingress.v3.haproxy.org/v3
/// kind: TCP
/// metadata:
///   name: databases
///   namespace: prod
/// spec:
///   items:
///     - name: postgres
///       frontend:
///         name: pg
///         binds:
///           - name: v4
///             port: 5432
///       service:
///         name: postgres
///         port: 5432
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ingress.v3.haproxy.org",
    version = "v3",
    kind = "TCP",
    namespaced,
    doc = "TCP declares TCP frontends, each forwarding to a service in the same namespace."
)]
#[serde(rename_all = "camelCase")]
pub struct TcpSpec {
    pub items: Vec<TcpModel>,
}

/// Alias following Rust naming for the generated `TCP` kind.
pub type Tcp = TCP;

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
