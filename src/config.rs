// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller configuration.
//!
//! [`Args`] is the command line surface (every flag can also come from the environment).
//! It converts into an immutable [`ControllerConfig`] that names the on-disk root, the
//! derived paths, the bind ports and the feature flags the reconciler needs.

use crate::constants::{
    AUX_CFG_FILE, CERTS_BACKEND_DIR, CERTS_CA_DIR, CERTS_FRONTEND_DIR, CERTS_TCP_CR_DIR,
    DEFAULT_BACKEND_PORT, DEFAULT_CONTROLLER_PORT, DEFAULT_EVENTS_BATCH_SIZE,
    DEFAULT_EVENTS_BATCH_WINDOW_MS, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT,
    DEFAULT_SYNC_PERIOD_SECS, ERRORFILES_DIR, MAIN_CFG_FILE, MAPS_DIR, METRICS_SERVER_PORT,
    PATTERNS_DIR, RUNTIME_DIR,
};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "HAProxy Ingress Controller for Kubernetes", long_about = None)]
pub struct Args {
    /// Root directory of every file the controller writes
    #[arg(long, env = "HAPROXY_CONFIG_DIR", default_value = "/etc/haproxy")]
    pub config_dir: PathBuf,

    /// Main ConfigMap (`namespace/name`)
    #[arg(long, env = "CONFIGMAP", default_value = "default/haproxy-kubernetes-ingress")]
    pub configmap: String,

    /// ConfigMap mapping TCP ports to services (`namespace/name`)
    #[arg(long, env = "CONFIGMAP_TCP_SERVICES")]
    pub configmap_tcp_services: Option<String>,

    /// ConfigMap holding custom error pages (`namespace/name`)
    #[arg(long, env = "CONFIGMAP_ERRORFILES")]
    pub configmap_errorfiles: Option<String>,

    /// ConfigMap holding pattern files (`namespace/name`)
    #[arg(long, env = "CONFIGMAP_PATTERNFILES")]
    pub configmap_patternfiles: Option<String>,

    /// Ingress class handled by this controller
    #[arg(long, env = "INGRESS_CLASS", default_value = "")]
    pub ingress_class: String,

    /// Also handle ingresses without any class
    #[arg(long, env = "EMPTY_INGRESS_CLASS")]
    pub empty_ingress_class: bool,

    /// Only watch these namespaces (repeatable)
    #[arg(long, env = "NAMESPACE_WHITELIST", value_delimiter = ',')]
    pub namespace_whitelist: Vec<String>,

    /// Ignore these namespaces (repeatable)
    #[arg(long, env = "NAMESPACE_BLACKLIST", value_delimiter = ',')]
    pub namespace_blacklist: Vec<String>,

    /// Namespace the controller runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,

    /// Default backend service (`namespace/name`) replacing the local default backend
    #[arg(long, env = "DEFAULT_BACKEND_SERVICE")]
    pub default_backend_service: Option<String>,

    /// Port of the local default backend
    #[arg(long, env = "DEFAULT_BACKEND_PORT", default_value_t = DEFAULT_BACKEND_PORT)]
    pub default_backend_port: u16,

    /// Default certificate secret (`namespace/name`)
    #[arg(long, env = "DEFAULT_SSL_CERTIFICATE")]
    pub default_ssl_certificate: Option<String>,

    /// HTTP bind port
    #[arg(long, env = "HTTP_BIND_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_bind_port: u16,

    /// HTTPS bind port
    #[arg(long, env = "HTTPS_BIND_PORT", default_value_t = DEFAULT_HTTPS_PORT)]
    pub https_bind_port: u16,

    /// IPv4 bind address
    #[arg(long, env = "IPV4_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub ipv4_bind_address: String,

    /// IPv6 bind address
    #[arg(long, env = "IPV6_BIND_ADDRESS", default_value = "::")]
    pub ipv6_bind_address: String,

    /// Do not listen on IPv4
    #[arg(long, env = "DISABLE_IPV4")]
    pub disable_ipv4: bool,

    /// Do not listen on IPv6
    #[arg(long, env = "DISABLE_IPV6")]
    pub disable_ipv6: bool,

    /// Do not create the HTTP frontend binds
    #[arg(long, env = "DISABLE_HTTP")]
    pub disable_http: bool,

    /// Do not create the HTTPS frontend binds
    #[arg(long, env = "DISABLE_HTTPS")]
    pub disable_https: bool,

    /// Do not create QUIC binds
    #[arg(long, env = "DISABLE_QUIC")]
    pub disable_quic: bool,

    /// Port announced in the alt-svc header (defaults to the HTTPS port)
    #[arg(long, env = "QUIC_ANNOUNCE_PORT")]
    pub quic_announce_port: Option<u16>,

    /// Port of the QUIC binds (defaults to the HTTPS port)
    #[arg(long, env = "QUIC_BIND_PORT")]
    pub quic_bind_port: Option<u16>,

    /// Config snippet scopes to ignore: global, frontend, backend, all
    #[arg(long, env = "DISABLE_CONFIG_SNIPPETS", default_value = "")]
    pub disable_config_snippets: String,

    /// Port of the controller's own HTTP server
    #[arg(long, env = "CONTROLLER_PORT", default_value_t = DEFAULT_CONTROLLER_PORT)]
    pub controller_port: u16,

    /// Expose controller metrics through the proxy
    #[arg(long, env = "PROMETHEUS")]
    pub prometheus: bool,

    /// Route `/debug/pprof` to the controller
    #[arg(long, env = "PPROF")]
    pub pprof: bool,

    /// Create one backend per ingress instead of one per service
    #[arg(long, env = "STANDALONE_BACKEND")]
    pub standalone_backend: bool,

    /// The proxy process is managed outside of the controller
    #[arg(long, env = "EXTERNAL")]
    pub external: bool,

    /// Proxy binary
    #[arg(long, env = "HAPROXY_PROGRAM", default_value = "/usr/local/sbin/haproxy")]
    pub program: PathBuf,

    /// Runtime API socket (defaults to `<config-dir>/run/haproxy-runtime-api.sock`)
    #[arg(long, env = "RUNTIME_SOCKET")]
    pub runtime_socket: Option<PathBuf>,

    /// Master CLI socket (defaults to `<config-dir>/run/haproxy-master.sock`)
    #[arg(long, env = "MASTER_SOCKET")]
    pub master_socket: Option<PathBuf>,

    /// Seconds between two reconciles when nothing changed
    #[arg(long, env = "SYNC_PERIOD", default_value_t = DEFAULT_SYNC_PERIOD_SECS)]
    pub sync_period: u64,

    /// Maximum number of events merged before a reconcile
    #[arg(long, env = "EVENTS_BATCH_SIZE", default_value_t = DEFAULT_EVENTS_BATCH_SIZE)]
    pub events_batch_size: usize,

    /// Maximum milliseconds spent merging events before a reconcile
    #[arg(long, env = "EVENTS_BATCH_WINDOW", default_value_t = DEFAULT_EVENTS_BATCH_WINDOW_MS)]
    pub events_batch_window: u64,

    /// Port of the metrics HTTP server
    #[arg(long, env = "METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,
}

/// Config snippet scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnippetScope {
    Global,
    Frontend,
    Backend,
}

/// Reference to a namespaced object given on the command line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    /// Parse `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns an error when either part is missing.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(format!("'{value}' is not in 'namespace/name' format")),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Paths derived from the configuration root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub main_cfg: PathBuf,
    pub aux_cfg: PathBuf,
    pub maps_dir: PathBuf,
    pub frontend_certs_dir: PathBuf,
    pub backend_certs_dir: PathBuf,
    pub ca_certs_dir: PathBuf,
    pub tcp_cr_certs_dir: PathBuf,
    pub errorfiles_dir: PathBuf,
    pub patterns_dir: PathBuf,
    pub runtime_dir: PathBuf,
}

impl Paths {
    /// Derive every path from `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            main_cfg: root.join(MAIN_CFG_FILE),
            aux_cfg: root.join(AUX_CFG_FILE),
            maps_dir: root.join(MAPS_DIR),
            frontend_certs_dir: root.join(CERTS_FRONTEND_DIR),
            backend_certs_dir: root.join(CERTS_BACKEND_DIR),
            ca_certs_dir: root.join(CERTS_CA_DIR),
            tcp_cr_certs_dir: root.join(CERTS_TCP_CR_DIR),
            errorfiles_dir: root.join(ERRORFILES_DIR),
            patterns_dir: root.join(PATTERNS_DIR),
            runtime_dir: root.join(RUNTIME_DIR),
        }
    }

    /// Every directory the controller writes into.
    #[must_use]
    pub fn directories(&self) -> Vec<&Path> {
        vec![
            &self.root,
            &self.maps_dir,
            &self.frontend_certs_dir,
            &self.backend_certs_dir,
            &self.ca_certs_dir,
            &self.tcp_cr_certs_dir,
            &self.errorfiles_dir,
            &self.patterns_dir,
            &self.runtime_dir,
        ]
    }
}

/// Immutable controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub paths: Paths,
    pub main_configmap: ObjectRef,
    pub tcp_services_configmap: Option<ObjectRef>,
    pub errorfiles_configmap: Option<ObjectRef>,
    pub patternfiles_configmap: Option<ObjectRef>,
    pub ingress_class: String,
    pub empty_ingress_class: bool,
    pub namespace_whitelist: BTreeSet<String>,
    pub namespace_blacklist: BTreeSet<String>,
    pub pod_namespace: String,
    pub default_backend_service: Option<ObjectRef>,
    pub default_backend_port: u16,
    pub default_ssl_certificate: Option<ObjectRef>,
    pub http_port: u16,
    pub https_port: u16,
    pub ipv4_address: String,
    pub ipv6_address: String,
    pub ipv4: bool,
    pub ipv6: bool,
    pub http: bool,
    pub https: bool,
    pub quic: bool,
    pub quic_announce_port: u16,
    pub quic_bind_port: u16,
    pub disabled_snippets: BTreeSet<SnippetScope>,
    pub controller_port: u16,
    pub prometheus: bool,
    pub pprof: bool,
    pub standalone_backend: bool,
    pub external: bool,
    pub program: PathBuf,
    pub runtime_socket: PathBuf,
    pub master_socket: PathBuf,
    pub sync_period: Duration,
    pub events_batch_size: usize,
    pub events_batch_window: Duration,
    pub metrics_port: u16,
}

impl ControllerConfig {
    /// Configuration rooted at `root` with every default, used by tests and tools.
    #[must_use]
    pub fn with_root(root: &Path) -> Self {
        let paths = Paths::new(root);
        Self {
            main_configmap: ObjectRef {
                namespace: "default".to_string(),
                name: "haproxy-kubernetes-ingress".to_string(),
            },
            tcp_services_configmap: None,
            errorfiles_configmap: None,
            patternfiles_configmap: None,
            ingress_class: String::new(),
            empty_ingress_class: false,
            namespace_whitelist: BTreeSet::new(),
            namespace_blacklist: BTreeSet::new(),
            pod_namespace: "default".to_string(),
            default_backend_service: None,
            default_backend_port: DEFAULT_BACKEND_PORT,
            default_ssl_certificate: None,
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            ipv4_address: "0.0.0.0".to_string(),
            ipv6_address: "::".to_string(),
            ipv4: true,
            ipv6: true,
            http: true,
            https: true,
            quic: true,
            quic_announce_port: DEFAULT_HTTPS_PORT,
            quic_bind_port: DEFAULT_HTTPS_PORT,
            disabled_snippets: BTreeSet::new(),
            controller_port: DEFAULT_CONTROLLER_PORT,
            prometheus: false,
            pprof: false,
            standalone_backend: false,
            external: false,
            program: PathBuf::from("/usr/local/sbin/haproxy"),
            runtime_socket: paths.runtime_dir.join("haproxy-runtime-api.sock"),
            master_socket: paths.runtime_dir.join("haproxy-master.sock"),
            sync_period: Duration::from_secs(DEFAULT_SYNC_PERIOD_SECS),
            events_batch_size: DEFAULT_EVENTS_BATCH_SIZE,
            events_batch_window: Duration::from_millis(DEFAULT_EVENTS_BATCH_WINDOW_MS),
            metrics_port: METRICS_SERVER_PORT,
            paths,
        }
    }
}

/// Parse the `--disable-config-snippets` value.
///
/// # Errors
///
/// Returns an error naming the first unknown scope.
pub fn parse_disabled_snippets(value: &str) -> Result<BTreeSet<SnippetScope>, String> {
    let mut scopes = BTreeSet::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item {
            "all" => {
                scopes.insert(SnippetScope::Global);
                scopes.insert(SnippetScope::Frontend);
                scopes.insert(SnippetScope::Backend);
            }
            "global" => {
                scopes.insert(SnippetScope::Global);
            }
            "frontend" => {
                scopes.insert(SnippetScope::Frontend);
            }
            "backend" => {
                scopes.insert(SnippetScope::Backend);
            }
            other => return Err(format!("unknown config snippet type '{other}'")),
        }
    }
    Ok(scopes)
}

fn parse_optional_ref(value: Option<&String>) -> Result<Option<ObjectRef>, String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| ObjectRef::parse(v))
        .transpose()
}

impl TryFrom<Args> for ControllerConfig {
    type Error = String;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.disable_ipv4 && args.disable_ipv6 {
            return Err("IPv4 and IPv6 cannot both be disabled".to_string());
        }
        if args.events_batch_size == 0 {
            return Err("events-batch-size must be greater than 0".to_string());
        }
        if args.sync_period == 0 {
            return Err("sync-period must be greater than 0".to_string());
        }
        let paths = Paths::new(&args.config_dir);
        let runtime_socket = args
            .runtime_socket
            .unwrap_or_else(|| paths.runtime_dir.join("haproxy-runtime-api.sock"));
        let master_socket = args
            .master_socket
            .unwrap_or_else(|| paths.runtime_dir.join("haproxy-master.sock"));

        Ok(Self {
            main_configmap: ObjectRef::parse(&args.configmap)?,
            tcp_services_configmap: parse_optional_ref(args.configmap_tcp_services.as_ref())?,
            errorfiles_configmap: parse_optional_ref(args.configmap_errorfiles.as_ref())?,
            patternfiles_configmap: parse_optional_ref(args.configmap_patternfiles.as_ref())?,
            ingress_class: args.ingress_class,
            empty_ingress_class: args.empty_ingress_class,
            namespace_whitelist: args.namespace_whitelist.into_iter().collect(),
            namespace_blacklist: args.namespace_blacklist.into_iter().collect(),
            pod_namespace: args.pod_namespace,
            default_backend_service: parse_optional_ref(args.default_backend_service.as_ref())?,
            default_backend_port: args.default_backend_port,
            default_ssl_certificate: parse_optional_ref(args.default_ssl_certificate.as_ref())?,
            http_port: args.http_bind_port,
            https_port: args.https_bind_port,
            ipv4_address: args.ipv4_bind_address,
            ipv6_address: args.ipv6_bind_address,
            ipv4: !args.disable_ipv4,
            ipv6: !args.disable_ipv6,
            http: !args.disable_http,
            https: !args.disable_https,
            quic: !args.disable_quic,
            quic_announce_port: args.quic_announce_port.unwrap_or(args.https_bind_port),
            quic_bind_port: args.quic_bind_port.unwrap_or(args.https_bind_port),
            disabled_snippets: parse_disabled_snippets(&args.disable_config_snippets)?,
            controller_port: args.controller_port,
            prometheus: args.prometheus,
            pprof: args.pprof,
            standalone_backend: args.standalone_backend,
            external: args.external,
            program: args.program,
            runtime_socket,
            master_socket,
            sync_period: Duration::from_secs(args.sync_period),
            events_batch_size: args.events_batch_size,
            events_batch_window: Duration::from_millis(args.events_batch_window),
            metrics_port: args.metrics_port,
            paths,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
