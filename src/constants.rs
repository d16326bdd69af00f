// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the HAProxy ingress controller.
//!
//! This module contains the numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the custom resources handled by the controller
pub const API_GROUP: &str = "ingress.v3.haproxy.org";

/// Controller value expected in `IngressClass.spec.controller`
pub const CONTROLLER_NAME: &str = "haproxy.org/ingress-controller";

/// Annotation marking an `IngressClass` as the cluster default
pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

/// Ingress API version watched by the controller
pub const NETWORKING_V1: &str = "networking.k8s.io/v1";

/// Name of the synthetic service backing the default local backend
pub const DEFAULT_LOCAL_BACKEND: &str = "default-local-service";

// ============================================================================
// Frontend and Backend Names
// ============================================================================

/// Plain HTTP frontend
pub const FRONTEND_HTTP: &str = "http";

/// HTTPS frontend (SSL offload)
pub const FRONTEND_HTTPS: &str = "https";

/// TCP frontend receiving SSL passthrough traffic
pub const FRONTEND_SSL: &str = "ssl";

/// Stats frontend
pub const FRONTEND_STATS: &str = "stats";

/// Loopback backend chaining the `ssl` frontend into `https`
pub const BACKEND_SSL: &str = "ssl";

/// Prefix of frontends generated from the tcp-services ConfigMap
pub const TCP_SERVICES_PREFIX: &str = "tcp-";

/// Prefix of frontends generated from TCP custom resources
pub const TCP_CR_PREFIX: &str = "tcpcr";

/// Backend holding the pprof server
pub const PPROF_BACKEND: &str = "pprof";

/// Prefix of rate-limit stick-table backends
pub const RATE_LIMIT_BACKEND_PREFIX: &str = "RateLimit-";

/// Bind names used on the http/https frontends
pub const BIND_IPV4: &str = "v4";
pub const BIND_IPV6: &str = "v6";
pub const BIND_UNIX_SOCKET: &str = "unixsock";
pub const BIND_QUIC_IPV4: &str = "quicv4";
pub const BIND_QUIC_IPV6: &str = "quicv6";

// ============================================================================
// Server Slot Constants
// ============================================================================

/// Prefix of server slot names (`SRV_1`, `SRV_2`, ...)
pub const SERVER_SLOT_PREFIX: &str = "SRV_";

/// Default number of server slots pre-allocated per backend
pub const DEFAULT_SERVER_SLOTS: usize = 42;

/// Address given to disabled server slots
pub const DISABLED_SERVER_ADDRESS: &str = "127.0.0.1";

/// Port given to disabled server slots
pub const DISABLED_SERVER_PORT: u16 = 1;

/// Key used for dynamic cookies when none is configured
pub const DYNAMIC_COOKIE_KEY: &str = "ohph7OoGhong";

/// `init-addr` applied to ExternalName backends
pub const EXTERNAL_NAME_INIT_ADDR: &str = "last,libc,none";

// ============================================================================
// TLS Constants
// ============================================================================

/// Prefix of the default frontend certificate (picked when SNI does not match)
pub const DEFAULT_CERT_PREFIX: &str = "0_";

/// Default ALPN announced on SSL binds and backend servers
pub const DEFAULT_ALPN: &str = "h2,http/1.1";

/// Certificate bundle key types written as sibling files
pub const CERT_BUNDLE_TYPES: [&str; 3] = ["rsa", "ecdsa", "dsa"];

// ============================================================================
// On-disk Layout
// ============================================================================

/// Main proxy configuration file, relative to the config root
pub const MAIN_CFG_FILE: &str = "main.cfg";

/// Auxiliary configuration file, relative to the config root
pub const AUX_CFG_FILE: &str = "aux.cfg";

/// Map files directory
pub const MAPS_DIR: &str = "maps";

/// Frontend certificates directory
pub const CERTS_FRONTEND_DIR: &str = "certs/frontend";

/// Backend certificates directory
pub const CERTS_BACKEND_DIR: &str = "certs/backend";

/// CA certificates directory
pub const CERTS_CA_DIR: &str = "certs/ca";

/// TCP custom resource certificates directory
pub const CERTS_TCP_CR_DIR: &str = "certs/tcp-cr";

/// Error files directory
pub const ERRORFILES_DIR: &str = "errorfiles";

/// Pattern files directory
pub const PATTERNS_DIR: &str = "patterns";

/// Runtime directory (sockets, pid file, state file)
pub const RUNTIME_DIR: &str = "run";

/// Unix socket used by the passthrough loopback
pub const SSL_FRONTEND_SOCKET: &str = "ssl-frontend.sock";

/// Extension of map files
pub const MAP_FILE_EXTENSION: &str = "map";

/// Extension of certificate files
pub const PEM_EXTENSION: &str = "pem";

// ============================================================================
// Map Names
// ============================================================================

/// Host map
pub const MAP_HOST: &str = "host";

/// SNI map (SSL passthrough)
pub const MAP_SNI: &str = "sni";

/// Exact path map
pub const MAP_PATH_EXACT: &str = "path-exact";

/// Prefix path map
pub const MAP_PATH_PREFIX: &str = "path-prefix";

// ============================================================================
// Reconciliation Constants
// ============================================================================

/// Default resync period in seconds
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 5;

/// Capacity of the cluster event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum number of events merged into the store before a reconcile
pub const DEFAULT_EVENTS_BATCH_SIZE: usize = 256;

/// Maximum time spent coalescing events before a reconcile, in milliseconds
pub const DEFAULT_EVENTS_BATCH_WINDOW_MS: u64 = 100;

/// Inspect delay applied on the `ssl` frontend when no client timeout is set, in milliseconds
pub const DEFAULT_INSPECT_DELAY_MS: i64 = 5000;

/// Log format of the `ssl` passthrough frontend
pub const SSL_PASSTHROUGH_LOG_FORMAT: &str = "'%ci:%cp [%t] %ft %b/%s %Tw/%Tc/%Tt %B %ts %ac/%fc/%bc/%sc/%rc %sq/%bq %hr %hs SNI: %[var(sess.sni)]'";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Timeout applied to each runtime socket command, in seconds
pub const RUNTIME_COMMAND_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Controller Ports
// ============================================================================

/// Default HTTP bind port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default HTTPS bind port
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Default port of the local default backend
pub const DEFAULT_BACKEND_PORT: u16 = 6061;

/// Default port of the controller's own HTTP server (pprof, prometheus)
pub const DEFAULT_CONTROLLER_PORT: u16 = 6060;

/// Stats frontend port
pub const STATS_PORT: u16 = 1024;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 9090;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Name of the fake service exposing controller metrics through the proxy
pub const PROMETHEUS_SERVICE_NAME: &str = "prometheus";

/// Path at which the pprof endpoints are routed
pub const PPROF_PATH: &str = "/debug/pprof";
