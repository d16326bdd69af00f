// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed model of the proxy configuration sections managed by the controller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Proxy mode of a frontend or backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Http,
    Tcp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
        })
    }
}

/// Global section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Global {
    pub master_worker: bool,
    pub pidfile: Option<String>,
    /// Runtime API socket path
    pub stats_socket: Option<String>,
    pub maxconn: Option<i64>,
    pub nbthread: Option<i64>,
    pub hard_stop_after: Option<String>,
    pub ssl_default_bind_options: Option<String>,
    pub ssl_default_bind_ciphers: Option<String>,
}

/// One `log` line of the global section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogTarget {
    pub address: String,
    pub facility: Option<String>,
    pub level: Option<String>,
    pub format: Option<String>,
    pub length: Option<i64>,
}

/// Defaults section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Defaults {
    pub mode: Mode,
    pub log_global: bool,
    pub log_format: Option<String>,
    pub dontlognull: bool,
    pub logasap: bool,
    /// `http-keep-alive`, `httpclose` or `http-server-close`
    pub http_connection_mode: Option<String>,
    /// Timeout name (`client`, `http-request`, ...) to value
    pub timeouts: BTreeMap<String, String>,
    /// HTTP status code to error page file
    pub errorfiles: BTreeMap<u16, String>,
}

/// A listen endpoint of a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bind {
    pub name: String,
    /// IP address, `unix@<path>` or `quic4@<ip>`
    pub address: String,
    pub port: Option<u16>,
    pub v4v6: bool,
    pub accept_proxy: bool,
    pub ssl: bool,
    /// Certificate file or directory
    pub ssl_certificate: Option<String>,
    pub alpn: Option<String>,
    pub strict_sni: bool,
    pub ca_file: Option<String>,
    /// `none`, `optional` or `required`
    pub verify: Option<String>,
}

/// Leading keyword of a frontend rule line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Directive {
    Declare,
    Acl,
    TcpRequest,
    HttpRequest,
    HttpResponse,
    UseBackend,
}

impl Directive {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Declare => "declare",
            Self::Acl => "acl",
            Self::TcpRequest => "tcp-request",
            Self::HttpRequest => "http-request",
            Self::HttpResponse => "http-response",
            Self::UseBackend => "use_backend",
        }
    }
}

/// One rule line: `<directive> <action> [<cond>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    pub directive: Directive,
    pub action: String,
    /// Full condition including `if`/`unless`
    pub cond: Option<String>,
}

impl ProxyRule {
    pub fn new(directive: Directive, action: impl Into<String>) -> Self {
        Self {
            directive,
            action: action.into(),
            cond: None,
        }
    }

    /// Attach `if <cond>`; empty conditions are ignored.
    #[must_use]
    pub fn when(mut self, cond: &str) -> Self {
        let cond = cond.trim();
        if !cond.is_empty() {
            self.cond = Some(format!("if {cond}"));
        }
        self
    }
}

impl fmt::Display for ProxyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.directive.keyword(), self.action)?;
        if let Some(cond) = &self.cond {
            write!(f, " {cond}")?;
        }
        Ok(())
    }
}

/// Frontend section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frontend {
    pub name: String,
    pub mode: Mode,
    pub default_backend: Option<String>,
    pub maxconn: Option<i64>,
    pub log_format: Option<String>,
    pub tcplog: bool,
    pub binds: BTreeMap<String, Bind>,
    /// Rendered grouped by directive, insertion order within a group
    pub rules: Vec<ProxyRule>,
    pub snippet: Vec<String>,
}

/// Load-balancing algorithm with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub algorithm: String,
    /// Rendered after the algorithm, e.g. `len 10 whole`
    pub params: Option<String>,
}

/// Cookie persistence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    /// `insert`, `rewrite` or `prefix`
    pub kind: String,
    pub indirect: bool,
    pub nocache: bool,
    pub dynamic: bool,
}

/// HTTP health check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpCheck {
    pub method: Option<String>,
    pub uri: String,
}

/// Stick table attached to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StickTable {
    /// `ip`, `ipv6`, `string`
    pub kind: String,
    pub size: String,
    pub expire: Option<String>,
    pub store: Option<String>,
}

/// Parameters shared by `default-server` and `server` lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerParams {
    pub check: bool,
    pub inter: Option<String>,
    pub maxconn: Option<i64>,
    pub weight: Option<i64>,
    /// `send-proxy`, `send-proxy-v2`, `send-proxy-v2-ssl`, `send-proxy-v2-ssl-cn`
    pub send_proxy: Option<String>,
    pub ssl: bool,
    pub verify: Option<String>,
    pub alpn: Option<String>,
    pub proto: Option<String>,
    pub ssl_certificate: Option<String>,
    pub ssl_cafile: Option<String>,
    pub sni: Option<String>,
    pub init_addr: Option<String>,
    pub resolvers: Option<String>,
}

/// A server of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub maintenance: bool,
    pub cookie: Option<String>,
    pub params: ServerParams,
}

impl Server {
    /// True when `other` differs from `self` only in fields the runtime API can change.
    #[must_use]
    pub fn runtime_compatible(&self, other: &Self) -> bool {
        self.name == other.name && self.cookie == other.cookie && self.params == other.params
    }
}

/// Backend section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Backend {
    pub name: String,
    pub mode: Mode,
    pub balance: Option<Balance>,
    pub cookie: Option<Cookie>,
    pub dynamic_cookie_key: Option<String>,
    pub forwardfor: bool,
    pub abortonclose: bool,
    pub check_timeout: Option<String>,
    pub httpchk: Option<HttpCheck>,
    pub default_server: Option<ServerParams>,
    pub stick_table: Option<StickTable>,
    /// Insertion order is kept
    pub servers: Vec<Server>,
    pub snippet: Vec<String>,
}

impl Backend {
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            ..Self::default()
        }
    }

    /// Same backend section ignoring servers and snippet.
    #[must_use]
    pub fn same_settings(&self, other: &Self) -> bool {
        let strip = |b: &Self| Self {
            servers: Vec::new(),
            snippet: Vec::new(),
            ..b.clone()
        };
        strip(self) == strip(other)
    }
}

/// A user of a userlist.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password: String,
    /// Password is a crypt(3) hash
    pub secure: bool,
}

/// Userlist section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Userlist {
    pub name: String,
    pub users: Vec<User>,
}

/// Result of a server edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerUpdate {
    /// Nothing to change
    Unchanged,
    /// Applied through the runtime API at commit, no reload needed
    Live,
    /// Structural change, a reload is needed
    NeedsReload,
}
