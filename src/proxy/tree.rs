// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The proxy configuration as a typed tree and its text rendering.
//!
//! Sections render in a fixed order (global, defaults, userlists, frontends, backends)
//! and named sections in name order, so equal trees always produce byte-identical files.

use super::models::{
    Backend, Bind, Defaults, Directive, Frontend, Global, LogTarget, Server, ServerParams,
    Userlist,
};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Complete proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigTree {
    pub global: Global,
    pub log_targets: Vec<LogTarget>,
    pub global_snippet: Vec<String>,
    pub defaults: Defaults,
    pub frontends: BTreeMap<String, Frontend>,
    pub backends: BTreeMap<String, Backend>,
    pub userlists: BTreeMap<String, Userlist>,
}

const INDENT: &str = "  ";

fn line(out: &mut String, text: impl AsRef<str>) {
    let _ = writeln!(out, "{INDENT}{}", text.as_ref());
}

fn opt(out: &mut String, key: &str, value: Option<&impl std::fmt::Display>) {
    if let Some(value) = value {
        line(out, format!("{key} {value}"));
    }
}

fn render_global(out: &mut String, tree: &ConfigTree) {
    let g = &tree.global;
    out.push_str("global\n");
    if g.master_worker {
        line(out, "master-worker");
    }
    opt(out, "pidfile", g.pidfile.as_ref());
    if let Some(socket) = &g.stats_socket {
        line(out, format!("stats socket {socket} level admin expose-fd listeners"));
    }
    opt(out, "maxconn", g.maxconn.as_ref());
    opt(out, "nbthread", g.nbthread.as_ref());
    opt(out, "hard-stop-after", g.hard_stop_after.as_ref());
    opt(out, "ssl-default-bind-options", g.ssl_default_bind_options.as_ref());
    opt(out, "ssl-default-bind-ciphers", g.ssl_default_bind_ciphers.as_ref());
    for target in &tree.log_targets {
        let mut text = format!("log {}", target.address);
        if let Some(length) = target.length {
            let _ = write!(text, " len {length}");
        }
        if let Some(format) = &target.format {
            let _ = write!(text, " format {format}");
        }
        if let Some(facility) = &target.facility {
            let _ = write!(text, " {facility}");
            if let Some(level) = &target.level {
                let _ = write!(text, " {level}");
            }
        }
        line(out, text);
    }
    for snippet in &tree.global_snippet {
        line(out, snippet);
    }
    out.push('\n');
}

fn render_defaults(out: &mut String, d: &Defaults) {
    out.push_str("defaults\n");
    line(out, format!("mode {}", d.mode));
    if d.log_global {
        line(out, "log global");
    }
    if let Some(format) = &d.log_format {
        line(out, format!("log-format {format}"));
    }
    if d.dontlognull {
        line(out, "option dontlognull");
    }
    if d.logasap {
        line(out, "option logasap");
    }
    if let Some(mode) = &d.http_connection_mode {
        line(out, format!("option {mode}"));
    }
    for (name, value) in &d.timeouts {
        line(out, format!("timeout {name} {value}"));
    }
    for (code, file) in &d.errorfiles {
        line(out, format!("errorfile {code} {file}"));
    }
    out.push('\n');
}

fn render_userlist(out: &mut String, u: &Userlist) {
    let _ = writeln!(out, "userlist {}", u.name);
    for user in &u.users {
        let kind = if user.secure {
            "password"
        } else {
            "insecure-password"
        };
        line(out, format!("user {} {kind} {}", user.name, user.password));
    }
    out.push('\n');
}

/// Render one bind line.
#[must_use]
pub fn bind_line(bind: &Bind) -> String {
    let mut text = match bind.port {
        Some(port) if bind.address.contains(':') && !bind.address.contains('@') => {
            format!("bind [{}]:{port}", bind.address)
        }
        Some(port) => format!("bind {}:{port}", bind.address),
        None => format!("bind {}", bind.address),
    };
    let _ = write!(text, " name {}", bind.name);
    if bind.v4v6 {
        text.push_str(" v4v6");
    }
    if bind.accept_proxy {
        text.push_str(" accept-proxy");
    }
    if bind.ssl {
        text.push_str(" ssl");
        if let Some(crt) = &bind.ssl_certificate {
            let _ = write!(text, " crt {crt}");
        }
        if bind.strict_sni {
            text.push_str(" strict-sni");
        }
        if let Some(ca) = &bind.ca_file {
            let _ = write!(text, " ca-file {ca}");
        }
        if let Some(verify) = &bind.verify {
            let _ = write!(text, " verify {verify}");
        }
    }
    if let Some(alpn) = &bind.alpn {
        let _ = write!(text, " alpn {alpn}");
    }
    text
}

fn render_frontend(out: &mut String, f: &Frontend) {
    let _ = writeln!(out, "frontend {}", f.name);
    line(out, format!("mode {}", f.mode));
    opt(out, "maxconn", f.maxconn.as_ref());
    if f.tcplog {
        line(out, "option tcplog");
    }
    if let Some(format) = &f.log_format {
        line(out, format!("log-format {format}"));
    }
    for bind in f.binds.values() {
        line(out, bind_line(bind));
    }
    let mut rules: Vec<_> = f.rules.iter().collect();
    rules.sort_by_key(|r| r.directive);
    for rule in rules.iter().filter(|r| r.directive != Directive::UseBackend) {
        line(out, rule.to_string());
    }
    for snippet in &f.snippet {
        line(out, snippet);
    }
    for rule in rules.iter().filter(|r| r.directive == Directive::UseBackend) {
        line(out, rule.to_string());
    }
    opt(out, "default_backend", f.default_backend.as_ref());
    out.push('\n');
}

/// Render server parameters shared by `default-server` and `server` lines.
fn server_params(text: &mut String, p: &ServerParams) {
    if p.check {
        text.push_str(" check");
    }
    if let Some(inter) = &p.inter {
        let _ = write!(text, " inter {inter}");
    }
    if let Some(maxconn) = p.maxconn {
        let _ = write!(text, " maxconn {maxconn}");
    }
    if let Some(weight) = p.weight {
        let _ = write!(text, " weight {weight}");
    }
    if let Some(send_proxy) = &p.send_proxy {
        let _ = write!(text, " {send_proxy}");
    }
    if p.ssl {
        text.push_str(" ssl");
        if let Some(verify) = &p.verify {
            let _ = write!(text, " verify {verify}");
        }
        if let Some(ca) = &p.ssl_cafile {
            let _ = write!(text, " ca-file {ca}");
        }
        if let Some(crt) = &p.ssl_certificate {
            let _ = write!(text, " crt {crt}");
        }
        if let Some(sni) = &p.sni {
            let _ = write!(text, " sni {sni}");
        }
    }
    if let Some(alpn) = &p.alpn {
        let _ = write!(text, " alpn {alpn}");
    }
    if let Some(proto) = &p.proto {
        let _ = write!(text, " proto {proto}");
    }
    if let Some(init_addr) = &p.init_addr {
        let _ = write!(text, " init-addr {init_addr}");
    }
    if let Some(resolvers) = &p.resolvers {
        let _ = write!(text, " resolvers {resolvers}");
    }
}

/// Render one server line.
#[must_use]
pub fn server_line(server: &Server) -> String {
    let mut text = match server.port {
        Some(port) => format!("server {} {}:{port}", server.name, server.address),
        None => format!("server {} {}", server.name, server.address),
    };
    if server.maintenance {
        text.push_str(" disabled");
    }
    if let Some(cookie) = &server.cookie {
        let _ = write!(text, " cookie {cookie}");
    }
    server_params(&mut text, &server.params);
    text
}

fn render_backend(out: &mut String, b: &Backend) {
    let _ = writeln!(out, "backend {}", b.name);
    line(out, format!("mode {}", b.mode));
    if let Some(balance) = &b.balance {
        match &balance.params {
            Some(params) => line(out, format!("balance {} {params}", balance.algorithm)),
            None => line(out, format!("balance {}", balance.algorithm)),
        }
    }
    if b.forwardfor {
        line(out, "option forwardfor");
    }
    if b.abortonclose {
        line(out, "option abortonclose");
    }
    if let Some(check) = &b.httpchk {
        match &check.method {
            Some(method) => line(out, format!("option httpchk {method} {}", check.uri)),
            None => line(out, format!("option httpchk {}", check.uri)),
        }
    }
    opt(out, "timeout check", b.check_timeout.as_ref());
    if let Some(cookie) = &b.cookie {
        let mut text = format!("cookie {} {}", cookie.name, cookie.kind);
        if cookie.indirect {
            text.push_str(" indirect");
        }
        if cookie.nocache {
            text.push_str(" nocache");
        }
        if cookie.dynamic {
            text.push_str(" dynamic");
        }
        line(out, text);
    }
    opt(out, "dynamic-cookie-key", b.dynamic_cookie_key.as_ref());
    if let Some(table) = &b.stick_table {
        let mut text = format!("stick-table type {} size {}", table.kind, table.size);
        if let Some(expire) = &table.expire {
            let _ = write!(text, " expire {expire}");
        }
        if let Some(store) = &table.store {
            let _ = write!(text, " store {store}");
        }
        line(out, text);
    }
    if let Some(params) = &b.default_server {
        let mut text = String::from("default-server");
        server_params(&mut text, params);
        if text != "default-server" {
            line(out, text);
        }
    }
    for snippet in &b.snippet {
        line(out, snippet);
    }
    for server in &b.servers {
        line(out, server_line(server));
    }
    out.push('\n');
}

impl ConfigTree {
    /// Render the whole configuration.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("# Managed by haproxy-ingress, do not edit\n\n");
        render_global(&mut out, self);
        render_defaults(&mut out, &self.defaults);
        for userlist in self.userlists.values() {
            render_userlist(&mut out, userlist);
        }
        for frontend in self.frontends.values() {
            render_frontend(&mut out, frontend);
        }
        for backend in self.backends.values() {
            render_backend(&mut out, backend);
        }
        out
    }
}

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tree_tests;
