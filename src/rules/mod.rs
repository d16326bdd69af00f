// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Frontend request/response rules.
//!
//! A [`Rule`] is a closed tagged union: each variant carries its parameters and knows
//! how to render itself into [`ProxyRule`] lines for an HTTP or TCP frontend. Rules are
//! collected per frontend in a [`RuleSet`](ruleset::RuleSet) during a reconcile and
//! replaced wholesale on the proxy when the rendered list differs.
//!
//! Rules coming from an ingress are scoped by an ACL on the routing variable: the
//! map value of every host/path the ingress serves carries the rule id, so
//! `{ var(txn.path_match) -m dom <id> }` matches exactly those requests.

pub mod ruleset;

pub use ruleset::{RuleEntry, RuleSet};

use crate::proxy::models::{Directive, Mode, ProxyRule};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Redirect flavours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Redirect {
    /// HTTP to HTTPS; a port other than 443 is kept in the location
    Scheme { port: u16 },
    /// Replace scheme and host, keep the path
    Prefix { target: String },
}

/// A frontend rule.
///
/// Variants are declared in the order they are rendered on a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    ReqAcceptContent,
    ReqInspectDelay {
        timeout_ms: i64,
    },
    ReqProxyProtocol {
        /// Pattern file of allowed sources
        src_map: String,
    },
    ReqSetVar {
        /// Full variable name, e.g. `txn.host`
        var: String,
        expression: String,
        cond: Option<String>,
    },
    ReqSetSrc {
        header: String,
    },
    ReqDeny {
        /// Pattern file of source addresses
        src_map: String,
        /// Deny everything not in the file instead of what is in it
        allow_list: bool,
    },
    ReqAuth {
        userlist: String,
        realm: String,
    },
    ReqRateLimit {
        table: String,
        requests: i64,
        status_code: i64,
        /// Pattern file of sources exempt from the limit
        whitelist_map: Option<String>,
    },
    ReqCapture {
        expression: String,
        len: i64,
    },
    ReqRedirect {
        redirect: Redirect,
        code: i64,
    },
    ReqSetHeader {
        name: String,
        value: String,
    },
    ReqSetHost {
        host: String,
    },
    ReqPathRewrite {
        /// Regex to replace; `None` sets the whole path
        pattern: Option<String>,
        replacement: String,
    },
    ResSetHeader {
        name: String,
        value: String,
    },
    ResSetCors {
        origin: String,
        methods: String,
        headers: String,
        max_age_secs: i64,
        credentials: bool,
    },
}

/// Quote `value` when the proxy would split it.
fn quoted(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Join condition fragments with AND semantics.
fn join_cond(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Rule {
    /// Render rank; lower renders first.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::ReqAcceptContent => 0,
            Self::ReqInspectDelay { .. } => 1,
            Self::ReqProxyProtocol { .. } => 2,
            Self::ReqSetVar { .. } => 3,
            Self::ReqSetSrc { .. } => 4,
            Self::ReqDeny { .. } => 5,
            Self::ReqAuth { .. } => 6,
            Self::ReqRateLimit { .. } => 7,
            Self::ReqCapture { .. } => 8,
            Self::ReqRedirect { .. } => 9,
            Self::ReqSetHeader { .. } => 10,
            Self::ReqSetHost { .. } => 11,
            Self::ReqPathRewrite { .. } => 12,
            Self::ResSetHeader { .. } => 13,
            Self::ResSetCors { .. } => 14,
        }
    }

    /// Stable identifier derived from the rule content.
    #[must_use]
    pub fn id(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        let digest = Sha256::digest(serialized.as_bytes());
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Render for a frontend in `mode`, restricted by `scope` when set.
    ///
    /// Variants that have no meaning in `mode` render nothing.
    #[must_use]
    pub fn render(&self, mode: Mode, scope: Option<&str>) -> Vec<ProxyRule> {
        match mode {
            Mode::Http => self.render_http(scope),
            Mode::Tcp => self.render_tcp(scope),
        }
    }

    fn render_http(&self, scope: Option<&str>) -> Vec<ProxyRule> {
        let req = |action: String, cond: String| {
            ProxyRule::new(Directive::HttpRequest, action).when(&cond)
        };
        let res = |action: String, cond: String| {
            ProxyRule::new(Directive::HttpResponse, action).when(&cond)
        };
        let scoped = join_cond(&[scope]);
        match self {
            Self::ReqAcceptContent | Self::ReqInspectDelay { .. } => Vec::new(),
            Self::ReqProxyProtocol { src_map } => vec![ProxyRule::new(
                Directive::TcpRequest,
                "connection expect-proxy layer4",
            )
            .when(&format!("{{ src -f {src_map} }}"))],
            Self::ReqSetVar {
                var,
                expression,
                cond,
            } => vec![req(
                format!("set-var({var}) {expression}"),
                join_cond(&[cond.as_deref(), scope]),
            )],
            Self::ReqSetSrc { header } => {
                vec![req(format!("set-src hdr({header})"), scoped)]
            }
            Self::ReqDeny {
                src_map,
                allow_list,
            } => {
                let matcher = if *allow_list {
                    format!("!{{ src -f {src_map} }}")
                } else {
                    format!("{{ src -f {src_map} }}")
                };
                vec![req(
                    "deny deny_status 403".to_string(),
                    join_cond(&[Some(&matcher), scope]),
                )]
            }
            Self::ReqAuth { userlist, realm } => vec![req(
                format!("auth realm {}", quoted(realm)),
                join_cond(&[Some(&format!("!{{ http_auth({userlist}) }}")), scope]),
            )],
            Self::ReqRateLimit {
                table,
                requests,
                status_code,
                whitelist_map,
            } => {
                let exempt = whitelist_map
                    .as_ref()
                    .map(|m| format!("!{{ src -f {m} }}"));
                vec![
                    req(
                        format!("track-sc0 src table {table}"),
                        join_cond(&[exempt.as_deref(), scope]),
                    ),
                    req(
                        format!("deny deny_status {status_code}"),
                        join_cond(&[
                            Some(&format!("{{ sc0_http_req_rate({table}) gt {requests} }}")),
                            exempt.as_deref(),
                            scope,
                        ]),
                    ),
                ]
            }
            Self::ReqCapture { expression, len } => {
                vec![req(format!("capture {expression} len {len}"), scoped)]
            }
            Self::ReqRedirect { redirect, code } => match redirect {
                Redirect::Scheme { port } if *port == 443 => vec![req(
                    format!("redirect scheme https code {code}"),
                    join_cond(&[Some("!{ ssl_fc }"), scope]),
                )],
                Redirect::Scheme { port } => vec![req(
                    format!(
                        "redirect location https://%[hdr(host),field(1,:)]:{port}%[capture.req.uri] code {code}"
                    ),
                    join_cond(&[Some("!{ ssl_fc }"), scope]),
                )],
                Redirect::Prefix { target } => {
                    let prefix = if target.contains("://") {
                        target.clone()
                    } else {
                        format!("%[ssl_fc,iif(https,http)]://{target}")
                    };
                    vec![req(format!("redirect prefix {prefix} code {code}"), scoped)]
                }
            },
            Self::ReqSetHeader { name, value } => {
                vec![req(format!("set-header {name} {}", quoted(value)), scoped)]
            }
            Self::ReqSetHost { host } => {
                vec![req(format!("set-header Host {}", quoted(host)), scoped)]
            }
            Self::ReqPathRewrite {
                pattern,
                replacement,
            } => match pattern {
                Some(pattern) => vec![req(
                    format!("replace-path {} {}", quoted(pattern), quoted(replacement)),
                    scoped,
                )],
                None => vec![req(format!("set-path {}", quoted(replacement)), scoped)],
            },
            Self::ResSetHeader { name, value } => {
                vec![res(format!("set-header {name} {}", quoted(value)), scoped)]
            }
            Self::ResSetCors {
                origin,
                methods,
                headers,
                max_age_secs,
                credentials,
            } => {
                let mut lines = Vec::new();
                if origin == "*" {
                    lines.push(res(
                        "set-header Access-Control-Allow-Origin \"*\"".to_string(),
                        scoped.clone(),
                    ));
                } else {
                    lines.push(req(
                        "set-var(txn.cors_origin) hdr(origin)".to_string(),
                        scoped.clone(),
                    ));
                    lines.push(res(
                        "set-header Access-Control-Allow-Origin %[var(txn.cors_origin)]"
                            .to_string(),
                        join_cond(&[
                            Some(&format!("{{ var(txn.cors_origin) -m reg {origin} }}")),
                            scope,
                        ]),
                    ));
                }
                lines.push(res(
                    format!("set-header Access-Control-Allow-Methods {}", quoted(methods)),
                    scoped.clone(),
                ));
                lines.push(res(
                    format!("set-header Access-Control-Allow-Headers {}", quoted(headers)),
                    scoped.clone(),
                ));
                lines.push(res(
                    format!("set-header Access-Control-Max-Age {max_age_secs}"),
                    scoped.clone(),
                ));
                if *credentials {
                    lines.push(res(
                        "set-header Access-Control-Allow-Credentials true".to_string(),
                        scoped,
                    ));
                }
                lines
            }
        }
    }

    fn render_tcp(&self, scope: Option<&str>) -> Vec<ProxyRule> {
        let tcp = |action: String, cond: String| {
            ProxyRule::new(Directive::TcpRequest, action).when(&cond)
        };
        match self {
            Self::ReqAcceptContent => vec![tcp(
                "content accept".to_string(),
                "{ req_ssl_hello_type 1 }".to_string(),
            )],
            Self::ReqInspectDelay { timeout_ms } => {
                vec![tcp(format!("inspect-delay {timeout_ms}"), String::new())]
            }
            Self::ReqProxyProtocol { src_map } => vec![tcp(
                "connection expect-proxy layer4".to_string(),
                format!("{{ src -f {src_map} }}"),
            )],
            Self::ReqSetVar {
                var,
                expression,
                cond,
            } => vec![tcp(
                format!("content set-var({var}) {expression}"),
                join_cond(&[cond.as_deref(), scope]),
            )],
            Self::ReqDeny {
                src_map,
                allow_list,
            } => {
                let matcher = if *allow_list {
                    format!("!{{ src -f {src_map} }}")
                } else {
                    format!("{{ src -f {src_map} }}")
                };
                vec![tcp(
                    "content reject".to_string(),
                    join_cond(&[Some(&matcher), scope]),
                )]
            }
            Self::ReqCapture { expression, len } => vec![tcp(
                format!("content capture {expression} len {len}"),
                join_cond(&[scope]),
            )],
            _ => Vec::new(),
        }
    }
}
