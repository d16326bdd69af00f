// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Frontend rules built from ingress and ConfigMap annotations.
//!
//! A rule is only produced when its triggering annotation (`ssl-redirect`, `deny-list`,
//! `rate-limit-requests`, `auth-type`, ...) is set on the owner itself; refinements such
//! as `rate-limit-period` or `auth-realm` fall back to the ConfigMap and the defaults.
//! An ingress with TLS gets an SSL redirect unless `ssl-redirect` says otherwise.

use super::{is_set, parse_bool, parse_timeout_ms, AnnotationSet};
use crate::constants::{
    FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL, PATTERNS_DIR, RATE_LIMIT_BACKEND_PREFIX,
};
use crate::errors::{AnnotationError, ErrorList};
use crate::maps::Maps;
use crate::proxy::models::{Backend, Mode, StickTable, User, Userlist};
use crate::rules::{Redirect, Rule};
use crate::store::Annotations;
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;

/// Userlist name of the rules set from the main ConfigMap.
pub const GLOBAL_USERLIST: &str = "Global";

const REDIRECT_CODES: [i64; 5] = [301, 302, 303, 307, 308];

/// Object whose annotations are turned into rules.
#[derive(Debug, Clone, Copy)]
pub struct RuleOwner<'a> {
    pub namespace: &'a str,
    /// Ingress name, `None` for the main ConfigMap
    pub ingress: Option<&'a str>,
    /// Annotations able to trigger a rule
    pub own: &'a Annotations,
    /// The ingress terminates TLS
    pub tls: bool,
    /// The ingress is routed through the passthrough frontend
    pub passthrough: bool,
}

/// A rule and the frontends it is registered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedRule {
    pub frontends: Vec<&'static str>,
    pub rule: Rule,
}

/// Everything the rule annotations of one owner produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontendRules {
    pub rules: Vec<TargetedRule>,
    pub userlist: Option<Userlist>,
    /// Stick-table backend backing the rate limit
    pub stick_table: Option<Backend>,
}

impl FrontendRules {
    fn push(&mut self, frontends: &[&'static str], rule: Rule) {
        self.rules.push(TargetedRule {
            frontends: frontends.to_vec(),
            rule,
        });
    }
}

/// Build the rules set by the annotations of `owner`.
///
/// IP lists are written into pattern maps through `maps`; values prefixed with
/// `patterns/` name a file of `patterns_dir` instead.
pub fn frontend_rules(
    owner: RuleOwner<'_>,
    annotations: AnnotationSet<'_>,
    maps: &mut Maps,
    patterns_dir: &Path,
    errors: &mut ErrorList,
) -> FrontendRules {
    let mut out = FrontendRules::default();
    let trigger = |name: &str| {
        if is_set(&[owner.own], name) {
            annotations.string(name)
        } else {
            None
        }
    };
    let web: &[&'static str] = &[FRONTEND_HTTP, FRONTEND_HTTPS];
    let web_and_ssl: &[&'static str] = if owner.passthrough {
        &[FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL]
    } else {
        web
    };

    match ssl_redirect(owner, annotations) {
        Ok(Some(rule)) => out.push(&[FRONTEND_HTTP], rule),
        Ok(None) => {}
        Err(e) => errors.push(e),
    }

    if let Some(target) = trigger("request-redirect") {
        match redirect_code(annotations, "request-redirect-code") {
            Ok(code) => out.push(
                web,
                Rule::ReqRedirect {
                    redirect: Redirect::Prefix { target },
                    code,
                },
            ),
            Err(e) => errors.push(e),
        }
    }

    for (names, kind, allow_list) in [
        (["deny-list", "blacklist"], "blacklist", false),
        (["allow-list", "whitelist"], "whitelist", true),
    ] {
        let Some((name, value)) = names
            .into_iter()
            .find_map(|n| trigger(n).map(|v| (n, v)))
        else {
            continue;
        };
        match source_map(name, &value, kind, maps, patterns_dir) {
            Ok(src_map) => out.push(
                web_and_ssl,
                Rule::ReqDeny {
                    src_map,
                    allow_list,
                },
            ),
            Err(e) => errors.push(e),
        }
    }

    if let Some(header) = trigger("src-ip-header") {
        out.push(web, Rule::ReqSetSrc { header });
    }

    if let Some(host) = trigger("set-host") {
        out.push(web, Rule::ReqSetHost { host });
    }

    if let Some(value) = trigger("path-rewrite") {
        match path_rewrite(&value) {
            Ok(rule) => out.push(web, rule),
            Err(e) => errors.push(e),
        }
    }

    for (name, response) in [("request-set-header", false), ("response-set-header", true)] {
        let Some(value) = trigger(name) else {
            continue;
        };
        match headers(name, &value) {
            Ok(pairs) => {
                for (header, value) in pairs {
                    let rule = if response {
                        Rule::ResSetHeader {
                            name: header,
                            value,
                        }
                    } else {
                        Rule::ReqSetHeader {
                            name: header,
                            value,
                        }
                    };
                    out.push(web, rule);
                }
            }
            Err(e) => errors.push(e),
        }
    }

    match rate_limit(owner, annotations, maps, patterns_dir) {
        Ok(Some((rule, table))) => {
            out.push(web, rule);
            out.stick_table = Some(table);
        }
        Ok(None) => {}
        Err(e) => errors.push(e),
    }

    match basic_auth(owner, annotations) {
        Ok(Some((rule, userlist))) => {
            out.push(web, rule);
            out.userlist = Some(userlist);
        }
        Ok(None) => {}
        Err(e) => errors.push(e),
    }

    if let Some(value) = trigger("request-capture") {
        match annotations.int("request-capture-len") {
            Ok(len) => {
                for expression in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    out.push(
                        web_and_ssl,
                        Rule::ReqCapture {
                            expression: expression.to_string(),
                            len: len.unwrap_or(128),
                        },
                    );
                }
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(value) = trigger("cors-enable") {
        match parse_bool("cors-enable", &value).and_then(|on| cors(on, annotations)) {
            Ok(Some(rule)) => out.push(web, rule),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }

    out
}

fn ssl_redirect(
    owner: RuleOwner<'_>,
    annotations: AnnotationSet<'_>,
) -> Result<Option<Rule>, AnnotationError> {
    let enabled = if is_set(&[owner.own], "ssl-redirect") {
        annotations.bool("ssl-redirect")?
    } else if owner.ingress.is_some() {
        // An explicit ConfigMap value wins over the TLS auto-enable
        match annotations.string("ssl-redirect") {
            Some(v) => parse_bool("ssl-redirect", &v)?,
            None => owner.tls,
        }
    } else {
        false
    };
    if !enabled {
        return Ok(None);
    }
    let port = match annotations.int("ssl-redirect-port")? {
        Some(p) => u16::try_from(p).map_err(|_| {
            AnnotationError::invalid("ssl-redirect-port", &p.to_string(), "not a port number")
        })?,
        None => 443,
    };
    let code = redirect_code(annotations, "ssl-redirect-code")?;
    Ok(Some(Rule::ReqRedirect {
        redirect: Redirect::Scheme { port },
        code,
    }))
}

fn redirect_code(annotations: AnnotationSet<'_>, name: &str) -> Result<i64, AnnotationError> {
    let code = annotations.int(name)?.unwrap_or(302);
    if REDIRECT_CODES.contains(&code) {
        Ok(code)
    } else {
        Err(AnnotationError::invalid(
            name,
            &code.to_string(),
            "expected 301, 302, 303, 307 or 308",
        ))
    }
}

/// True for an IP address or a CIDR block.
#[must_use]
pub fn is_source(value: &str) -> bool {
    match value.split_once('/') {
        Some((ip, prefix)) => match (ip.parse::<IpAddr>(), prefix.parse::<u8>()) {
            (Ok(IpAddr::V4(_)), Ok(p)) => p <= 32,
            (Ok(IpAddr::V6(_)), Ok(p)) => p <= 128,
            _ => false,
        },
        None => value.parse::<IpAddr>().is_ok(),
    }
}

/// Resolve an IP list annotation to the pattern file holding it.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] when an entry is neither an address nor a CIDR block.
pub fn source_map(
    name: &str,
    value: &str,
    kind: &str,
    maps: &mut Maps,
    patterns_dir: &Path,
) -> Result<String, AnnotationError> {
    if let Some(file) = value.trim().strip_prefix(&format!("{PATTERNS_DIR}/")) {
        if file.is_empty() || file.contains('/') {
            return Err(AnnotationError::invalid(name, value, "invalid pattern file"));
        }
        return Ok(patterns_dir.join(file).display().to_string());
    }
    let mut entries = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !is_source(entry) {
            return Err(AnnotationError::invalid(
                name,
                value,
                format!("'{entry}' is not an IP address or CIDR block"),
            ));
        }
        entries.push(entry.to_string());
    }
    if entries.is_empty() {
        return Err(AnnotationError::invalid(name, value, "empty list"));
    }
    Ok(maps.pattern_map(kind, &entries).display().to_string())
}

fn path_rewrite(value: &str) -> Result<Rule, AnnotationError> {
    let words: Vec<&str> = value.split_whitespace().collect();
    match words.as_slice() {
        [path] => Ok(Rule::ReqPathRewrite {
            pattern: None,
            replacement: (*path).to_string(),
        }),
        [pattern, replacement] => Ok(Rule::ReqPathRewrite {
            pattern: Some((*pattern).to_string()),
            replacement: (*replacement).to_string(),
        }),
        _ => Err(AnnotationError::invalid(
            "path-rewrite",
            value,
            "expected '<path>' or '<regex> <replacement>'",
        )),
    }
}

/// One `Name value` pair per line.
fn headers(name: &str, value: &str) -> Result<Vec<(String, String)>, AnnotationError> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            line.split_once(char::is_whitespace)
                .map(|(h, v)| (h.to_string(), v.trim().to_string()))
                .ok_or_else(|| AnnotationError::invalid(name, line, "expected 'Name value'"))
        })
        .collect()
}

fn rate_limit(
    owner: RuleOwner<'_>,
    annotations: AnnotationSet<'_>,
    maps: &mut Maps,
    patterns_dir: &Path,
) -> Result<Option<(Rule, Backend)>, AnnotationError> {
    const REFINEMENTS: [&str; 4] = [
        "rate-limit-period",
        "rate-limit-size",
        "rate-limit-status-code",
        "rate-limit-whitelist",
    ];
    if !is_set(&[owner.own], "rate-limit-requests") {
        if let Some(name) = REFINEMENTS.into_iter().find(|n| is_set(&[owner.own], n)) {
            return Err(AnnotationError::invalid(
                name,
                &annotations.string(name).unwrap_or_default(),
                "requires rate-limit-requests",
            ));
        }
        return Ok(None);
    }
    let Some(requests) = annotations.int("rate-limit-requests")? else {
        return Ok(None);
    };
    let period = annotations
        .string("rate-limit-period")
        .unwrap_or_else(|| "1s".to_string());
    let period_ms = parse_timeout_ms("rate-limit-period", &period)?;
    let size = annotations
        .string("rate-limit-size")
        .unwrap_or_else(|| "100k".to_string());
    let status_code = annotations.int("rate-limit-status-code")?.unwrap_or(403);
    let whitelist_map = match annotations.string("rate-limit-whitelist") {
        Some(value) => Some(source_map(
            "rate-limit-whitelist",
            &value,
            "ratelimit-whitelist",
            maps,
            patterns_dir,
        )?),
        None => None,
    };

    let table = format!("{RATE_LIMIT_BACKEND_PREFIX}{period_ms}");
    let mut backend = Backend::new(&table, Mode::Http);
    backend.stick_table = Some(StickTable {
        kind: "ip".to_string(),
        size,
        expire: Some(period.clone()),
        store: Some(format!("http_req_rate({period})")),
    });
    Ok(Some((
        Rule::ReqRateLimit {
            table,
            requests,
            status_code,
            whitelist_map,
        },
        backend,
    )))
}

fn basic_auth(
    owner: RuleOwner<'_>,
    annotations: AnnotationSet<'_>,
) -> Result<Option<(Rule, Userlist)>, AnnotationError> {
    if !is_set(&[owner.own], "auth-type") {
        return Ok(None);
    }
    let auth_type = annotations.string("auth-type").unwrap_or_default();
    if auth_type != "basic-auth" {
        return Err(AnnotationError::invalid(
            "auth-type",
            &auth_type,
            "only 'basic-auth' is supported",
        ));
    }
    let reference = annotations
        .secret("auth-secret", owner.namespace)?
        .ok_or_else(|| AnnotationError::invalid("auth-secret", "", "required by auth-type"))?;
    let secret = annotations
        .store()
        .get_secret(&reference.namespace, &reference.name)
        .map_err(|e| AnnotationError::invalid("auth-secret", &reference.to_string(), e.to_string()))?;

    let mut users = Vec::new();
    for (user, password) in &secret.data {
        let password = String::from_utf8_lossy(password);
        let password = password.strip_suffix('\n').unwrap_or(&password);
        if password.is_empty() {
            warn!(secret = %reference, user = %user, "empty password, user skipped");
            continue;
        }
        users.push(User {
            name: user.clone(),
            password: password.to_string(),
            secure: true,
        });
    }
    let name = match owner.ingress {
        Some(ingress) => format!("{}-{ingress}", owner.namespace),
        None => GLOBAL_USERLIST.to_string(),
    };
    let realm = annotations
        .string("auth-realm")
        .unwrap_or_else(|| "Protected Content".to_string())
        .replace(' ', "-");
    Ok(Some((
        Rule::ReqAuth {
            userlist: name.clone(),
            realm,
        },
        Userlist { name, users },
    )))
}

fn cors(enabled: bool, annotations: AnnotationSet<'_>) -> Result<Option<Rule>, AnnotationError> {
    if !enabled {
        return Ok(None);
    }
    let value = |name: &str| annotations.string(name).unwrap_or_else(|| "*".to_string());
    let max_age = annotations
        .string("cors-max-age")
        .map(|v| parse_timeout_ms("cors-max-age", &v))
        .transpose()?
        .unwrap_or(5000);
    Ok(Some(Rule::ResSetCors {
        origin: value("cors-allow-origin"),
        methods: value("cors-allow-methods"),
        headers: value("cors-allow-headers"),
        max_age_secs: max_age / 1000,
        credentials: annotations.bool("cors-allow-credentials")?,
    }))
}

#[cfg(test)]
#[path = "frontend_tests.rs"]
mod frontend_tests;
