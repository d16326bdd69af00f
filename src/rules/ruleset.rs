// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-frontend rule accumulation and rendering.

use super::Rule;
use crate::constants::{MAP_HOST, MAP_PATH_EXACT, MAP_PATH_PREFIX, MAP_SNI};
use crate::proxy::models::{Directive, Mode, ProxyRule};
use std::collections::BTreeMap;
use std::path::Path;

/// A rule registered on a frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub id: String,
    pub rule: Rule,
    /// Scoped to the host/paths whose map value carries `id`
    pub ingress_acl: bool,
}

/// Rules of every frontend, rebuilt each reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    frontends: BTreeMap<String, Vec<RuleEntry>>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every rule; called when a reconcile starts.
    pub fn clear(&mut self) {
        self.frontends.clear();
    }

    /// Register `rule` on `frontend` and return its id.
    ///
    /// Adding the same rule twice keeps one entry; a global registration wins over an
    /// ingress-scoped one.
    pub fn add(&mut self, frontend: &str, rule: Rule, ingress_acl: bool) -> String {
        let id = rule.id();
        let entries = self.frontends.entry(frontend.to_string()).or_default();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => existing.ingress_acl &= ingress_acl,
            None => entries.push(RuleEntry {
                id: id.clone(),
                rule,
                ingress_acl,
            }),
        }
        id
    }

    /// Entries of `frontend` in registration order.
    #[must_use]
    pub fn entries(&self, frontend: &str) -> &[RuleEntry] {
        self.frontends.get(frontend).map_or(&[], Vec::as_slice)
    }

    /// Frontends with at least one rule.
    pub fn frontends(&self) -> impl Iterator<Item = &str> {
        self.frontends.keys().map(String::as_str)
    }

    /// Render the rules of `frontend`.
    ///
    /// Entries are ordered by rule kind; within a kind registration order is kept.
    /// Ingress-scoped entries match on `match_var` (`txn.path_match` or `txn.sni_match`).
    #[must_use]
    pub fn render(&self, frontend: &str, mode: Mode, match_var: &str) -> Vec<ProxyRule> {
        let mut entries: Vec<&RuleEntry> = self.entries(frontend).iter().collect();
        entries.sort_by_key(|e| e.rule.rank());
        entries
            .into_iter()
            .flat_map(|e| {
                let scope = e
                    .ingress_acl
                    .then(|| format!("{{ var({match_var}) -m dom {} }}", e.id));
                e.rule.render(mode, scope.as_deref())
            })
            .collect()
    }
}

fn map_path(maps_dir: &Path, name: &str) -> String {
    maps_dir
        .join(format!("{name}.{}", crate::constants::MAP_FILE_EXTENSION))
        .display()
        .to_string()
}

/// Routing variables installed on the `http` and `https` frontends.
#[must_use]
pub fn http_baseline(maps_dir: &Path) -> Vec<Rule> {
    let host = map_path(maps_dir, MAP_HOST);
    let exact = map_path(maps_dir, MAP_PATH_EXACT);
    let prefix = map_path(maps_dir, MAP_PATH_PREFIX);
    let set_var = |var: &str, expression: String, cond: Option<&str>| Rule::ReqSetVar {
        var: var.to_string(),
        expression,
        cond: cond.map(str::to_string),
    };
    vec![
        set_var("txn.base", "base".to_string(), None),
        set_var("txn.path", "path".to_string(), None),
        set_var("txn.host", "req.hdr(Host),field(1,:),lower".to_string(), None),
        set_var("txn.host_match", format!("var(txn.host),map({host})"), None),
        set_var(
            "txn.host_match",
            format!("var(txn.host),regsub(^[^.]*,,),map({host},'')"),
            Some("!{ var(txn.host_match) -m found }"),
        ),
        set_var(
            "txn.path_match",
            format!("var(txn.host_match),concat(,txn.path,),map({exact})"),
            None,
        ),
        set_var(
            "txn.path_match",
            format!("var(txn.host_match),concat(,txn.path,),map_beg({prefix})"),
            Some("!{ var(txn.path_match) -m found }"),
        ),
    ]
}

/// Rules installed on the `ssl` passthrough frontend.
#[must_use]
pub fn ssl_baseline(maps_dir: &Path, inspect_delay_ms: i64) -> Vec<Rule> {
    let sni = map_path(maps_dir, MAP_SNI);
    vec![
        Rule::ReqAcceptContent,
        Rule::ReqInspectDelay {
            timeout_ms: inspect_delay_ms,
        },
        Rule::ReqSetVar {
            var: "sess.sni".to_string(),
            expression: "req_ssl_sni".to_string(),
            cond: None,
        },
        Rule::ReqSetVar {
            var: "txn.sni_match".to_string(),
            expression: format!("req_ssl_sni,map({sni})"),
            cond: None,
        },
        Rule::ReqSetVar {
            var: "txn.sni_match".to_string(),
            expression: format!("req_ssl_sni,regsub(^[^.]*,,),map({sni},'')"),
            cond: Some("!{ var(txn.sni_match) -m found }".to_string()),
        },
    ]
}

/// `use_backend` switching on the backend name carried in the first field of `match_var`.
#[must_use]
pub fn map_switching_rule(match_var: &str) -> ProxyRule {
    ProxyRule::new(
        Directive::UseBackend,
        format!("%[var({match_var}),field(1,.)]"),
    )
    .when(&format!("{{ var({match_var}) -m found }}"))
}

#[cfg(test)]
#[path = "ruleset_tests.rs"]
mod ruleset_tests;
