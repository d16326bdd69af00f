// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Last stage of a reconcile.
//!
//! Everything the previous stages only collected is pushed here: certificate updates,
//! the rule lists of the routing frontends, map files, stick tables, config snippets and
//! userlists. Backends no stage claimed this reconcile are deleted.

use super::{ensure_backend, Handler};
use crate::annotations::{parse_bool, parse_timeout_ms};
use crate::constants::{
    DEFAULT_INSPECT_DELAY_MS, FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL,
};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::models::{Directive, Frontend, Mode, ProxyRule};
use crate::proxy::ProxyApi;
use crate::rules::ruleset::{http_baseline, map_switching_rule, ssl_baseline};
use crate::rules::{Rule, RuleSet};
use crate::store::{K8sStore, Status};
use async_trait::async_trait;
use tracing::{debug, info};

const PATH_MATCH: &str = "txn.path_match";
const SNI_MATCH: &str = "txn.sni_match";

#[derive(Debug, Default)]
pub struct Refresh;

#[async_trait]
impl Handler for Refresh {
    fn name(&self) -> &'static str {
        "refresh"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let main = &store.config_maps.main.annotations;
        let setting = |name: &str| {
            main.get(name)
                .filter(|v| v.status != Status::Deleted)
                .map(|v| v.value.trim().to_string())
        };

        ctx.certs.push_runtime_updates(proxy).await;
        if ctx.certs.certs_updated() {
            ctx.action.reload("certificates updated");
        }
        let clean_certs = match setting("clean-certs") {
            Some(value) => parse_bool("clean-certs", &value).unwrap_or_else(|e| {
                errors.push(e);
                true
            }),
            None => true,
        };
        if clean_certs {
            for removed in ctx.certs.refresh_certs(proxy).await {
                ctx.action.reload(format!("certificate '{removed}' removed"));
            }
        }

        errors.add(apply_default_backend(proxy, ctx));

        let inspect_delay_ms = match setting("timeout-client") {
            Some(value) => parse_timeout_ms("timeout-client", &value).unwrap_or_else(|e| {
                errors.push(e);
                DEFAULT_INSPECT_DELAY_MS
            }),
            None => DEFAULT_INSPECT_DELAY_MS,
        };
        for frontend in [FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL] {
            if frontend == FRONTEND_SSL && !ctx.passthrough {
                continue;
            }
            let rules = frontend_rules(ctx, frontend, inspect_delay_ms);
            match proxy.frontend_rules_replace(frontend, rules) {
                Ok(true) => ctx.action.reload(format!("rules of frontend '{frontend}' updated")),
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => errors.push(e),
            }
        }

        if ctx.maps.refresh(&mut errors) {
            ctx.action.reload("map files updated");
        }

        let tables: Vec<_> = ctx.stick_tables.values().cloned().collect();
        for table in tables {
            errors.add(ensure_backend(proxy, ctx, table));
        }

        errors.add(delete_unused_backends(proxy, ctx));

        for reason in ctx.snippets.update(proxy, &mut errors) {
            ctx.action.reload(reason);
        }

        errors.add(apply_userlists(proxy, ctx));
        errors.into_result()
    }
}

/// Rule list of `frontend`: routing variables, collected rules, then backend switching.
fn frontend_rules(ctx: &Context, frontend: &str, inspect_delay_ms: i64) -> Vec<ProxyRule> {
    let maps_dir = ctx.maps.dir();
    let (mode, match_var, baseline) = if frontend == FRONTEND_SSL {
        (Mode::Tcp, SNI_MATCH, ssl_baseline(maps_dir, inspect_delay_ms))
    } else {
        let mut baseline = http_baseline(maps_dir);
        if frontend == FRONTEND_HTTPS {
            baseline.push(Rule::ReqSetHeader {
                name: "X-Forwarded-Proto".to_string(),
                value: "https".to_string(),
            });
        }
        (Mode::Http, PATH_MATCH, baseline)
    };

    let mut set = RuleSet::new();
    for rule in baseline {
        set.add(frontend, rule, false);
    }
    for entry in ctx.rules.entries(frontend) {
        set.add(frontend, entry.rule.clone(), entry.ingress_acl);
    }
    let mut rules = set.render(frontend, mode, match_var);
    if mode == Mode::Http {
        rules.extend(ctx.custom_routes.iter().map(|route| {
            ProxyRule::new(Directive::UseBackend, route.backend.clone()).when(&route.cond)
        }));
    }
    rules.push(map_switching_rule(match_var));
    rules
}

/// Point the web frontends at the default backend chosen this reconcile.
fn apply_default_backend(proxy: &mut dyn ProxyApi, ctx: &Context) -> Result<()> {
    let Some(backend) = ctx.default_backend.clone() else {
        return Ok(());
    };
    for name in [FRONTEND_HTTP, FRONTEND_HTTPS] {
        let current = match proxy.frontend_get(name) {
            Ok(current) => current,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        if current.default_backend.as_deref() == Some(backend.as_str()) {
            continue;
        }
        proxy.frontend_edit(Frontend {
            default_backend: Some(backend.clone()),
            ..current
        })?;
        ctx.action
            .reload(format!("default backend of frontend '{name}' set to '{backend}'"));
    }
    Ok(())
}

fn delete_unused_backends(proxy: &mut dyn ProxyApi, ctx: &Context) -> Result<()> {
    for name in proxy.backends()? {
        if ctx.active_backends.contains(&name) {
            continue;
        }
        match proxy.backend_delete(&name) {
            Ok(()) => {
                debug!(backend = %name, "backend deleted");
                ctx.action.reload(format!("backend '{name}' deleted"));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Push the userlists wanted this reconcile and delete those no longer wanted.
fn apply_userlists(proxy: &mut dyn ProxyApi, ctx: &mut Context) -> Result<()> {
    let mut errors = ErrorList::new();
    for userlist in ctx.userlists.values() {
        match proxy.userlist_replace(userlist.clone()) {
            Ok(true) => ctx
                .action
                .reload(format!("userlist '{}' updated", userlist.name)),
            Ok(false) => {}
            Err(e) => errors.push(e),
        }
    }
    let stale: Vec<String> = ctx
        .applied_userlists
        .iter()
        .filter(|name| !ctx.userlists.contains_key(*name))
        .cloned()
        .collect();
    for name in stale {
        match proxy.userlist_delete(&name) {
            Ok(()) => {
                info!(userlist = %name, "userlist deleted");
                ctx.action.reload(format!("userlist '{name}' deleted"));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => errors.push(e),
        }
    }
    ctx.applied_userlists = ctx.userlists.keys().cloned().collect();
    errors.into_result()
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod refresh_tests;
