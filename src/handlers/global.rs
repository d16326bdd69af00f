// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process level sections and everything else the main ConfigMap sets for all traffic.
//!
//! - `global`, log targets and `defaults` (a log target change restarts the proxy)
//! - `global-config-snippet`, `frontend-config-snippet` and `backend-config-snippet`
//! - frontend rules of the main ConfigMap, applied to every request
//! - the default certificate (`ssl-certificate` or `--default-ssl-certificate`)

use super::Handler;
use crate::annotations::frontend::{frontend_rules, RuleOwner};
use crate::annotations::global::global_settings;
use crate::annotations::AnnotationSet;
use crate::certs::SecretType;
use crate::config::ObjectRef;
use crate::constants::{FRONTEND_HTTP, FRONTEND_HTTPS};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::ProxyApi;
use crate::snippets::SnippetOrigin;
use crate::store::K8sStore;
use async_trait::async_trait;
use tracing::warn;

/// `global`, `defaults` and main ConfigMap wide settings.
#[derive(Debug, Default)]
pub struct GlobalCfg;

#[async_trait]
impl Handler for GlobalCfg {
    fn name(&self) -> &'static str {
        "global-cfg"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let main = store.config_maps.main.annotations.clone();
        let sources = [&main];
        let annotations = AnnotationSet::new(store, &sources);

        let settings = global_settings(annotations, &ctx.config, &mut errors);
        if proxy.global_push(settings.global)? {
            ctx.action.reload("global section updated");
        }
        if proxy.log_targets_push(settings.log_targets)? {
            ctx.action.restart("global log targets updated");
        }
        // error pages are owned by the errorfiles handler
        let mut defaults = settings.defaults;
        defaults.errorfiles = proxy.defaults_get()?.errorfiles;
        if proxy.defaults_push(defaults)? {
            ctx.action.reload("defaults section updated");
        }

        if let Some(snippet) = annotations.string("global-config-snippet") {
            ctx.snippets.set_global(&snippet);
        }
        if let Some(snippet) = annotations.string("frontend-config-snippet") {
            for frontend in [FRONTEND_HTTP, FRONTEND_HTTPS] {
                ctx.snippets.set_frontend(frontend, &snippet);
            }
        }
        if let Some(snippet) = annotations.string("backend-config-snippet") {
            let origin = SnippetOrigin::ConfigMap {
                namespace: store.config_maps.main.namespace.clone(),
                name: store.config_maps.main.name.clone(),
            };
            ctx.snippets.set_backend_default(origin, &snippet);
        }

        let passthrough = annotations.bool("ssl-passthrough").unwrap_or_else(|e| {
            errors.push(e);
            false
        });
        let owner = RuleOwner {
            namespace: &store.config_maps.main.namespace,
            ingress: None,
            own: &main,
            tls: false,
            passthrough,
        };
        let patterns_dir = ctx.config.paths.patterns_dir.clone();
        let out = frontend_rules(owner, annotations, &mut ctx.maps, &patterns_dir, &mut errors);
        for targeted in out.rules {
            for frontend in targeted.frontends {
                ctx.rules.add(frontend, targeted.rule.clone(), false);
            }
        }
        if let Some(userlist) = out.userlist {
            ctx.userlists.insert(userlist.name.clone(), userlist);
        }
        if let Some(table) = out.stick_table {
            ctx.active_backends.insert(table.name.clone());
            ctx.stick_tables.insert(table.name.clone(), table);
        }

        add_default_cert(store, ctx, &mut errors);
        errors.into_result()
    }
}

/// Secret of the certificate served when no SNI matches.
///
/// The `ssl-certificate` ConfigMap key wins over `--default-ssl-certificate`.
pub(crate) fn default_cert_secret(
    store: &K8sStore,
    ctx: &Context,
    errors: &mut ErrorList,
) -> Option<ObjectRef> {
    let sources = [&store.config_maps.main.annotations];
    let annotations = AnnotationSet::new(store, &sources);
    match annotations.secret("ssl-certificate", &ctx.config.pod_namespace) {
        Ok(Some(secret)) => Some(secret),
        Ok(None) => ctx.config.default_ssl_certificate.clone(),
        Err(e) => {
            errors.push(e);
            ctx.config.default_ssl_certificate.clone()
        }
    }
}

/// Write the default certificate.
fn add_default_cert(store: &K8sStore, ctx: &mut Context, errors: &mut ErrorList) {
    let Some(secret) = default_cert_secret(store, ctx, errors) else {
        return;
    };
    match store.get_secret(&secret.namespace, &secret.name) {
        Ok(secret) => errors.add(ctx.certs.add_secret(secret, SecretType::FrontendDefaultCert)),
        Err(e) => warn!(secret = %secret, error = %e, "default certificate not found"),
    }
}

#[cfg(test)]
#[path = "global_tests.rs"]
mod global_tests;
