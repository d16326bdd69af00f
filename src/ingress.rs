// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ingress translator.
//!
//! One ingress becomes:
//!
//! - a backend per referenced service port (see [`crate::service`])
//! - routing map rows per host/path, or conditional `use_backend`s for `route-acl` services
//! - frontend rules from its annotations, scoped to its routes by rule id
//! - frontend certificates for its TLS entries
//! - the default backend of the `http`/`https` frontends when `spec.defaultBackend` is set,
//!   applied by the refresh handler
//!
//! Problems with one path or one annotation are collected and do not stop the others.

use crate::annotations::frontend::{frontend_rules, RuleOwner};
use crate::annotations::AnnotationSet;
use crate::certs::SecretType;
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::models::Mode;
use crate::proxy::ProxyApi;
use crate::route::{add_host_path_route, custom_route, Route};
use crate::service::{translate_service, IngressRef, ServiceRequest};
use crate::store::{Ingress, IngressPath, K8sStore, Status};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Service annotation turning its routes into conditional `use_backend`s.
const ROUTE_ACL: &str = "route-acl";

/// Translate `ingress` into backends, routes and rules.
///
/// Ingresses of another controller are skipped. Per-path failures land in `errors`.
///
/// # Errors
///
/// Proxy failures that leave the transaction unusable.
pub fn translate_ingress(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    ingress: &Ingress,
    errors: &mut ErrorList,
) -> Result<()> {
    if !store.is_ingress_supported(ingress) {
        debug!(
            ingress = %format!("{}/{}", ingress.namespace, ingress.name),
            class = %ingress.class,
            "ingress not handled by this controller"
        );
        return Ok(());
    }
    translate_owned_ingress(store, proxy, ctx, ingress, errors)
}

/// Translate an ingress known to belong to this controller, such as one synthesized by a
/// handler.
///
/// # Errors
///
/// Proxy failures that leave the transaction unusable.
pub(crate) fn translate_owned_ingress(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    ingress: &Ingress,
    errors: &mut ErrorList,
) -> Result<()> {
    let tls = ingress.tls.values().any(|t| t.status != Status::Deleted);
    let (passthrough, rule_ids) = {
        let main = store.config_maps.main.annotations.clone();
        let sources = [&ingress.annotations, &main];
        let annotations = AnnotationSet::new(store, &sources);
        let passthrough = annotations.bool("ssl-passthrough").unwrap_or_else(|e| {
            errors.push(e);
            false
        });
        let owner = RuleOwner {
            namespace: &ingress.namespace,
            ingress: Some(&ingress.name),
            own: &ingress.annotations,
            tls,
            passthrough,
        };
        let patterns_dir = ctx.config.paths.patterns_dir.clone();
        let out = frontend_rules(owner, annotations, &mut ctx.maps, &patterns_dir, errors);

        let mut ids = BTreeSet::new();
        for targeted in out.rules {
            for frontend in targeted.frontends {
                ids.insert(ctx.rules.add(frontend, targeted.rule.clone(), true));
            }
        }
        if let Some(userlist) = out.userlist {
            ctx.userlists.insert(userlist.name.clone(), userlist);
        }
        if let Some(table) = out.stick_table {
            ctx.active_backends.insert(table.name.clone());
            ctx.stick_tables.insert(table.name.clone(), table);
        }
        (passthrough, ids.into_iter().collect::<Vec<_>>())
    };
    if passthrough {
        ctx.passthrough = true;
    }

    add_tls_certs(store, ctx, ingress, errors);

    let mode = if passthrough { Mode::Tcp } else { Mode::Http };
    let ingress_ref = IngressRef {
        namespace: &ingress.namespace,
        name: &ingress.name,
        annotations: &ingress.annotations,
    };

    if let Some(path) = ingress
        .default_backend
        .as_ref()
        .filter(|p| p.status != Status::Deleted)
    {
        let request = ServiceRequest {
            path,
            ingress: Some(ingress_ref),
            mode,
        };
        match translate_service(store, proxy, ctx, request, errors) {
            Ok(backend) => {
                debug!(backend = %backend.name, "ingress default backend");
                ctx.default_backend = Some(backend.name);
            }
            Err(e) => errors.push(e),
        }
    }

    for rule in ingress.rules.values().filter(|r| r.status != Status::Deleted) {
        for path in rule.paths.values().filter(|p| p.status != Status::Deleted) {
            let request = ServiceRequest {
                path,
                ingress: Some(ingress_ref),
                mode,
            };
            let backend = match translate_service(store, proxy, ctx, request, errors) {
                Ok(backend) => backend,
                Err(e) if e.is_not_found() => {
                    warn!(
                        ingress = %format!("{}/{}", ingress.namespace, ingress.name),
                        host = %rule.host,
                        path = %path.path,
                        error = %e,
                        "path skipped"
                    );
                    errors.push(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let route = Route {
                host: &rule.host,
                path,
                backend: &backend.name,
                rule_ids: &rule_ids,
                ssl_passthrough: passthrough,
            };
            match route_acl(store, path) {
                Some(acl) if !passthrough => {
                    ctx.custom_routes.insert(custom_route(&route, &acl));
                }
                _ => errors.add(add_host_path_route(&route, &mut ctx.maps)),
            }
        }
    }
    Ok(())
}

/// `route-acl` set on the service of `path`.
fn route_acl(store: &K8sStore, path: &IngressPath) -> Option<String> {
    store
        .get_service(&path.svc_namespace, &path.svc_name)
        .ok()?
        .annotations
        .get(ROUTE_ACL)
        .filter(|v| v.status != Status::Deleted && !v.value.trim().is_empty())
        .map(|v| v.value.trim().to_string())
}

/// Write the certificates of the TLS entries; a missing secret only skips its entry.
fn add_tls_certs(store: &K8sStore, ctx: &mut Context, ingress: &Ingress, errors: &mut ErrorList) {
    let secrets: BTreeSet<&str> = ingress
        .tls
        .values()
        .filter(|t| t.status != Status::Deleted && !t.secret_name.is_empty())
        .map(|t| t.secret_name.as_str())
        .collect();
    for secret_name in secrets {
        let (namespace, name) = secret_name
            .split_once('/')
            .unwrap_or((ingress.namespace.as_str(), secret_name));
        match store.get_secret(namespace, name) {
            Ok(secret) => errors.add(ctx.certs.add_secret(secret, SecretType::FrontendCert)),
            Err(e) => warn!(
                ingress = %format!("{}/{}", ingress.namespace, ingress.name),
                error = %e,
                "TLS secret not found, entry skipped"
            ),
        }
    }
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod ingress_tests;
