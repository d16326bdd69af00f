// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Frontends declared by `TCP` custom resources.
//!
//! Every item of a resource becomes the TCP frontend `tcpcr_<namespace>_<frontend>` with the
//! binds of the item and the item service as default backend. Additional services of the
//! item only get a backend. Items colliding with an earlier item (same frontend name or same
//! address:port) are skipped. The resource owns its frontends; a frontend left without
//! owner is deleted.

use super::Handler;
use crate::certs::SecretType;
use crate::constants::TCP_CR_PREFIX;
use crate::context::Context;
use crate::crd::{CrBind, TcpModel, TcpService};
use crate::errors::{ErrorList, Result};
use crate::proxy::models::{Bind, Frontend, Mode};
use crate::proxy::ProxyApi;
use crate::refcount::{Owner, OwnerType};
use crate::service::{translate_service, ServiceRequest};
use crate::store::{IngressPath, K8sStore, Status};
use async_trait::async_trait;
use tracing::{debug, error};

/// Proxy name of the frontend `frontend` of a resource in `namespace`.
#[must_use]
pub fn frontend_name(namespace: &str, frontend: &str) -> String {
    format!("{TCP_CR_PREFIX}_{namespace}_{frontend}")
}

/// An item to apply, detached from the store.
struct Work {
    owner: Owner,
    namespace: String,
    model: TcpModel,
}

#[derive(Debug, Default)]
pub struct TcpCr;

#[async_trait]
impl Handler for TcpCr {
    fn name(&self) -> &'static str {
        "tcp-cr"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        for owner in ctx.refcount.owners(OwnerType::TcpCustomResource) {
            ctx.refcount.remove_owner(&owner);
        }

        let mut work = Vec::new();
        for ns in store.namespaces.values() {
            for tcp in ns.crs.tcps.values().filter(|t| t.status != Status::Deleted) {
                let owner = Owner::new(OwnerType::TcpCustomResource, &tcp.namespace, &tcp.name);
                for item in tcp.items.iter().filter(|i| i.status != Status::Deleted) {
                    if let Some(reason) = &item.collision {
                        error!(
                            tcp = %format!("{}/{}/{}", tcp.namespace, tcp.name, item.model.name),
                            reason = %reason,
                            "TCP item skipped"
                        );
                        continue;
                    }
                    work.push(Work {
                        owner: owner.clone(),
                        namespace: tcp.namespace.clone(),
                        model: item.model.clone(),
                    });
                }
            }
        }

        for item in work {
            if let Err(e) = store.get_service(&item.namespace, &item.model.service.name) {
                errors.push(e);
                continue;
            }
            let name = frontend_name(&item.namespace, &item.model.frontend.name);
            ctx.refcount.add_owner(item.owner.clone(), &name);
            if let Err(e) = apply_item(store, proxy, ctx, &name, &item, &mut errors) {
                errors.push(e);
            }
        }

        let prefix = format!("{TCP_CR_PREFIX}_");
        for name in proxy.frontends()? {
            if name.starts_with(&prefix) && !ctx.refcount.has_owners(&name) {
                super::delete_frontend(proxy, ctx, &name)?;
                debug!(frontend = %name, "TCP frontend deleted");
            }
        }
        errors.into_result()
    }
}

fn apply_item(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    name: &str,
    item: &Work,
    errors: &mut ErrorList,
) -> Result<()> {
    let spec = &item.model.frontend;
    let log_format = spec
        .log_format
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| format!("'{f}'"));
    let wanted = Frontend {
        name: name.to_string(),
        mode: Mode::Tcp,
        maxconn: spec.maxconn,
        log_format,
        tcplog: spec.tcplog,
        ..Frontend::default()
    };
    // the default backend is set once the service is translated
    match proxy.frontend_get(name) {
        Ok(current) => {
            let wanted = Frontend {
                default_backend: current.default_backend.clone(),
                ..wanted
            };
            if proxy.frontend_edit(wanted)? {
                ctx.action.reload(format!("TCP frontend '{name}' updated"));
            }
        }
        Err(e) if e.is_not_found() => {
            proxy.frontend_create(wanted)?;
            ctx.action.reload(format!("TCP frontend '{name}' created"));
        }
        Err(e) => return Err(e.into()),
    }

    let binds: Vec<Bind> = spec
        .binds
        .iter()
        .map(|b| bind_model(store, ctx, &item.namespace, b, errors))
        .collect();
    sync_binds(proxy, ctx, name, binds)?;

    let backend = translate(store, proxy, ctx, &item.namespace, &item.model.service, errors)?;
    let current = proxy.frontend_get(name)?;
    if current.default_backend.as_deref() != Some(backend.as_str()) {
        proxy.frontend_edit(Frontend {
            default_backend: Some(backend),
            ..current
        })?;
        ctx.action
            .reload(format!("TCP frontend '{name}': default backend updated"));
    }

    for service in &item.model.services {
        if let Err(e) = translate(store, proxy, ctx, &item.namespace, service, errors) {
            errors.push(e);
        }
    }
    Ok(())
}

fn translate(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    namespace: &str,
    service: &TcpService,
    errors: &mut ErrorList,
) -> Result<String> {
    let path = IngressPath {
        svc_namespace: namespace.to_string(),
        svc_name: service.name.clone(),
        svc_port_int: service.port,
        is_tcp: true,
        ..IngressPath::default()
    };
    let request = ServiceRequest {
        path: &path,
        ingress: None,
        mode: Mode::Tcp,
    };
    Ok(translate_service(store, proxy, ctx, request, errors)?.name)
}

/// Proxy bind of `bind`.
///
/// An `sslCertificate` naming a secret of the resource namespace is written to the TCP
/// certificate directory; any other value is used as a path.
fn bind_model(
    store: &K8sStore,
    ctx: &mut Context,
    namespace: &str,
    bind: &CrBind,
    errors: &mut ErrorList,
) -> Bind {
    let mut ssl_certificate = bind.ssl_certificate.clone();
    if let Some(cert) = bind.ssl_certificate.as_deref().filter(|_| bind.ssl) {
        if let Ok(secret) = store.get_secret(namespace, cert) {
            match ctx.certs.add_secret(secret, SecretType::TcpCrCert) {
                Ok(path) => ssl_certificate = Some(path),
                Err(e) => errors.push(e),
            }
        }
    }
    Bind {
        name: bind.name.clone(),
        address: bind.address.clone(),
        port: Some(bind.port),
        v4v6: bind.v4v6,
        accept_proxy: bind.accept_proxy,
        ssl: bind.ssl,
        ssl_certificate: ssl_certificate.filter(|_| bind.ssl),
        alpn: bind.alpn.clone().filter(|_| bind.ssl),
        ..Bind::default()
    }
}

/// Make the binds of `frontend` exactly `binds`.
fn sync_binds(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: &str,
    binds: Vec<Bind>,
) -> Result<()> {
    let current = proxy.frontend_get(frontend)?.binds;
    for name in current.keys().filter(|n| !binds.iter().any(|b| &b.name == *n)) {
        super::delete_bind(proxy, ctx, frontend, name)?;
    }
    for bind in binds {
        let name = bind.name.clone();
        if current.contains_key(&name) {
            if proxy.frontend_bind_edit(frontend, bind)? {
                ctx.action
                    .reload(format!("bind '{name}' of frontend '{frontend}' updated"));
            }
        } else {
            proxy.frontend_bind_create(frontend, bind)?;
            ctx.action
                .reload(format!("bind '{name}' of frontend '{frontend}' created"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tcp_cr_tests.rs"]
mod tcp_cr_tests;
