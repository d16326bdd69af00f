// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service translator.
//!
//! Turns the service behind an ingress path into a backend and keeps its servers in sync
//! with the service endpoints.
//!
//! Servers are pre-allocated slots (`SRV_1` .. `SRV_n`). An endpoint address keeps its
//! slot for as long as it exists; a vanished address leaves a disabled slot behind that
//! the next new address reuses. Filling or emptying a slot only changes the server address
//! and state, which the proxy applies through its runtime socket, so endpoint churn that
//! fits in the allocated slots never needs a reload. The slot count only grows.

use crate::annotations::backend::backend_model;
use crate::annotations::AnnotationSet;
use crate::constants::{
    DEFAULT_SERVER_SLOTS, DISABLED_SERVER_ADDRESS, DISABLED_SERVER_PORT, SERVER_SLOT_PREFIX,
};
use crate::context::Context;
use crate::errors::{ErrorList, Result, StoreError};
use crate::proxy::models::{Mode, Server, ServerUpdate};
use crate::proxy::ProxyApi;
use crate::snippets::SnippetOrigin;
use crate::store::{
    Annotations, HaproxySrv, IngressPath, K8sStore, PortEndpoints, RuntimeBackend, ServicePort,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Annotations setting the slot count, in precedence order.
const SLOT_ANNOTATIONS: [&str; 3] = ["scale-server-slots", "servers-increment", "server-slots"];

/// Ingress a path belongs to.
#[derive(Debug, Clone, Copy)]
pub struct IngressRef<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub annotations: &'a Annotations,
}

/// What to translate.
#[derive(Debug, Clone, Copy)]
pub struct ServiceRequest<'a> {
    pub path: &'a IngressPath,
    /// `None` for backends not attached to an ingress (tcp-services, default backend)
    pub ingress: Option<IngressRef<'a>>,
    pub mode: Mode,
}

/// The backend a path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBackend {
    pub name: String,
    pub port: ServicePort,
    /// Created by this call
    pub created: bool,
}

/// First service port matching the path by number or by name.
///
/// # Errors
///
/// [`StoreError::PortNotFound`] when no port matches.
pub fn resolve_port(
    ports: &[ServicePort],
    path: &IngressPath,
) -> std::result::Result<ServicePort, StoreError> {
    ports
        .iter()
        .find(|p| {
            (path.svc_port_int != 0 && p.port == path.svc_port_int)
                || (!path.svc_port_string.is_empty() && p.name == path.svc_port_string)
        })
        .cloned()
        .ok_or_else(|| StoreError::PortNotFound {
            namespace: path.svc_namespace.clone(),
            name: path.svc_name.clone(),
            port: if path.svc_port_string.is_empty() {
                path.svc_port_int.to_string()
            } else {
                path.svc_port_string.clone()
            },
        })
}

/// Backend name for `service`/`port`, prefixed with the ingress when standalone.
///
/// Dots are replaced since map values use them as separators.
#[must_use]
pub fn backend_name(
    namespace: &str,
    service: &str,
    port: &ServicePort,
    standalone: Option<(&str, &str)>,
) -> String {
    let port = if port.name.is_empty() {
        port.port.to_string()
    } else {
        port.name.clone()
    };
    let name = match standalone {
        Some((ing_ns, ing_name)) => format!("{ing_ns}_{ing_name}_svc_{service}_{port}"),
        None => format!("{namespace}_svc_{service}_{port}"),
    };
    name.replace('.', "_")
}

fn slot_name(index: usize) -> String {
    format!("{SERVER_SLOT_PREFIX}{}", index + 1)
}

fn disabled_slot(index: usize) -> HaproxySrv {
    HaproxySrv {
        name: slot_name(index),
        address: String::new(),
        port: 0,
        modified: true,
    }
}

/// Fit `endpoints` into the slots of `backend`, keeping at least `slots` of them.
///
/// Returns true when slots were added to an existing set.
pub fn assign_slots(backend: &mut RuntimeBackend, endpoints: &PortEndpoints, slots: usize) -> bool {
    let before = backend.servers.len();
    let port_changed = backend.endpoints.port != endpoints.port;

    for srv in &mut backend.servers {
        if !srv.address.is_empty() && !endpoints.addresses.contains(&srv.address) {
            debug!(server = %srv.name, address = %srv.address, "endpoint gone, slot disabled");
            srv.address.clear();
            srv.modified = true;
        }
        if port_changed && !srv.address.is_empty() {
            srv.port = endpoints.port;
            srv.modified = true;
        }
    }

    let held: BTreeSet<String> = backend
        .servers
        .iter()
        .filter(|s| !s.address.is_empty())
        .map(|s| s.address.clone())
        .collect();
    for address in endpoints.addresses.difference(&held) {
        let free = match backend.servers.iter().position(|s| s.address.is_empty()) {
            Some(index) => index,
            None => {
                let start = backend.servers.len();
                let grow = slots.max(1);
                backend
                    .servers
                    .extend((start..start + grow).map(disabled_slot));
                start
            }
        };
        let srv = &mut backend.servers[free];
        srv.address.clone_from(address);
        srv.port = endpoints.port;
        srv.modified = true;
    }

    let len = backend.servers.len();
    if len < slots {
        backend.servers.extend((len..slots).map(disabled_slot));
    }
    backend.endpoints = endpoints.clone();
    before > 0 && backend.servers.len() > before
}

/// Server line of a slot.
#[must_use]
pub fn slot_server(slot: &HaproxySrv, cookie: bool) -> Server {
    let disabled = slot.address.is_empty();
    Server {
        name: slot.name.clone(),
        address: if disabled {
            DISABLED_SERVER_ADDRESS.to_string()
        } else {
            slot.address.clone()
        },
        port: if disabled {
            Some(DISABLED_SERVER_PORT)
        } else {
            u16::try_from(slot.port).ok().filter(|p| *p > 0)
        },
        maintenance: disabled,
        cookie: cookie.then(|| slot.name.clone()),
        ..Server::default()
    }
}

/// Slot count configured for the backend.
fn slot_count(annotations: AnnotationSet<'_>, errors: &mut ErrorList) -> usize {
    let name = annotations
        .explicit_alias(&SLOT_ANNOTATIONS)
        .unwrap_or(SLOT_ANNOTATIONS[0]);
    match annotations.int(name) {
        Ok(Some(n)) if n > 0 => usize::try_from(n).unwrap_or(DEFAULT_SERVER_SLOTS),
        Ok(_) => DEFAULT_SERVER_SLOTS,
        Err(e) => {
            errors.push(e);
            DEFAULT_SERVER_SLOTS
        }
    }
}

/// Translate the service behind `request.path` into a backend with its servers.
///
/// Annotations are read from the service, then the ingress, then the main ConfigMap.
/// Recoverable annotation problems land in `errors`; the backend is still created.
///
/// # Errors
///
/// [`StoreError`] when the service or its port does not exist, [`crate::errors::ProxyError`]
/// when the proxy rejects the backend.
pub fn translate_service(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    request: ServiceRequest<'_>,
    errors: &mut ErrorList,
) -> Result<ServiceBackend> {
    let path = request.path;
    let service = store
        .get_service(&path.svc_namespace, &path.svc_name)?
        .clone();
    let port = resolve_port(&service.ports, path)?;

    let empty = Annotations::new();
    let ingress_annotations = request.ingress.map_or(&empty, |i| i.annotations);
    let sources = [
        &service.annotations,
        ingress_annotations,
        &store.config_maps.main.annotations,
    ];
    let annotations = AnnotationSet::new(store, &sources);

    let standalone = match request.ingress {
        Some(ingress) => match annotations.bool("standalone-backend") {
            Ok(v) => (v || ctx.config.standalone_backend).then_some((ingress.namespace, ingress.name)),
            Err(e) => {
                errors.push(e);
                ctx.config.standalone_backend.then_some((ingress.namespace, ingress.name))
            }
        },
        None => None,
    };
    let name = backend_name(&service.namespace, &service.name, &port, standalone);
    let model = backend_model(
        &name,
        request.mode,
        &service,
        annotations,
        &mut ctx.certs,
        errors,
    );
    let slots = slot_count(annotations, errors);
    let cookie = model.cookie.as_ref().is_some_and(|c| c.kind == "insert");

    let created = match proxy.backend_get(&name) {
        Ok(_) => {
            if proxy.backend_edit(model)? {
                ctx.action.reload(format!("backend '{name}' updated"));
            }
            false
        }
        Err(e) if e.is_not_found() => {
            proxy.backend_create(model)?;
            ctx.action.reload(format!("backend '{name}' created"));
            true
        }
        Err(e) => return Err(e.into()),
    };
    ctx.active_backends.insert(name.clone());

    let own = |annotations: &Annotations| {
        annotations
            .get("backend-config-snippet")
            .filter(|v| v.status != crate::store::Status::Deleted)
            .map(|v| v.value.clone())
    };
    ctx.snippets.add_backend(&name, None);
    if let Some(snippet) = own(&service.annotations) {
        let origin = SnippetOrigin::Service {
            namespace: service.namespace.clone(),
            name: service.name.clone(),
        };
        ctx.snippets.add_backend(&name, Some((origin, &snippet)));
    }
    if let Some((ingress, snippet)) = request
        .ingress
        .and_then(|i| own(i.annotations).map(|s| (i, s)))
    {
        let origin = SnippetOrigin::Ingress {
            namespace: ingress.namespace.to_string(),
            name: ingress.name.to_string(),
        };
        ctx.snippets.add_backend(&name, Some((origin, &snippet)));
    }

    if ctx.claim_servers(&name) {
        let endpoints = if service.dns.is_empty() {
            store
                .get_endpoints(&service.namespace, &service.name)
                .remove(&port.name)
                .unwrap_or_default()
        } else {
            PortEndpoints {
                port: port.port,
                addresses: [service.dns.clone()].into_iter().collect(),
            }
        };
        let runtime = store.runtime_backend_mut(&service.namespace, &service.name, &port.name);
        runtime.name.clone_from(&name);
        runtime.dyn_update_failed = false;
        let slots = if service.dns.is_empty() { slots } else { 1 };
        let grew = assign_slots(runtime, &endpoints, slots);
        sync_servers(proxy, &name, runtime, cookie, created)?;
        if grew {
            ctx.action.reload(format!(
                "backend '{name}': server slots scaled to {}",
                runtime.servers.len()
            ));
        }
        if runtime.dyn_update_failed {
            ctx.action
                .reload(format!("backend '{name}': servers cannot be updated live"));
        }
    }

    Ok(ServiceBackend {
        name,
        port,
        created,
    })
}

/// Push the modified slots of `runtime` (every slot of a new backend).
fn sync_servers(
    proxy: &mut dyn ProxyApi,
    backend: &str,
    runtime: &mut RuntimeBackend,
    cookie: bool,
    created: bool,
) -> Result<()> {
    for slot in runtime.servers.iter_mut() {
        if !slot.modified && !created {
            continue;
        }
        let server = slot_server(slot, cookie);
        match proxy.backend_server_edit(backend, server.clone()) {
            Ok(ServerUpdate::Unchanged | ServerUpdate::Live) => {}
            Ok(ServerUpdate::NeedsReload) => runtime.dyn_update_failed = true,
            Err(e) if e.is_not_found() => {
                proxy.backend_server_create(backend, server)?;
                if !created {
                    runtime.dyn_update_failed = true;
                }
            }
            Err(e) => {
                warn!(backend = %backend, server = %slot.name, error = %e, "server update failed");
                return Err(e.into());
            }
        }
        slot.modified = false;
    }
    Ok(())
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
