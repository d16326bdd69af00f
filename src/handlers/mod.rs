// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcile pipeline stages.
//!
//! A reconcile runs the handlers of [`before_ingress`], translates every ingress, then runs
//! the handlers of [`after_ingress`]. The order is fixed:
//!
//! ## Before the ingresses
//!
//! - [`global::GlobalCfg`] - `global`, log targets, `defaults`, main ConfigMap rules and snippets
//! - [`http_bind::HttpBind`] - the `http`, `https` and `stats` frontends and their plain binds
//! - [`prometheus::Prometheus`] - controller metrics exposed through a synthesized ingress
//! - [`pprof::Pprof`] - profiling backend routed at `/debug/pprof`
//! - [`default_service::DefaultService`] - default backend of the web frontends
//!
//! ## After the ingresses
//!
//! These need what the ingresses collected (frontend certificates, passthrough).
//!
//! - [`https::Https`] - TLS offload, client certificates and SSL passthrough
//! - [`proxy_protocol::ProxyProtocol`] - `proxy-protocol` source list
//! - [`files::ErrorFiles`] and [`files::PatternFiles`] - ConfigMap keys written to files
//! - [`tcp_services::TcpServices`] - `tcp-<port>` frontends of the tcp-services ConfigMap
//! - [`tcp_cr::TcpCr`] - frontends of TCP custom resources
//! - [`frontend_cr::FrontendCr`] - Frontend custom resources overlaid on managed frontends
//! - [`quic::Quic`] - HTTP/3 binds and `alt-svc` advertisement
//! - [`refresh::Refresh`] - renders rules, maps, snippets and userlists, drops unused backends

pub mod default_service;
pub mod files;
pub mod frontend_cr;
pub mod global;
pub mod http_bind;
pub mod https;
pub mod pprof;
pub mod prometheus;
pub mod proxy_protocol;
pub mod quic;
pub mod refresh;
pub mod tcp_cr;
pub mod tcp_services;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::ControllerConfig;
use crate::context::Context;
use crate::errors::Result;
use crate::proxy::models::{Backend, Bind, Frontend, Mode, Server};
use crate::proxy::ProxyApi;
use crate::store::K8sStore;
use async_trait::async_trait;
use tracing::debug;

/// One stage of the reconcile pipeline.
///
/// Handlers raise reloads and restarts through `ctx.action`. An error is logged by the
/// reconciler and does not stop the stages after it.
#[async_trait]
pub trait Handler: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Apply this stage to the open proxy transaction.
    ///
    /// # Errors
    ///
    /// Everything that went wrong; independent parts of the stage are still applied.
    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()>;
}

/// Stages run before the ingresses are translated.
#[must_use]
pub fn before_ingress(config: &ControllerConfig) -> Vec<Box<dyn Handler>> {
    let mut handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(global::GlobalCfg),
        Box::new(http_bind::HttpBind),
    ];
    if config.prometheus {
        handlers.push(Box::new(prometheus::Prometheus));
    }
    if config.pprof {
        handlers.push(Box::new(pprof::Pprof));
    }
    handlers.push(Box::new(default_service::DefaultService));
    handlers
}

/// Stages run after the ingresses are translated.
#[must_use]
pub fn after_ingress(config: &ControllerConfig) -> Vec<Box<dyn Handler>> {
    let mut handlers: Vec<Box<dyn Handler>> = Vec::new();
    if config.https {
        handlers.push(Box::new(https::Https));
    }
    handlers.push(Box::new(proxy_protocol::ProxyProtocol));
    handlers.push(Box::new(files::ErrorFiles));
    handlers.push(Box::new(files::PatternFiles));
    handlers.push(Box::new(tcp_services::TcpServices));
    handlers.push(Box::new(tcp_cr::TcpCr));
    handlers.push(Box::new(frontend_cr::FrontendCr::default()));
    if config.quic {
        handlers.push(Box::new(quic::Quic));
    }
    handlers.push(Box::new(refresh::Refresh));
    handlers
}

// ============================================================================
// Proxy helpers shared by the handlers
// ============================================================================

/// Create `frontend` unless a frontend of that name exists; returns true when created.
///
/// # Errors
///
/// Proxy failures other than the frontend existing.
pub(crate) fn ensure_frontend(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: Frontend,
) -> Result<bool> {
    let name = frontend.name.clone();
    match proxy.frontend_get(&name) {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => {
            proxy.frontend_create(frontend)?;
            ctx.action.reload(format!("frontend '{name}' created"));
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete `frontend` if it exists.
///
/// # Errors
///
/// Proxy failures other than the frontend being absent.
pub(crate) fn delete_frontend(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: &str,
) -> Result<()> {
    match proxy.frontend_delete(frontend) {
        Ok(()) => {
            ctx.action.reload(format!("frontend '{frontend}' deleted"));
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create or edit `bind` on `frontend`.
///
/// The TLS settings of an existing bind are owned by the offload calls and kept as they are.
///
/// # Errors
///
/// Proxy failures, including `frontend` being absent.
pub(crate) fn ensure_bind(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: &str,
    bind: Bind,
) -> Result<()> {
    let name = bind.name.clone();
    let current = proxy.frontend_get(frontend)?;
    match current.binds.get(&name) {
        Some(existing) => {
            let bind = Bind {
                ssl: existing.ssl,
                ssl_certificate: existing.ssl_certificate.clone(),
                alpn: existing.alpn.clone(),
                strict_sni: existing.strict_sni,
                ca_file: existing.ca_file.clone(),
                verify: existing.verify.clone(),
                ..bind
            };
            if proxy.frontend_bind_edit(frontend, bind)? {
                ctx.action
                    .reload(format!("bind '{name}' of frontend '{frontend}' updated"));
            }
        }
        None => {
            proxy.frontend_bind_create(frontend, bind)?;
            ctx.action
                .reload(format!("bind '{name}' of frontend '{frontend}' created"));
        }
    }
    Ok(())
}

/// Delete bind `name` of `frontend` if both exist.
///
/// # Errors
///
/// Proxy failures other than absence.
pub(crate) fn delete_bind(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: &str,
    name: &str,
) -> Result<()> {
    match proxy.frontend_bind_delete(frontend, name) {
        Ok(()) => {
            ctx.action
                .reload(format!("bind '{name}' of frontend '{frontend}' deleted"));
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create `backend` or bring its settings in line; servers are left to [`ensure_server`].
///
/// # Errors
///
/// Proxy failures.
pub(crate) fn ensure_backend(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    backend: Backend,
) -> Result<()> {
    let name = backend.name.clone();
    match proxy.backend_get(&name) {
        Ok(_) => {
            if proxy.backend_edit(backend)? {
                ctx.action.reload(format!("backend '{name}' updated"));
            }
        }
        Err(e) if e.is_not_found() => {
            proxy.backend_create(backend)?;
            ctx.action.reload(format!("backend '{name}' created"));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Create or edit `server` of `backend`.
///
/// # Errors
///
/// Proxy failures, including `backend` being absent.
pub(crate) fn ensure_server(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    backend: &str,
    server: Server,
) -> Result<()> {
    use crate::proxy::models::ServerUpdate;
    let name = server.name.clone();
    match proxy.backend_server_edit(backend, server.clone()) {
        Ok(ServerUpdate::Unchanged) => {}
        Ok(ServerUpdate::Live) => debug!(backend = %backend, server = %name, "server updated live"),
        Ok(ServerUpdate::NeedsReload) => ctx
            .action
            .reload(format!("server '{backend}/{name}' updated")),
        Err(e) if e.is_not_found() => {
            proxy.backend_server_create(backend, server)?;
            ctx.action
                .reload(format!("server '{backend}/{name}' created"));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// IPv4 and IPv6 binds on `port`, each paired with whether its address family is enabled.
///
/// `dual_stack` makes the IPv6 bind accept IPv4 too.
#[must_use]
pub(crate) fn web_binds(
    config: &ControllerConfig,
    port: u16,
    dual_stack: bool,
) -> Vec<(Bind, bool)> {
    use crate::constants::{BIND_IPV4, BIND_IPV6};
    vec![
        (
            Bind {
                name: BIND_IPV4.to_string(),
                address: config.ipv4_address.clone(),
                port: Some(port),
                ..Bind::default()
            },
            config.ipv4,
        ),
        (
            Bind {
                name: BIND_IPV6.to_string(),
                address: config.ipv6_address.clone(),
                port: Some(port),
                v4v6: dual_stack,
                ..Bind::default()
            },
            config.ipv6,
        ),
    ]
}

/// Create or delete the v4/v6 binds of `frontend` on `port` following the enabled families.
///
/// # Errors
///
/// Proxy failures.
pub(crate) fn sync_web_binds(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    frontend: &str,
    port: u16,
    dual_stack: bool,
) -> Result<()> {
    for (bind, enabled) in web_binds(&ctx.config, port, dual_stack) {
        if enabled {
            ensure_bind(proxy, ctx, frontend, bind)?;
        } else {
            delete_bind(proxy, ctx, frontend, &bind.name)?;
        }
    }
    Ok(())
}

/// Store a service backed by the controller process itself.
///
/// The namespace filter does not apply. Nothing is touched when the same service is already
/// stored, so steady state leaves its status EMPTY.
pub(crate) fn fake_service(
    store: &mut K8sStore,
    namespace: &str,
    name: &str,
    service_port: i64,
    target_port: u16,
) {
    use crate::store::{Endpoints, PortEndpoints, Service, ServicePort, Status};
    const PORT_NAME: &str = "http";

    let service = Service {
        namespace: namespace.to_string(),
        name: name.to_string(),
        ports: vec![ServicePort {
            name: PORT_NAME.to_string(),
            protocol: "TCP".to_string(),
            port: service_port,
            status: Status::Added,
        }],
        faked: true,
        status: Status::Added,
        ..Service::default()
    };
    let endpoints = Endpoints {
        slice_name: name.to_string(),
        namespace: namespace.to_string(),
        service: name.to_string(),
        ports: [(
            PORT_NAME.to_string(),
            PortEndpoints {
                port: i64::from(target_port),
                addresses: ["127.0.0.1".to_string()].into(),
            },
        )]
        .into(),
        status: Status::Added,
    };

    let ns = store.ensure_namespace(namespace);
    let known = ns
        .services
        .get(name)
        .is_some_and(|s| s.status != Status::Deleted && s.same_content(&service));
    if !known {
        ns.services.insert(name.to_string(), service);
    }
    let slices = ns.endpoints.entry(name.to_string()).or_default();
    let known = slices
        .get(name)
        .is_some_and(|e| e.status != Status::Deleted && e.ports == endpoints.ports);
    if !known {
        slices.insert(name.to_string(), endpoints);
    }
}

/// A frontend of `mode` named `name` with nothing else set.
#[must_use]
pub(crate) fn bare_frontend(name: &str, mode: Mode) -> Frontend {
    Frontend {
        name: name.to_string(),
        mode,
        ..Frontend::default()
    }
}
