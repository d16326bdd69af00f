// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLS on the `https` frontend.
//!
//! ## Offload
//!
//! Termination is on while at least one frontend certificate is in use, with the
//! `tls-alpn` and `client-strict-sni` settings of the main ConfigMap. `client-ca` turns on
//! client certificate verification (`client-crt-optional` makes it optional).
//!
//! ## SSL passthrough
//!
//! When an ingress asks for passthrough, the public HTTPS port moves to a TCP `ssl`
//! frontend that routes on SNI. Traffic without a passthrough route goes to the `ssl`
//! backend, which chains into the `https` frontend over a unix socket with PROXY protocol
//! v2 so the client address survives.

use super::{
    bare_frontend, delete_bind, delete_frontend, ensure_backend, ensure_bind, ensure_frontend,
    ensure_server, sync_web_binds, Handler,
};
use crate::annotations::AnnotationSet;
use crate::certs::SecretType;
use crate::constants::{
    BACKEND_SSL, BIND_IPV4, BIND_IPV6, BIND_UNIX_SOCKET, FRONTEND_HTTPS, FRONTEND_SSL,
    SSL_FRONTEND_SOCKET, SSL_PASSTHROUGH_LOG_FORMAT,
};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::models::{Backend, Bind, Frontend, Mode, Server, ServerParams};
use crate::proxy::ProxyApi;
use crate::store::K8sStore;
use async_trait::async_trait;
use tracing::{info, warn};

/// Client certificate verification wanted on the `https` binds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ClientAuth {
    ca_file: Option<String>,
    verify: Option<String>,
}

#[derive(Debug, Default)]
pub struct Https;

#[async_trait]
impl Handler for Https {
    fn name(&self) -> &'static str {
        "https"
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
        let alpn = annotations.string("tls-alpn").filter(|v| !v.is_empty());
        let strict_sni = annotations.bool("client-strict-sni").unwrap_or_else(|e| {
            errors.push(e);
            false
        });

        if ctx.passthrough {
            enable_passthrough(proxy, ctx)?;
        } else {
            disable_passthrough(proxy, ctx)?;
        }

        if ctx.certs.front_certs_in_use() {
            let cert_dir = ctx.certs.frontend_dir().display().to_string();
            if proxy.frontend_ssl_offload_enable(
                FRONTEND_HTTPS,
                &cert_dir,
                alpn.as_deref(),
                strict_sni,
            )? {
                ctx.action.reload("SSL offload enabled");
            }
            let auth = client_auth(annotations, ctx, &mut errors);
            apply_client_auth(proxy, ctx, &auth)?;
        } else if proxy.frontend_ssl_offload_disable(FRONTEND_HTTPS)? {
            ctx.action.reload("SSL offload disabled");
        }
        errors.into_result()
    }
}

fn socket_address(ctx: &Context) -> String {
    format!(
        "unix@{}",
        ctx.config.paths.runtime_dir.join(SSL_FRONTEND_SOCKET).display()
    )
}

fn enable_passthrough(proxy: &mut dyn ProxyApi, ctx: &mut Context) -> Result<()> {
    let socket = socket_address(ctx);

    for name in [BIND_IPV4, BIND_IPV6] {
        delete_bind(proxy, ctx, FRONTEND_HTTPS, name)?;
    }
    ensure_bind(
        proxy,
        ctx,
        FRONTEND_HTTPS,
        Bind {
            name: BIND_UNIX_SOCKET.to_string(),
            address: socket.clone(),
            accept_proxy: true,
            ..Bind::default()
        },
    )?;

    let frontend = Frontend {
        default_backend: Some(BACKEND_SSL.to_string()),
        log_format: Some(SSL_PASSTHROUGH_LOG_FORMAT.to_string()),
        ..bare_frontend(FRONTEND_SSL, Mode::Tcp)
    };
    if !ensure_frontend(proxy, ctx, frontend.clone())? && proxy.frontend_edit(frontend)? {
        ctx.action.reload("ssl frontend updated");
    }
    sync_web_binds(proxy, ctx, FRONTEND_SSL, ctx.config.https_port, true)?;

    ensure_backend(proxy, ctx, Backend::new(BACKEND_SSL, Mode::Tcp))?;
    ensure_server(
        proxy,
        ctx,
        BACKEND_SSL,
        Server {
            name: FRONTEND_HTTPS.to_string(),
            address: socket,
            params: ServerParams {
                send_proxy: Some("send-proxy-v2".to_string()),
                ..ServerParams::default()
            },
            ..Server::default()
        },
    )?;
    ctx.active_backends.insert(BACKEND_SSL.to_string());
    Ok(())
}

/// The `ssl` backend is left to the refresh, which drops every inactive backend.
fn disable_passthrough(proxy: &mut dyn ProxyApi, ctx: &Context) -> Result<()> {
    delete_frontend(proxy, ctx, FRONTEND_SSL)?;
    delete_bind(proxy, ctx, FRONTEND_HTTPS, BIND_UNIX_SOCKET)?;
    sync_web_binds(proxy, ctx, FRONTEND_HTTPS, ctx.config.https_port, true)
}

/// Client certificate settings from `client-ca` and `client-crt-optional`.
///
/// A missing CA secret only disables verification.
fn client_auth(
    annotations: AnnotationSet<'_>,
    ctx: &mut Context,
    errors: &mut ErrorList,
) -> ClientAuth {
    let reference = match annotations.secret("client-ca", &ctx.config.pod_namespace) {
        Ok(Some(reference)) => reference,
        Ok(None) => return ClientAuth::default(),
        Err(e) => {
            errors.push(e);
            return ClientAuth::default();
        }
    };
    let secret = match annotations.store().get_secret(&reference.namespace, &reference.name) {
        Ok(secret) => secret,
        Err(e) => {
            warn!(secret = %reference, error = %e, "client CA not found, verification disabled");
            return ClientAuth::default();
        }
    };
    let ca_file = match ctx.certs.add_secret(secret, SecretType::CaCert) {
        Ok(path) => path,
        Err(e) => {
            errors.push(e);
            return ClientAuth::default();
        }
    };
    let optional = annotations.bool("client-crt-optional").unwrap_or_else(|e| {
        errors.push(e);
        false
    });
    ClientAuth {
        ca_file: Some(ca_file),
        verify: Some(if optional { "optional" } else { "required" }.to_string()),
    }
}

fn apply_client_auth(proxy: &mut dyn ProxyApi, ctx: &Context, auth: &ClientAuth) -> Result<()> {
    let frontend = proxy.frontend_get(FRONTEND_HTTPS)?;
    let mut changed = false;
    for bind in frontend
        .binds
        .into_values()
        .filter(|b| b.ssl && !b.address.starts_with("quic"))
    {
        let edited = Bind {
            ca_file: auth.ca_file.clone(),
            verify: auth.verify.clone(),
            ..bind
        };
        changed |= proxy.frontend_bind_edit(FRONTEND_HTTPS, edited)?;
    }
    if changed {
        if auth.ca_file.is_some() {
            info!("configuring client TLS authentication");
            ctx.action.reload("configured client TLS authentication");
        } else {
            info!("removing client TLS authentication");
            ctx.action.reload("removed client TLS authentication");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "https_tests.rs"]
mod https_tests;
