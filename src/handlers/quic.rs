// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP/3 on the `https` frontend.
//!
//! QUIC binds need a certificate for every handshake, so they exist only while TLS offload
//! is on and the default certificate secret is present. Clients learn about them from the
//! `alt-svc` response header.

use super::global::default_cert_secret;
use super::{delete_bind, ensure_bind, Handler};
use crate::annotations::AnnotationSet;
use crate::constants::{BIND_QUIC_IPV4, BIND_QUIC_IPV6, FRONTEND_HTTPS};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::models::Bind;
use crate::proxy::ProxyApi;
use crate::rules::Rule;
use crate::store::K8sStore;
use async_trait::async_trait;
use tracing::debug;

const ALPN_H3: &str = "h3";

#[derive(Debug, Default)]
pub struct Quic;

#[async_trait]
impl Handler for Quic {
    fn name(&self) -> &'static str {
        "quic"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let offload = match proxy.frontend_ssl_offload_enabled(FRONTEND_HTTPS) {
            Ok(enabled) => enabled,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };
        // errors on the key itself are reported by the global handler
        let certificate = default_cert_secret(store, ctx, &mut ErrorList::new())
            .is_some_and(|s| store.get_secret(&s.namespace, &s.name).is_ok());

        let binds = quic_binds(ctx);
        if !(offload && certificate) {
            debug!(offload, certificate, "QUIC binds disabled");
            for (bind, _) in binds {
                if let Err(e) = delete_bind(proxy, ctx, FRONTEND_HTTPS, &bind.name) {
                    errors.push(e);
                }
            }
            return errors.into_result();
        }

        for (bind, enabled) in binds {
            let result = if enabled {
                ensure_bind(proxy, ctx, FRONTEND_HTTPS, bind)
            } else {
                delete_bind(proxy, ctx, FRONTEND_HTTPS, &bind.name)
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }

        let main = store.config_maps.main.annotations.clone();
        let sources = [&main];
        let annotations = AnnotationSet::new(store, &sources);
        let max_age = match annotations.int("quic-alt-svc-max-age") {
            Ok(value) => value.unwrap_or(60),
            Err(e) => {
                errors.push(e);
                60
            }
        };
        ctx.rules.add(
            FRONTEND_HTTPS,
            Rule::ResSetHeader {
                name: "alt-svc".to_string(),
                value: format!(
                    "h3=\":{}\";ma={max_age};",
                    ctx.config.quic_announce_port
                ),
            },
            false,
        );
        errors.into_result()
    }
}

/// QUIC binds, each paired with whether its address family is enabled.
fn quic_binds(ctx: &Context) -> [(Bind, bool); 2] {
    let config = &ctx.config;
    let cert_dir = ctx.certs.frontend_dir().display().to_string();
    let bind = |name: &str, address: String| Bind {
        name: name.to_string(),
        address,
        port: Some(config.quic_bind_port),
        ssl: true,
        ssl_certificate: Some(cert_dir.clone()),
        alpn: Some(ALPN_H3.to_string()),
        ..Bind::default()
    };
    [
        (
            bind(BIND_QUIC_IPV4, format!("quic4@{}", config.ipv4_address)),
            config.ipv4,
        ),
        (
            bind(BIND_QUIC_IPV6, format!("quic6@{}", config.ipv6_address)),
            config.ipv6,
        ),
    ]
}

#[cfg(test)]
#[path = "quic_tests.rs"]
mod quic_tests;
