// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `http`, `https` and `stats` frontends and their plain binds.
//!
//! TLS settings of the `https` binds and the passthrough unix socket bind are left to the
//! HTTPS handler, which runs once the ingresses are known.

use super::{bare_frontend, delete_frontend, ensure_bind, ensure_frontend, sync_web_binds, Handler};
use crate::constants::{
    BIND_IPV4, BIND_IPV6, FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_STATS, STATS_PORT,
};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::proxy::models::{Bind, Directive, Mode, ProxyRule};
use crate::proxy::ProxyApi;
use crate::store::K8sStore;
use async_trait::async_trait;

/// Web and stats frontends.
#[derive(Debug, Default)]
pub struct HttpBind;

#[async_trait]
impl Handler for HttpBind {
    fn name(&self) -> &'static str {
        "http-bind"
    }

    async fn update(
        &mut self,
        _store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let config = ctx.config.clone();

        if config.http {
            errors.add(web_frontend(proxy, ctx, FRONTEND_HTTP, config.http_port, false));
        } else {
            errors.add(delete_frontend(proxy, ctx, FRONTEND_HTTP));
        }
        if config.https {
            // binds depend on passthrough, see the HTTPS handler
            errors.add(ensure_frontend(proxy, ctx, bare_frontend(FRONTEND_HTTPS, Mode::Http)));
        } else {
            errors.add(delete_frontend(proxy, ctx, FRONTEND_HTTPS));
        }
        errors.add(stats_frontend(proxy, ctx));
        errors.into_result()
    }
}

fn web_frontend(
    proxy: &mut dyn ProxyApi,
    ctx: &Context,
    name: &str,
    port: u16,
    dual_stack: bool,
) -> Result<()> {
    ensure_frontend(proxy, ctx, bare_frontend(name, Mode::Http))?;
    sync_web_binds(proxy, ctx, name, port, dual_stack)
}

/// Stats frontend serving the proxy's own prometheus exporter.
fn stats_frontend(proxy: &mut dyn ProxyApi, ctx: &Context) -> Result<()> {
    ensure_frontend(proxy, ctx, bare_frontend(FRONTEND_STATS, Mode::Http))?;
    ensure_bind(
        proxy,
        ctx,
        FRONTEND_STATS,
        Bind {
            name: BIND_IPV4.to_string(),
            address: "0.0.0.0".to_string(),
            port: Some(STATS_PORT),
            ..Bind::default()
        },
    )?;
    if ctx.config.ipv6 {
        ensure_bind(
            proxy,
            ctx,
            FRONTEND_STATS,
            Bind {
                name: BIND_IPV6.to_string(),
                address: "::".to_string(),
                port: Some(STATS_PORT),
                ..Bind::default()
            },
        )?;
    } else {
        super::delete_bind(proxy, ctx, FRONTEND_STATS, BIND_IPV6)?;
    }
    let rules = vec![
        ProxyRule::new(Directive::HttpRequest, "use-service prometheus-exporter")
            .when("{ path /metrics }"),
    ];
    if proxy.frontend_rules_replace(FRONTEND_STATS, rules)? {
        ctx.action.reload("stats frontend rules updated");
    }
    Ok(())
}

#[cfg(test)]
#[path = "http_bind_tests.rs"]
mod http_bind_tests;
