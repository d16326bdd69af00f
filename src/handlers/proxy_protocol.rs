// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `proxy-protocol`: expect a PROXY protocol header from the listed sources.
//!
//! The rule goes on the frontends that accept client connections: `http` and `https`, or
//! `http` and `ssl` once SSL passthrough owns the HTTPS port.

use super::Handler;
use crate::annotations::frontend::is_source;
use crate::constants::{FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL};
use crate::context::Context;
use crate::errors::{AnnotationError, ErrorList, Result};
use crate::proxy::ProxyApi;
use crate::rules::Rule;
use crate::store::K8sStore;
use async_trait::async_trait;

const KEY: &str = "proxy-protocol";

#[derive(Debug, Default)]
pub struct ProxyProtocol;

#[async_trait]
impl Handler for ProxyProtocol {
    fn name(&self) -> &'static str {
        "proxy-protocol"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        _proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let Some(value) = store.annotation(KEY, &[&store.config_maps.main.annotations]) else {
            return Ok(());
        };
        let mut errors = ErrorList::new();
        let mut sources = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if is_source(entry) {
                sources.push(entry.to_string());
            } else {
                errors.push(AnnotationError::invalid(
                    KEY,
                    &value,
                    format!("'{entry}' is not an IP address or CIDR block"),
                ));
            }
        }
        if sources.is_empty() {
            return errors.into_result();
        }

        let src_map = ctx.maps.pattern_map(KEY, &sources).display().to_string();
        let tls_frontend = if ctx.passthrough {
            FRONTEND_SSL
        } else {
            FRONTEND_HTTPS
        };
        for frontend in [FRONTEND_HTTP, tls_frontend] {
            ctx.rules.add(
                frontend,
                Rule::ReqProxyProtocol {
                    src_map: src_map.clone(),
                },
                false,
            );
        }
        errors.into_result()
    }
}

#[cfg(test)]
#[path = "proxy_protocol_tests.rs"]
mod proxy_protocol_tests;
