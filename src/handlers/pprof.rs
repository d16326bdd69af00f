// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Permanent `pprof` backend exposing the controller's debug endpoints under `/debug/pprof`.

use super::{ensure_backend, ensure_server, Handler};
use crate::constants::{PPROF_BACKEND, PPROF_PATH};
use crate::context::Context;
use crate::errors::Result;
use crate::proxy::models::{Backend, Mode, Server};
use crate::proxy::ProxyApi;
use crate::route::{add_host_path_route, Route};
use crate::store::{IngressPath, K8sStore, PathType};
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct Pprof;

#[async_trait]
impl Handler for Pprof {
    fn name(&self) -> &'static str {
        "pprof"
    }

    async fn update(
        &mut self,
        _store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        ensure_backend(proxy, ctx, Backend::new(PPROF_BACKEND, Mode::Http))?;
        ensure_server(
            proxy,
            ctx,
            PPROF_BACKEND,
            Server {
                name: PPROF_BACKEND.to_string(),
                address: "127.0.0.1".to_string(),
                port: Some(ctx.config.controller_port),
                ..Server::default()
            },
        )?;
        ctx.active_backends.insert(PPROF_BACKEND.to_string());

        let path = IngressPath {
            path: PPROF_PATH.to_string(),
            path_type: PathType::Prefix,
            ..IngressPath::default()
        };
        let route = Route {
            host: "",
            path: &path,
            backend: PPROF_BACKEND,
            rule_ids: &[],
            ssl_passthrough: false,
        };
        add_host_path_route(&route, &mut ctx.maps)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "pprof_tests.rs"]
mod pprof_tests;
