// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller metrics published through the proxy.
//!
//! A service backed by `127.0.0.1:<controller-port>` and an ingress routing `/metrics` to it
//! are synthesized and translated like any other ingress. Setting
//! `prometheus-endpoint-auth-secret` in the main ConfigMap protects the route with basic
//! authentication against the users of that secret.

use super::{fake_service, Handler};
use crate::constants::{METRICS_SERVER_PATH, PROMETHEUS_SERVICE_NAME};
use crate::context::Context;
use crate::errors::{ErrorList, Result};
use crate::ingress::translate_owned_ingress;
use crate::proxy::ProxyApi;
use crate::store::{
    annotations_from, Ingress, IngressPath, IngressRule, K8sStore, PathType, Status,
};
use async_trait::async_trait;

/// Port of the synthesized service; the endpoint is the controller port.
const PROMETHEUS_SERVICE_PORT: i64 = 8765;

/// ConfigMap key naming the secret of the users allowed to scrape.
const AUTH_SECRET_KEY: &str = "prometheus-endpoint-auth-secret";

#[derive(Debug, Default)]
pub struct Prometheus;

#[async_trait]
impl Handler for Prometheus {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let namespace = ctx.config.pod_namespace.clone();
        fake_service(
            store,
            &namespace,
            PROMETHEUS_SERVICE_NAME,
            PROMETHEUS_SERVICE_PORT,
            ctx.config.controller_port,
        );
        let auth_secret = store.annotation(AUTH_SECRET_KEY, &[&store.config_maps.main.annotations]);
        let ingress = metrics_ingress(&namespace, auth_secret.as_deref());

        let mut errors = ErrorList::new();
        translate_owned_ingress(store, proxy, ctx, &ingress, &mut errors)?;
        errors.into_result()
    }
}

/// Ingress routing `/metrics` of any host to the controller.
fn metrics_ingress(namespace: &str, auth_secret: Option<&str>) -> Ingress {
    let path = IngressPath {
        svc_namespace: namespace.to_string(),
        svc_name: PROMETHEUS_SERVICE_NAME.to_string(),
        svc_port_string: "http".to_string(),
        path: METRICS_SERVER_PATH.to_string(),
        path_type: PathType::ImplementationSpecific,
        ..IngressPath::default()
    };
    let rule = IngressRule {
        host: String::new(),
        paths: [(path.key(), path)].into(),
        status: Status::Empty,
    };

    // the route has no host, so it cannot follow a ConfigMap wide ssl-passthrough
    let mut pairs = vec![("ssl-passthrough", "false")];
    if let Some(secret) = auth_secret {
        pairs.push(("auth-type", "basic-auth"));
        pairs.push(("auth-secret", secret));
    }
    Ingress {
        namespace: namespace.to_string(),
        name: PROMETHEUS_SERVICE_NAME.to_string(),
        annotations: annotations_from(pairs),
        rules: [(String::new(), rule)].into(),
        ..Ingress::default()
    }
}

#[cfg(test)]
#[path = "prometheus_tests.rs"]
mod prometheus_tests;
