// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Default backend of the `http` and `https` frontends.
//!
//! `--default-backend-service` names a cluster service; without it the controller serves the
//! default response itself and a `default-local-service` on `127.0.0.1:<default-backend-port>`
//! is synthesized. The local service also stands in while the configured service is missing.
//! An ingress `spec.defaultBackend` translated later takes precedence.

use super::{fake_service, Handler};
use crate::constants::DEFAULT_LOCAL_BACKEND;
use crate::context::Context;
use crate::errors::{ErrorList, Result, StoreError};
use crate::proxy::models::Mode;
use crate::proxy::ProxyApi;
use crate::service::{translate_service, ServiceRequest};
use crate::store::{IngressPath, K8sStore};
use async_trait::async_trait;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct DefaultService;

/// Synthesize the local default service and return its reference.
fn local_service(store: &mut K8sStore, ctx: &Context) -> (String, String) {
    let namespace = ctx.config.pod_namespace.clone();
    let port = ctx.config.default_backend_port;
    fake_service(store, &namespace, DEFAULT_LOCAL_BACKEND, i64::from(port), port);
    (namespace, DEFAULT_LOCAL_BACKEND.to_string())
}

#[async_trait]
impl Handler for DefaultService {
    fn name(&self) -> &'static str {
        "default-service"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let (namespace, name) = match &ctx.config.default_backend_service {
            Some(service) if store.get_service(&service.namespace, &service.name).is_ok() => {
                (service.namespace.clone(), service.name.clone())
            }
            Some(service) => {
                warn!(
                    service = %format!("{}/{}", service.namespace, service.name),
                    "default backend service not found, serving the local default backend"
                );
                errors.push(StoreError::not_found(
                    "service",
                    &service.namespace,
                    &service.name,
                ));
                local_service(store, ctx)
            }
            None => local_service(store, ctx),
        };

        let port = store
            .get_service(&namespace, &name)?
            .ports
            .first()
            .cloned()
            .ok_or_else(|| StoreError::PortNotFound {
                namespace: namespace.clone(),
                name: name.clone(),
                port: String::new(),
            })?;
        let path = IngressPath {
            svc_namespace: namespace,
            svc_name: name,
            svc_port_int: port.port,
            svc_port_string: port.name,
            is_default_backend: true,
            ..IngressPath::default()
        };
        let request = ServiceRequest {
            path: &path,
            ingress: None,
            mode: Mode::Http,
        };

        let backend = translate_service(store, proxy, ctx, request, &mut errors)?;
        debug!(backend = %backend.name, "default backend");
        ctx.default_backend = Some(backend.name);
        errors.into_result()
    }
}

#[cfg(test)]
#[path = "default_service_tests.rs"]
mod default_service_tests;
