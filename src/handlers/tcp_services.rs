// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `tcp-<port>` frontends declared by the tcp-services ConfigMap.
//!
//! Each entry maps a listening port to `<namespace>/<service>:<port>[:ssl]`; `ssl` turns on
//! TLS termination with the frontend certificates. The service backs the default backend of
//! the frontend. Frontends of removed entries are deleted.

use super::{bare_frontend, delete_frontend, ensure_frontend, sync_web_binds, Handler};
use crate::constants::TCP_SERVICES_PREFIX;
use crate::context::Context;
use crate::errors::{AnnotationError, ErrorList, Result};
use crate::proxy::models::{Frontend, Mode};
use crate::proxy::ProxyApi;
use crate::refcount::{Owner, OwnerType};
use crate::service::{translate_service, ServiceRequest};
use crate::store::{IngressPath, K8sStore, Status};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One parsed tcp-services entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpServiceEntry {
    pub namespace: String,
    pub service: String,
    /// Port number or name
    pub port: String,
    pub ssl: bool,
}

impl TcpServiceEntry {
    /// Parse `<namespace>/<service>:<port>[:ssl]`.
    ///
    /// # Errors
    ///
    /// [`AnnotationError::InvalidValue`] when a part is missing or malformed.
    pub fn parse(key: &str, value: &str) -> std::result::Result<Self, AnnotationError> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        let (service, port, ssl) = match parts.as_slice() {
            [service, port] => (*service, *port, false),
            [service, port, "ssl"] => (*service, *port, true),
            [_, _, option] => {
                return Err(AnnotationError::invalid(
                    key,
                    value,
                    format!("unknown option '{option}', only 'ssl' is supported"),
                ))
            }
            _ => {
                return Err(AnnotationError::invalid(
                    key,
                    value,
                    "expected '<namespace>/<service>:<port>[:ssl]'",
                ))
            }
        };
        let Some((namespace, service)) = service.split_once('/') else {
            return Err(AnnotationError::invalid(
                key,
                value,
                "service must be in '<namespace>/<service>' format",
            ));
        };
        if namespace.is_empty() || service.is_empty() || port.is_empty() {
            return Err(AnnotationError::invalid(key, value, "empty namespace, service or port"));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            service: service.to_string(),
            port: port.to_string(),
            ssl,
        })
    }

    fn path(&self) -> IngressPath {
        let (svc_port_int, svc_port_string) = match self.port.parse::<i64>() {
            Ok(port) => (port, String::new()),
            Err(_) => (0, self.port.clone()),
        };
        IngressPath {
            svc_namespace: self.namespace.clone(),
            svc_name: self.service.clone(),
            svc_port_int,
            svc_port_string,
            is_default_backend: true,
            is_tcp: true,
            ..IngressPath::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct TcpServices;

#[async_trait]
impl Handler for TcpServices {
    fn name(&self) -> &'static str {
        "tcp-services"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let config_map = &store.config_maps.tcp_services;
        let owner = Owner::new(
            OwnerType::TcpServicesConfigMap,
            &config_map.namespace,
            &config_map.name,
        );
        let mut wanted = BTreeMap::new();
        for (key, value) in config_map
            .annotations
            .iter()
            .filter(|(_, v)| v.status != Status::Deleted)
        {
            let port = match key.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    errors.push(AnnotationError::invalid(key, &value.value, "key must be a port"));
                    continue;
                }
            };
            match TcpServiceEntry::parse(key, &value.value) {
                Ok(entry) => {
                    wanted.insert(format!("{TCP_SERVICES_PREFIX}{port}"), (port, entry));
                }
                Err(e) => errors.push(e),
            }
        }

        ctx.refcount.remove_owner(&owner);
        for name in wanted.keys() {
            ctx.refcount.add_owner(owner.clone(), name);
        }
        for name in proxy.frontends()? {
            if name.starts_with(TCP_SERVICES_PREFIX) && !ctx.refcount.has_owners(&name) {
                delete_frontend(proxy, ctx, &name)?;
                debug!(frontend = %name, "tcp-services frontend deleted");
            }
        }

        for (name, (port, entry)) in wanted {
            if let Err(e) = sync_frontend(store, proxy, ctx, &name, port, &entry, &mut errors) {
                warn!(frontend = %name, error = %e, "tcp-services frontend update failed");
                errors.push(e);
            }
        }
        errors.into_result()
    }
}

fn sync_frontend(
    store: &mut K8sStore,
    proxy: &mut dyn ProxyApi,
    ctx: &mut Context,
    name: &str,
    port: u16,
    entry: &TcpServiceEntry,
    errors: &mut ErrorList,
) -> Result<()> {
    let frontend = Frontend {
        tcplog: true,
        ..bare_frontend(name, Mode::Tcp)
    };
    ensure_frontend(proxy, ctx, frontend)?;
    sync_web_binds(proxy, ctx, name, port, true)?;

    let offload = if entry.ssl {
        let cert_dir = ctx.certs.frontend_dir().display().to_string();
        proxy.frontend_ssl_offload_enable(name, &cert_dir, None, false)?
    } else {
        proxy.frontend_ssl_offload_disable(name)?
    };
    if offload {
        ctx.action.reload(format!("frontend '{name}': SSL offload toggled"));
    }

    let path = entry.path();
    let request = ServiceRequest {
        path: &path,
        ingress: None,
        mode: Mode::Tcp,
    };
    let default_backend = match translate_service(store, proxy, ctx, request, errors) {
        Ok(backend) => Some(backend.name),
        Err(e) if e.is_not_found() => {
            errors.push(e);
            None
        }
        Err(e) => return Err(e),
    };
    let current = proxy.frontend_get(name)?;
    if current.default_backend != default_backend {
        proxy.frontend_edit(Frontend {
            default_backend,
            ..current
        })?;
        ctx.action
            .reload(format!("frontend '{name}': default backend updated"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tcp_services_tests.rs"]
mod tcp_services_tests;
