// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Frontend` custom resources overlaid on the managed frontends.
//!
//! The main ConfigMap keys `cr-frontend-http`, `cr-frontend-https` and `cr-frontend-stats`
//! reference a resource (`<namespace>/<name>`, or a bare name in the controller namespace)
//! whose settings replace those of the frontend. Dropping the reference resets them.

use super::Handler;
use crate::annotations::AnnotationSet;
use crate::constants::{FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_STATS};
use crate::context::Context;
use crate::crd::FrontendCrSpec;
use crate::errors::{AnnotationError, ErrorList, Result};
use crate::proxy::models::Frontend;
use crate::proxy::ProxyApi;
use crate::store::K8sStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// ConfigMap key and the frontend it targets.
const TARGETS: [(&str, &str); 3] = [
    ("cr-frontend-http", FRONTEND_HTTP),
    ("cr-frontend-https", FRONTEND_HTTPS),
    ("cr-frontend-stats", FRONTEND_STATS),
];

#[derive(Debug, Default)]
pub struct FrontendCr {
    /// Resource applied on each frontend by the previous reconcile
    applied: BTreeMap<&'static str, FrontendCrSpec>,
}

#[async_trait]
impl Handler for FrontendCr {
    fn name(&self) -> &'static str {
        "frontend-cr"
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

        for (key, frontend) in TARGETS {
            let wanted = lookup(annotations, key, &ctx.config.pod_namespace, &mut errors);
            let previous = self.applied.get(frontend);
            if wanted.is_none() && previous.is_none() {
                continue;
            }
            let current = match proxy.frontend_get(frontend) {
                Ok(current) => current,
                Err(e) if e.is_not_found() => {
                    debug!(frontend = %frontend, "frontend absent, custom resource not applied");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let spec = wanted.clone().unwrap_or_default();
            let edited = Frontend {
                log_format: spec.log_format.clone(),
                maxconn: spec.maxconn,
                ..current
            };
            if proxy.frontend_edit(edited)? {
                let how = match (previous, &wanted) {
                    (None, _) => "addition",
                    (Some(_), None) => "removal",
                    (Some(_), Some(_)) => "modification",
                };
                ctx.action.reload(format!(
                    "frontend '{frontend}' updated by {how} of frontend custom resource"
                ));
            }
            match wanted {
                Some(spec) => self.applied.insert(frontend, spec),
                None => self.applied.remove(frontend),
            };
        }
        errors.into_result()
    }
}

/// The resource referenced by `key`, if any.
fn lookup(
    annotations: AnnotationSet<'_>,
    key: &str,
    default_namespace: &str,
    errors: &mut ErrorList,
) -> Option<FrontendCrSpec> {
    let value = annotations.string(key).filter(|v| !v.trim().is_empty())?;
    let value = value.trim();
    let (namespace, name) = value.split_once('/').unwrap_or((default_namespace, value));
    let found = annotations
        .store()
        .namespaces
        .get(namespace)
        .and_then(|ns| ns.crs.frontends.get(name))
        .cloned();
    if found.is_none() {
        errors.push(AnnotationError::invalid(key, value, "Frontend resource not found"));
    }
    found
}

#[cfg(test)]
#[path = "frontend_cr_tests.rs"]
mod frontend_cr_tests;
