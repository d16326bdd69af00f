// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! ConfigMaps whose keys become files.
//!
//! - errorfiles: key = HTTP status code, value = raw HTTP response served for that code
//! - patternfiles: key = file name, value = pattern list referenced as `patterns/<name>`
//!
//! A written, changed or removed file needs a reload.

use super::Handler;
use crate::context::Context;
use crate::errors::{AnnotationError, ErrorList, Result};
use crate::files::FileManager;
use crate::proxy::ProxyApi;
use crate::store::{ConfigMap, K8sStore, Status};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// Status codes the proxy accepts an error file for.
pub const ERRORFILE_CODES: [u16; 15] = [
    200, 400, 401, 403, 404, 405, 407, 408, 410, 425, 429, 500, 502, 503, 504,
];

/// Live `(key, value)` pairs of a ConfigMap.
fn entries(config_map: &ConfigMap) -> impl Iterator<Item = (&str, &str)> {
    config_map
        .annotations
        .iter()
        .filter(|(_, v)| v.status != Status::Deleted)
        .map(|(k, v)| (k.as_str(), v.value.as_str()))
}

/// Drop files no longer listed; true when the proxy needs to reload.
fn refresh(files: &mut FileManager, kind: &str) -> bool {
    let removed = files.refresh();
    for name in &removed {
        debug!(kind = %kind, file = %name, "file removed");
    }
    files.updated() || !removed.is_empty()
}

/// Error pages of the `defaults` section.
#[derive(Debug, Default)]
pub struct ErrorFiles;

#[async_trait]
impl Handler for ErrorFiles {
    fn name(&self) -> &'static str {
        "errorfiles"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        let mut pages = BTreeMap::new();
        for (key, content) in entries(&store.config_maps.errorfiles) {
            let code = match key.parse::<u16>() {
                Ok(code) if ERRORFILE_CODES.contains(&code) => code,
                _ => {
                    errors.push(AnnotationError::invalid(
                        key,
                        "",
                        "HTTP error code not supported",
                    ));
                    continue;
                }
            };
            match ctx.errorfiles.update(key, content.as_bytes()) {
                Ok(path) => {
                    pages.insert(code, path.display().to_string());
                }
                Err(e) => errors.push(e),
            }
        }
        if refresh(&mut ctx.errorfiles, "errorfile") {
            ctx.action.reload("error files updated");
        }

        let mut defaults = proxy.defaults_get()?;
        defaults.errorfiles = pages;
        if proxy.defaults_push(defaults)? {
            ctx.action.reload("defaults error files updated");
        }
        errors.into_result()
    }
}

/// Pattern files referenced by annotations as `patterns/<name>`.
#[derive(Debug, Default)]
pub struct PatternFiles;

#[async_trait]
impl Handler for PatternFiles {
    fn name(&self) -> &'static str {
        "patternfiles"
    }

    async fn update(
        &mut self,
        store: &mut K8sStore,
        _proxy: &mut dyn ProxyApi,
        ctx: &mut Context,
    ) -> Result<()> {
        let mut errors = ErrorList::new();
        for (name, content) in entries(&store.config_maps.patternfiles) {
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                errors.push(AnnotationError::invalid(name, "", "invalid pattern file name"));
                continue;
            }
            errors.add(ctx.patternfiles.update(name, content.as_bytes()));
        }
        if refresh(&mut ctx.patternfiles, "patternfile") {
            ctx.action.reload("pattern files updated");
        }
        errors.into_result()
    }
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod files_tests;
