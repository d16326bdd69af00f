// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Config snippets.
//!
//! Raw configuration lines supplied through annotations are collected per scope during
//! a reconcile and pushed to the proxy by [`SnippetManager::update`]. A backend may get
//! lines from several origins (the main ConfigMap, its service, the ingresses using it);
//! each origin's block is preceded by a comment naming it. The ConfigMap block goes to
//! every backend.
//!
//! Any change of the applied lines requires a reload.

use crate::config::SnippetScope;
use crate::errors::ErrorList;
use crate::proxy::{ProxyApi, SnippetTarget};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Where the lines of a backend snippet come from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnippetOrigin {
    ConfigMap { namespace: String, name: String },
    Service { namespace: String, name: String },
    Ingress { namespace: String, name: String },
}

impl SnippetOrigin {
    fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMap { .. } => "configmap",
            Self::Service { .. } => "svc",
            Self::Ingress { .. } => "ing",
        }
    }

    fn object(&self) -> (&str, &str) {
        match self {
            Self::ConfigMap { namespace, name }
            | Self::Service { namespace, name }
            | Self::Ingress { namespace, name } => (namespace, name),
        }
    }

    /// Comment line preceding the block of this origin in `backend`.
    #[must_use]
    pub fn header(&self, backend: &str) -> String {
        let (namespace, name) = self.object();
        format!("### {}:{backend}/{namespace}/{name} ###", self.kind())
    }
}

/// Split an annotation value into snippet lines, dropping blank lines.
#[must_use]
pub fn parse_snippet(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lines of `new` not in `old` and lines of `old` not in `new`.
#[must_use]
pub fn diff_lines(old: &[String], new: &[String]) -> (Vec<String>, Vec<String>) {
    let added = new.iter().filter(|l| !old.contains(l)).cloned().collect();
    let removed = old.iter().filter(|l| !new.contains(l)).cloned().collect();
    (added, removed)
}

/// Collects and applies config snippets.
#[derive(Debug, Clone, Default)]
pub struct SnippetManager {
    disabled: BTreeSet<SnippetScope>,
    global: Vec<String>,
    frontends: BTreeMap<String, Vec<String>>,
    backend_default: Option<(SnippetOrigin, Vec<String>)>,
    backends: BTreeMap<String, BTreeMap<SnippetOrigin, Vec<String>>>,
    /// Lines last pushed, per target
    applied: BTreeMap<SnippetTarget, Vec<String>>,
}

impl SnippetManager {
    #[must_use]
    pub fn new(disabled: BTreeSet<SnippetScope>) -> Self {
        Self {
            disabled,
            ..Self::default()
        }
    }

    fn enabled(&self, scope: SnippetScope) -> bool {
        !self.disabled.contains(&scope)
    }

    /// Forget the sources collected by the previous reconcile.
    pub fn clear(&mut self) {
        self.global.clear();
        self.frontends.clear();
        self.backend_default = None;
        self.backends.clear();
    }

    pub fn set_global(&mut self, value: &str) {
        if self.enabled(SnippetScope::Global) {
            self.global = parse_snippet(value);
        }
    }

    pub fn set_frontend(&mut self, frontend: &str, value: &str) {
        if self.enabled(SnippetScope::Frontend) {
            self.frontends
                .insert(frontend.to_string(), parse_snippet(value));
        }
    }

    /// Lines added to every backend.
    pub fn set_backend_default(&mut self, origin: SnippetOrigin, value: &str) {
        if self.enabled(SnippetScope::Backend) {
            let lines = parse_snippet(value);
            self.backend_default = (!lines.is_empty()).then_some((origin, lines));
        }
    }

    /// Register `backend` as in use, with the snippet `value` of `origin` if any.
    pub fn add_backend(&mut self, backend: &str, origin: Option<(SnippetOrigin, &str)>) {
        if !self.enabled(SnippetScope::Backend) {
            return;
        }
        let origins = self.backends.entry(backend.to_string()).or_default();
        if let Some((origin, value)) = origin {
            let lines = parse_snippet(value);
            if !lines.is_empty() {
                origins.insert(origin, lines);
            }
        }
    }

    /// Effective lines of `backend`.
    #[must_use]
    pub fn backend_lines(&self, backend: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let Some(origins) = self.backends.get(backend) else {
            return lines;
        };
        let blocks = self
            .backend_default
            .iter()
            .map(|(o, l)| (o, l))
            .chain(origins.iter());
        for (origin, block) in blocks {
            lines.push(origin.header(backend));
            lines.extend(block.iter().cloned());
        }
        lines
    }

    fn desired(&self) -> BTreeMap<SnippetTarget, Vec<String>> {
        let mut desired = BTreeMap::new();
        if self.enabled(SnippetScope::Global) {
            desired.insert(SnippetTarget::Global, self.global.clone());
        }
        for (frontend, lines) in &self.frontends {
            desired.insert(SnippetTarget::Frontend(frontend.clone()), lines.clone());
        }
        for backend in self.backends.keys() {
            desired.insert(
                SnippetTarget::Backend(backend.clone()),
                self.backend_lines(backend),
            );
        }
        desired
    }

    /// Push the collected snippets to `proxy`.
    ///
    /// Targets set by a previous reconcile and not seen in this one are emptied; a target
    /// whose frontend or backend no longer exists is forgotten. Returns one reason per
    /// changed target, an empty list means no reload is needed.
    pub fn update(&mut self, proxy: &mut dyn ProxyApi, errors: &mut ErrorList) -> Vec<String> {
        let mut desired = self.desired();
        for target in self.applied.keys() {
            if !desired.contains_key(target) {
                desired.insert(target.clone(), Vec::new());
            }
        }

        let mut reasons = Vec::new();
        let mut applied = BTreeMap::new();
        for (target, lines) in desired {
            let previous = self.applied.get(&target).cloned().unwrap_or_default();
            match proxy.snippet_set(&target, lines.clone()) {
                Ok(changed) => {
                    if changed {
                        let (added, removed) = diff_lines(&previous, &lines);
                        info!(
                            target = %target,
                            added = added.len(),
                            removed = removed.len(),
                            "config snippet updated"
                        );
                        reasons.push(format!("config snippet of {target} updated"));
                    }
                    if !lines.is_empty() {
                        applied.insert(target, lines);
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(target = %target, "snippet target gone");
                }
                Err(e) => {
                    errors.push(e);
                    applied.insert(target, previous);
                }
            }
        }
        self.applied = applied;
        reasons
    }
}

#[cfg(test)]
#[path = "snippets_tests.rs"]
mod snippets_tests;
