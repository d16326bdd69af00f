// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! State shared by the handlers and translators of the reconcile pipeline.
//!
//! A [`Context`] lives as long as the process. It owns the managers that track what was
//! written to disk (certificates, maps, error and pattern files) and the collections a
//! reconcile rebuilds from scratch (rules, active backends, userlists, custom routes).
//! [`Context::begin_reconcile`] empties the latter, [`Context::end_reconcile`] resets the
//! per-reconcile flags of the former once the transaction is committed.

use crate::action::ActionDecider;
use crate::certs::CertManager;
use crate::config::ControllerConfig;
use crate::files::FileManager;
use crate::maps::Maps;
use crate::proxy::models::{Backend, Userlist};
use crate::refcount::RefCounter;
use crate::rules::ruleset::RuleSet;
use crate::snippets::SnippetManager;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A conditional `use_backend` placed ahead of the map based switching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CustomRoute {
    pub backend: String,
    /// Condition without the leading `if`
    pub cond: String,
}

/// Process-lifetime state of the reconcile pipeline.
#[derive(Debug)]
pub struct Context {
    pub config: Arc<ControllerConfig>,
    pub certs: CertManager,
    pub maps: Maps,
    pub rules: RuleSet,
    pub snippets: SnippetManager,
    pub refcount: RefCounter,
    pub action: ActionDecider,
    pub errorfiles: FileManager,
    pub patternfiles: FileManager,

    /// Backends referenced this reconcile; any other backend is deleted by the refresh
    pub active_backends: BTreeSet<String>,
    /// Userlists wanted this reconcile, by name
    pub userlists: BTreeMap<String, Userlist>,
    /// Userlists pushed by the previous reconcile
    pub applied_userlists: BTreeSet<String>,
    /// Stick-table backends wanted this reconcile, by name
    pub stick_tables: BTreeMap<String, Backend>,
    pub custom_routes: BTreeSet<CustomRoute>,
    /// Default backend of the `http` and `https` frontends
    pub default_backend: Option<String>,
    /// At least one ingress asked for SSL passthrough
    pub passthrough: bool,
    /// No reconcile committed yet
    pub first_run: bool,

    servers_synced: BTreeSet<String>,
}

impl Context {
    /// Build the context for `config`.
    #[must_use]
    pub fn new(config: Arc<ControllerConfig>, action: ActionDecider) -> Self {
        let paths = &config.paths;
        Self {
            certs: CertManager::new(paths),
            maps: Maps::new(&paths.maps_dir),
            rules: RuleSet::new(),
            snippets: SnippetManager::new(config.disabled_snippets.clone()),
            refcount: RefCounter::new(),
            action,
            errorfiles: FileManager::new(&paths.errorfiles_dir),
            patternfiles: FileManager::new(&paths.patterns_dir),
            active_backends: BTreeSet::new(),
            userlists: BTreeMap::new(),
            applied_userlists: BTreeSet::new(),
            stick_tables: BTreeMap::new(),
            custom_routes: BTreeSet::new(),
            default_backend: None,
            passthrough: false,
            first_run: true,
            servers_synced: BTreeSet::new(),
            config,
        }
    }

    /// Forget everything the previous reconcile collected.
    pub fn begin_reconcile(&mut self) {
        self.rules.clear();
        self.maps.clean();
        self.snippets.clear();
        self.active_backends.clear();
        self.userlists.clear();
        self.stick_tables.clear();
        self.custom_routes.clear();
        self.default_backend = None;
        self.passthrough = false;
        self.servers_synced.clear();
    }

    /// Reset the per-reconcile flags once the configuration is committed.
    pub fn end_reconcile(&mut self) {
        self.certs.clean_certs();
        self.errorfiles.clean();
        self.patternfiles.clean();
        self.first_run = false;
    }

    /// Record that the servers of `backend` are handled this reconcile.
    ///
    /// Returns false when they already were; a backend shared by several paths has its
    /// servers pushed once.
    pub fn claim_servers(&mut self, backend: &str) -> bool {
        self.servers_synced.insert(backend.to_string())
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
