// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! File and runtime socket implementation of [`ProxyApi`].
//!
//! # Architecture
//!
//! `NativeProxy` keeps the committed [`ConfigTree`] in memory. A transaction works on a
//! staged clone; committing it renders the tree to `main.cfg` (only when the tree
//! changed) and then replays the server updates queued during the transaction over the
//! runtime socket. Runtime commands that fail are reported in
//! [`CommitOutcome::runtime_failures`] so the caller can fall back to a reload.
//!
//! Every mutating call that changes the staged tree is appended to a journal, which
//! tests use to assert what a reconcile did.
//!
//! # Example
//!
//! ```rust,no_run
//! use haproxy_ingress::proxy::native::NativeProxy;
//! use haproxy_ingress::proxy::ProxyApi;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut proxy = NativeProxy::new("/etc/haproxy/haproxy.cfg", None);
//! proxy.start_transaction()?;
//! let outcome = proxy.commit_transaction().await?;
//! assert!(outcome.written);
//! # Ok(())
//! # }
//! ```

use super::models::{
    Backend, Bind, Defaults, Frontend, Global, LogTarget, ProxyRule, Server, ServerUpdate,
    Userlist,
};
use super::runtime::{self, RuntimeApi};
use super::tree::ConfigTree;
use super::{CommitOutcome, ProxyApi, SnippetTarget};
use crate::errors::ProxyError;
use crate::files::write_atomic;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Transaction {
    base_version: u64,
    tree: ConfigTree,
    runtime_commands: Vec<String>,
}

/// Proxy configuration persisted to a file and updated live over the runtime socket.
pub struct NativeProxy {
    main_cfg: PathBuf,
    committed: ConfigTree,
    version: u64,
    transaction: Option<Transaction>,
    runtime: Option<Arc<dyn RuntimeApi>>,
    journal: Vec<String>,
}

impl std::fmt::Debug for NativeProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProxy")
            .field("main_cfg", &self.main_cfg)
            .field("version", &self.version)
            .field("transaction", &self.transaction.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl NativeProxy {
    /// Proxy writing `main_cfg`, with an optional runtime socket.
    pub fn new(main_cfg: impl Into<PathBuf>, runtime: Option<Arc<dyn RuntimeApi>>) -> Self {
        Self {
            main_cfg: main_cfg.into(),
            committed: ConfigTree::default(),
            version: 0,
            transaction: None,
            runtime,
            journal: Vec::new(),
        }
    }

    /// Committed configuration.
    #[must_use]
    pub fn tree(&self) -> &ConfigTree {
        &self.committed
    }

    /// Configuration as seen by the open transaction, or the committed one.
    #[must_use]
    pub fn staged_tree(&self) -> &ConfigTree {
        self.view()
    }

    /// Current configuration version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn main_cfg(&self) -> &Path {
        &self.main_cfg
    }

    /// Mutating calls recorded since the last [`take_journal`](Self::take_journal).
    #[must_use]
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<String> {
        std::mem::take(&mut self.journal)
    }

    fn record(&mut self, call: String) {
        debug!(call = %call, "proxy configuration change");
        self.journal.push(call);
    }

    fn view(&self) -> &ConfigTree {
        self.transaction
            .as_ref()
            .map_or(&self.committed, |t| &t.tree)
    }

    fn staged(&mut self) -> Result<&mut Transaction, ProxyError> {
        self.transaction.as_mut().ok_or(ProxyError::NoTransaction)
    }

    fn frontend_mut(&mut self, name: &str) -> Result<&mut Frontend, ProxyError> {
        self.staged()?
            .tree
            .frontends
            .get_mut(name)
            .ok_or_else(|| ProxyError::NotFound {
                kind: "frontend",
                name: name.to_string(),
            })
    }

    fn backend_mut(&mut self, name: &str) -> Result<&mut Backend, ProxyError> {
        self.staged()?
            .tree
            .backends
            .get_mut(name)
            .ok_or_else(|| ProxyError::NotFound {
                kind: "backend",
                name: name.to_string(),
            })
    }

    async fn run_runtime_commands(&self, commands: Vec<String>) -> Vec<String> {
        let mut failures = Vec::new();
        for command in commands {
            let result = match &self.runtime {
                Some(runtime) => runtime.execute(&command).await.map(|_| ()),
                None => Err(ProxyError::RuntimeUnavailable),
            };
            if let Err(e) = result {
                warn!(command = %command, error = %e, "runtime update failed");
                failures.push(command);
            }
        }
        failures
    }

    async fn runtime_execute(&self, command: String) -> Result<(), ProxyError> {
        let runtime = self.runtime.as_ref().ok_or(ProxyError::RuntimeUnavailable)?;
        runtime.execute(&command).await.map(|_| ())
    }
}

/// Replace `slot` with `value`; returns whether it changed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// QUIC binds keep their own TLS settings.
fn offload_applies(bind: &Bind) -> bool {
    !bind.address.starts_with("quic")
}

#[async_trait]
impl ProxyApi for NativeProxy {
    fn start_transaction(&mut self) -> Result<u64, ProxyError> {
        if let Some(transaction) = &self.transaction {
            return Err(ProxyError::TransactionInProgress {
                version: transaction.base_version,
            });
        }
        self.transaction = Some(Transaction {
            base_version: self.version,
            tree: self.committed.clone(),
            runtime_commands: Vec::new(),
        });
        Ok(self.version)
    }

    async fn commit_transaction(&mut self) -> Result<CommitOutcome, ProxyError> {
        let transaction = self.transaction.take().ok_or(ProxyError::NoTransaction)?;
        if transaction.base_version != self.version {
            return Err(ProxyError::VersionMismatch {
                expected: transaction.base_version,
                actual: self.version,
            });
        }

        let changed = transaction.tree != self.committed;
        let written = changed || !self.main_cfg.exists();
        if written {
            let content = transaction.tree.render();
            write_atomic(&self.main_cfg, content.as_bytes()).map_err(|e| ProxyError::Write {
                path: self.main_cfg.display().to_string(),
                reason: e.to_string(),
            })?;
            info!(path = %self.main_cfg.display(), "proxy configuration written");
        }
        if changed {
            self.version += 1;
        }
        self.committed = transaction.tree;

        let runtime_failures = self.run_runtime_commands(transaction.runtime_commands).await;
        Ok(CommitOutcome {
            version: self.version,
            written,
            runtime_failures,
        })
    }

    fn rollback_transaction(&mut self) {
        if self.transaction.take().is_some() {
            debug!(version = self.version, "proxy transaction rolled back");
        }
    }

    fn global_push(&mut self, global: Global) -> Result<bool, ProxyError> {
        let changed = replace(&mut self.staged()?.tree.global, global);
        if changed {
            self.record("global_push".to_string());
        }
        Ok(changed)
    }

    fn log_targets_push(&mut self, targets: Vec<LogTarget>) -> Result<bool, ProxyError> {
        let changed = replace(&mut self.staged()?.tree.log_targets, targets);
        if changed {
            self.record("log_targets_push".to_string());
        }
        Ok(changed)
    }

    fn defaults_get(&self) -> Result<Defaults, ProxyError> {
        Ok(self.view().defaults.clone())
    }

    fn defaults_push(&mut self, defaults: Defaults) -> Result<bool, ProxyError> {
        let changed = replace(&mut self.staged()?.tree.defaults, defaults);
        if changed {
            self.record("defaults_push".to_string());
        }
        Ok(changed)
    }

    fn frontends(&self) -> Result<Vec<String>, ProxyError> {
        Ok(self.view().frontends.keys().cloned().collect())
    }

    fn frontend_create(&mut self, frontend: Frontend) -> Result<(), ProxyError> {
        let name = frontend.name.clone();
        let tree = &mut self.staged()?.tree;
        if tree.frontends.contains_key(&name) {
            return Err(ProxyError::AlreadyExists {
                kind: "frontend",
                name,
            });
        }
        tree.frontends.insert(name.clone(), frontend);
        self.record(format!("frontend_create {name}"));
        Ok(())
    }

    fn frontend_get(&self, name: &str) -> Result<Frontend, ProxyError> {
        self.view()
            .frontends
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound {
                kind: "frontend",
                name: name.to_string(),
            })
    }

    fn frontend_edit(&mut self, frontend: Frontend) -> Result<bool, ProxyError> {
        let name = frontend.name.clone();
        let current = self.frontend_mut(&name)?;
        let edited = Frontend {
            binds: current.binds.clone(),
            rules: current.rules.clone(),
            snippet: current.snippet.clone(),
            ..frontend
        };
        let changed = replace(current, edited);
        if changed {
            self.record(format!("frontend_edit {name}"));
        }
        Ok(changed)
    }

    fn frontend_delete(&mut self, name: &str) -> Result<(), ProxyError> {
        if self.staged()?.tree.frontends.remove(name).is_none() {
            return Err(ProxyError::NotFound {
                kind: "frontend",
                name: name.to_string(),
            });
        }
        self.record(format!("frontend_delete {name}"));
        Ok(())
    }

    fn frontend_bind_create(&mut self, frontend: &str, bind: Bind) -> Result<(), ProxyError> {
        let name = bind.name.clone();
        let current = self.frontend_mut(frontend)?;
        if current.binds.contains_key(&name) {
            return Err(ProxyError::AlreadyExists { kind: "bind", name });
        }
        current.binds.insert(name.clone(), bind);
        self.record(format!("frontend_bind_create {frontend}/{name}"));
        Ok(())
    }

    fn frontend_bind_edit(&mut self, frontend: &str, bind: Bind) -> Result<bool, ProxyError> {
        let name = bind.name.clone();
        let current = self.frontend_mut(frontend)?;
        let slot = current
            .binds
            .get_mut(&name)
            .ok_or_else(|| ProxyError::NotFound {
                kind: "bind",
                name: name.clone(),
            })?;
        let changed = replace(slot, bind);
        if changed {
            self.record(format!("frontend_bind_edit {frontend}/{name}"));
        }
        Ok(changed)
    }

    fn frontend_bind_delete(&mut self, frontend: &str, name: &str) -> Result<(), ProxyError> {
        if self.frontend_mut(frontend)?.binds.remove(name).is_none() {
            return Err(ProxyError::NotFound {
                kind: "bind",
                name: name.to_string(),
            });
        }
        self.record(format!("frontend_bind_delete {frontend}/{name}"));
        Ok(())
    }

    fn frontend_ssl_offload_enable(
        &mut self,
        frontend: &str,
        cert_dir: &str,
        alpn: Option<&str>,
        strict_sni: bool,
    ) -> Result<bool, ProxyError> {
        let current = self.frontend_mut(frontend)?;
        let mut changed = false;
        for bind in current.binds.values_mut().filter(|b| offload_applies(b)) {
            let edited = Bind {
                ssl: true,
                ssl_certificate: Some(cert_dir.to_string()),
                alpn: alpn.map(str::to_string),
                strict_sni,
                ..bind.clone()
            };
            changed |= replace(bind, edited);
        }
        if changed {
            self.record(format!("frontend_ssl_offload_enable {frontend}"));
        }
        Ok(changed)
    }

    fn frontend_ssl_offload_disable(&mut self, frontend: &str) -> Result<bool, ProxyError> {
        let current = self.frontend_mut(frontend)?;
        let mut changed = false;
        for bind in current.binds.values_mut().filter(|b| offload_applies(b)) {
            let edited = Bind {
                ssl: false,
                ssl_certificate: None,
                alpn: None,
                strict_sni: false,
                ca_file: None,
                verify: None,
                ..bind.clone()
            };
            changed |= replace(bind, edited);
        }
        if changed {
            self.record(format!("frontend_ssl_offload_disable {frontend}"));
        }
        Ok(changed)
    }

    fn frontend_ssl_offload_enabled(&self, frontend: &str) -> Result<bool, ProxyError> {
        Ok(self
            .frontend_get(frontend)?
            .binds
            .values()
            .any(|b| b.ssl && offload_applies(b)))
    }

    fn frontend_rules_replace(
        &mut self,
        frontend: &str,
        rules: Vec<ProxyRule>,
    ) -> Result<bool, ProxyError> {
        let changed = replace(&mut self.frontend_mut(frontend)?.rules, rules);
        if changed {
            self.record(format!("frontend_rules_replace {frontend}"));
        }
        Ok(changed)
    }

    fn backends(&self) -> Result<Vec<String>, ProxyError> {
        Ok(self.view().backends.keys().cloned().collect())
    }

    fn backend_create(&mut self, backend: Backend) -> Result<(), ProxyError> {
        let name = backend.name.clone();
        let tree = &mut self.staged()?.tree;
        if tree.backends.contains_key(&name) {
            return Err(ProxyError::AlreadyExists {
                kind: "backend",
                name,
            });
        }
        tree.backends.insert(name.clone(), backend);
        self.record(format!("backend_create {name}"));
        Ok(())
    }

    fn backend_get(&self, name: &str) -> Result<Backend, ProxyError> {
        self.view()
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound {
                kind: "backend",
                name: name.to_string(),
            })
    }

    fn backend_edit(&mut self, backend: Backend) -> Result<bool, ProxyError> {
        let name = backend.name.clone();
        let current = self.backend_mut(&name)?;
        if current.same_settings(&backend) {
            return Ok(false);
        }
        let edited = Backend {
            servers: std::mem::take(&mut current.servers),
            snippet: std::mem::take(&mut current.snippet),
            ..backend
        };
        *current = edited;
        self.record(format!("backend_edit {name}"));
        Ok(true)
    }

    fn backend_delete(&mut self, name: &str) -> Result<(), ProxyError> {
        if self.staged()?.tree.backends.remove(name).is_none() {
            return Err(ProxyError::NotFound {
                kind: "backend",
                name: name.to_string(),
            });
        }
        self.record(format!("backend_delete {name}"));
        Ok(())
    }

    fn backend_server_create(&mut self, backend: &str, server: Server) -> Result<(), ProxyError> {
        let name = server.name.clone();
        let current = self.backend_mut(backend)?;
        if current.servers.iter().any(|s| s.name == name) {
            return Err(ProxyError::AlreadyExists {
                kind: "server",
                name,
            });
        }
        current.servers.push(server);
        self.record(format!("backend_server_create {backend}/{name}"));
        Ok(())
    }

    fn backend_server_get(&self, backend: &str, name: &str) -> Result<Server, ProxyError> {
        self.backend_get(backend)?
            .servers
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ProxyError::NotFound {
                kind: "server",
                name: format!("{backend}/{name}"),
            })
    }

    fn backend_server_edit(
        &mut self,
        backend: &str,
        server: Server,
    ) -> Result<ServerUpdate, ProxyError> {
        let live = self.runtime.is_some();
        let name = server.name.clone();
        let current = self.backend_mut(backend)?;
        let slot = current
            .servers
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ProxyError::NotFound {
                kind: "server",
                name: format!("{backend}/{name}"),
            })?;
        if *slot == server {
            return Ok(ServerUpdate::Unchanged);
        }

        let mut commands = Vec::new();
        let update = if live && slot.runtime_compatible(&server) {
            if slot.address != server.address || slot.port != server.port {
                commands.push(runtime::set_server_addr(
                    backend,
                    &name,
                    &server.address,
                    server.port,
                ));
            }
            if slot.maintenance != server.maintenance {
                commands.push(runtime::set_server_state(
                    backend,
                    &name,
                    server.maintenance,
                ));
            }
            ServerUpdate::Live
        } else {
            ServerUpdate::NeedsReload
        };
        *slot = server;
        self.staged()?.runtime_commands.extend(commands);
        self.record(format!("backend_server_edit {backend}/{name}"));
        Ok(update)
    }

    fn backend_servers_delete_all(&mut self, backend: &str) -> Result<(), ProxyError> {
        let current = self.backend_mut(backend)?;
        if current.servers.is_empty() {
            return Ok(());
        }
        current.servers.clear();
        self.record(format!("backend_servers_delete_all {backend}"));
        Ok(())
    }

    fn snippet_set(
        &mut self,
        target: &SnippetTarget,
        lines: Vec<String>,
    ) -> Result<bool, ProxyError> {
        let changed = match target {
            SnippetTarget::Global => replace(&mut self.staged()?.tree.global_snippet, lines),
            SnippetTarget::Frontend(name) => replace(&mut self.frontend_mut(name)?.snippet, lines),
            SnippetTarget::Backend(name) => replace(&mut self.backend_mut(name)?.snippet, lines),
        };
        if changed {
            self.record(format!("snippet_set {target}"));
        }
        Ok(changed)
    }

    fn userlist_exists(&self, name: &str) -> Result<bool, ProxyError> {
        Ok(self.view().userlists.contains_key(name))
    }

    fn userlist_replace(&mut self, userlist: Userlist) -> Result<bool, ProxyError> {
        let name = userlist.name.clone();
        let tree = &mut self.staged()?.tree;
        if tree.userlists.get(&name) == Some(&userlist) {
            return Ok(false);
        }
        tree.userlists.insert(name.clone(), userlist);
        self.record(format!("userlist_replace {name}"));
        Ok(true)
    }

    fn userlist_delete(&mut self, name: &str) -> Result<(), ProxyError> {
        if self.staged()?.tree.userlists.remove(name).is_none() {
            return Err(ProxyError::NotFound {
                kind: "userlist",
                name: name.to_string(),
            });
        }
        self.record(format!("userlist_delete {name}"));
        Ok(())
    }

    fn runtime_available(&self) -> bool {
        self.runtime.is_some()
    }

    async fn cert_entry_create(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::new_ssl_cert(path)).await
    }

    async fn cert_entry_set(&mut self, path: &str, payload: &[u8]) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::set_ssl_cert(path, payload))
            .await
    }

    async fn cert_entry_commit(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::commit_ssl_cert(path)).await
    }

    async fn cert_entry_abort(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::abort_ssl_cert(path)).await
    }

    async fn cert_entry_delete(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::del_ssl_cert(path)).await
    }

    async fn crt_list_entry_add(&mut self, crt_list: &str, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::add_ssl_crt_list(crt_list, path))
            .await
    }

    async fn crt_list_entry_delete(
        &mut self,
        crt_list: &str,
        path: &str,
    ) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::del_ssl_crt_list(crt_list, path))
            .await
    }

    async fn ca_file_create(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::new_ssl_ca_file(path)).await
    }

    async fn ca_file_set(&mut self, path: &str, payload: &[u8]) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::set_ssl_ca_file(path, payload))
            .await
    }

    async fn ca_file_commit(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::commit_ssl_ca_file(path)).await
    }

    async fn ca_file_abort(&mut self, path: &str) -> Result<(), ProxyError> {
        self.runtime_execute(runtime::abort_ssl_ca_file(path)).await
    }
}

#[cfg(test)]
#[path = "native_tests.rs"]
mod native_tests;
