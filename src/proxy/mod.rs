// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Proxy control layer.
//!
//! [`ProxyApi`] is the structured, transactional configuration surface the reconciler
//! drives. Configuration calls only touch a staged copy of the configuration and are
//! synchronous; committing the transaction, and the certificate-store commands that go
//! straight to the runtime socket, are asynchronous.
//!
//! - [`models`] - typed configuration sections
//! - [`tree`] - the staged configuration and its rendering to `main.cfg`
//! - [`native`] - [`NativeProxy`](native::NativeProxy), the file + runtime socket implementation
//! - [`runtime`] - runtime socket commands
//! - [`process`] - reload / restart of the proxy process

pub mod models;
pub mod native;
pub mod process;
pub mod runtime;
pub mod tree;

use crate::errors::ProxyError;
use async_trait::async_trait;
use models::{
    Backend, Bind, Defaults, Frontend, Global, LogTarget, ProxyRule, Server, ServerUpdate,
    Userlist,
};

/// Where a config snippet is inserted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnippetTarget {
    Global,
    Frontend(String),
    Backend(String),
}

impl std::fmt::Display for SnippetTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Frontend(name) => write!(f, "frontend {name}"),
            Self::Backend(name) => write!(f, "backend {name}"),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Configuration version after the commit
    pub version: u64,
    /// The configuration file was rewritten
    pub written: bool,
    /// Runtime commands that could not be applied live
    pub runtime_failures: Vec<String>,
}

/// Transactional proxy configuration API.
///
/// Every configuration call requires an open transaction. Calls returning `bool` report
/// whether the staged configuration changed.
#[async_trait]
pub trait ProxyApi: Send {
    /// Open a transaction on the current version.
    ///
    /// # Errors
    ///
    /// [`ProxyError::TransactionInProgress`] when one is already open.
    fn start_transaction(&mut self) -> Result<u64, ProxyError>;

    /// Apply the staged configuration.
    ///
    /// # Errors
    ///
    /// [`ProxyError::VersionMismatch`] when the configuration moved since the transaction
    /// started, [`ProxyError::Write`] when it cannot be persisted.
    async fn commit_transaction(&mut self) -> Result<CommitOutcome, ProxyError>;

    /// Drop the staged configuration.
    fn rollback_transaction(&mut self);

    fn global_push(&mut self, global: Global) -> Result<bool, ProxyError>;
    fn log_targets_push(&mut self, targets: Vec<LogTarget>) -> Result<bool, ProxyError>;
    fn defaults_get(&self) -> Result<Defaults, ProxyError>;
    fn defaults_push(&mut self, defaults: Defaults) -> Result<bool, ProxyError>;

    fn frontends(&self) -> Result<Vec<String>, ProxyError>;
    fn frontend_create(&mut self, frontend: Frontend) -> Result<(), ProxyError>;
    fn frontend_get(&self, name: &str) -> Result<Frontend, ProxyError>;
    /// Edit frontend settings; binds, rules and snippet are kept.
    fn frontend_edit(&mut self, frontend: Frontend) -> Result<bool, ProxyError>;
    fn frontend_delete(&mut self, name: &str) -> Result<(), ProxyError>;
    fn frontend_bind_create(&mut self, frontend: &str, bind: Bind) -> Result<(), ProxyError>;
    fn frontend_bind_edit(&mut self, frontend: &str, bind: Bind) -> Result<bool, ProxyError>;
    fn frontend_bind_delete(&mut self, frontend: &str, name: &str) -> Result<(), ProxyError>;
    /// Turn on TLS termination on every TCP/IP bind of `frontend`.
    fn frontend_ssl_offload_enable(
        &mut self,
        frontend: &str,
        cert_dir: &str,
        alpn: Option<&str>,
        strict_sni: bool,
    ) -> Result<bool, ProxyError>;
    fn frontend_ssl_offload_disable(&mut self, frontend: &str) -> Result<bool, ProxyError>;
    fn frontend_ssl_offload_enabled(&self, frontend: &str) -> Result<bool, ProxyError>;
    /// Replace the whole rule list of `frontend`.
    fn frontend_rules_replace(
        &mut self,
        frontend: &str,
        rules: Vec<ProxyRule>,
    ) -> Result<bool, ProxyError>;

    fn backends(&self) -> Result<Vec<String>, ProxyError>;
    fn backend_create(&mut self, backend: Backend) -> Result<(), ProxyError>;
    fn backend_get(&self, name: &str) -> Result<Backend, ProxyError>;
    /// Edit backend settings; servers and snippet are kept.
    fn backend_edit(&mut self, backend: Backend) -> Result<bool, ProxyError>;
    fn backend_delete(&mut self, name: &str) -> Result<(), ProxyError>;
    fn backend_server_create(&mut self, backend: &str, server: Server) -> Result<(), ProxyError>;
    fn backend_server_get(&self, backend: &str, name: &str) -> Result<Server, ProxyError>;
    fn backend_server_edit(
        &mut self,
        backend: &str,
        server: Server,
    ) -> Result<ServerUpdate, ProxyError>;
    fn backend_servers_delete_all(&mut self, backend: &str) -> Result<(), ProxyError>;

    /// Set the raw lines inserted at `target`.
    fn snippet_set(&mut self, target: &SnippetTarget, lines: Vec<String>)
        -> Result<bool, ProxyError>;

    fn userlist_exists(&self, name: &str) -> Result<bool, ProxyError>;
    fn userlist_replace(&mut self, userlist: Userlist) -> Result<bool, ProxyError>;
    fn userlist_delete(&mut self, name: &str) -> Result<(), ProxyError>;

    /// True when a runtime socket is configured.
    fn runtime_available(&self) -> bool;
    async fn cert_entry_create(&mut self, path: &str) -> Result<(), ProxyError>;
    async fn cert_entry_set(&mut self, path: &str, payload: &[u8]) -> Result<(), ProxyError>;
    async fn cert_entry_commit(&mut self, path: &str) -> Result<(), ProxyError>;
    async fn cert_entry_abort(&mut self, path: &str) -> Result<(), ProxyError>;
    async fn cert_entry_delete(&mut self, path: &str) -> Result<(), ProxyError>;

    /// Add `path` to the certificate list (or certificate directory) `crt_list`.
    async fn crt_list_entry_add(&mut self, crt_list: &str, path: &str) -> Result<(), ProxyError>;
    async fn crt_list_entry_delete(&mut self, crt_list: &str, path: &str)
        -> Result<(), ProxyError>;

    async fn ca_file_create(&mut self, path: &str) -> Result<(), ProxyError>;
    async fn ca_file_set(&mut self, path: &str, payload: &[u8]) -> Result<(), ProxyError>;
    async fn ca_file_commit(&mut self, path: &str) -> Result<(), ProxyError>;
    async fn ca_file_abort(&mut self, path: &str) -> Result<(), ProxyError>;
}
