// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate manager.
//!
//! TLS material from secrets is written into four pools (frontend, backend, CA and
//! TCP custom resource certificates). Each entry records whether it was referenced
//! during the current reconcile and whether the proxy must reload to pick it up.
//!
//! Certificate churn goes over the runtime socket when one is available:
//! [`CertManager::push_runtime_updates`] replaces changed certificates and CA files in
//! place and adds new frontend certificates to the frontend certificate list, and
//! [`CertManager::refresh_certs`] removes unused frontend certificates from it. A reload is
//! needed only when a runtime command fails, when no socket is configured, or for new
//! files the configuration references by name (backend, CA and TCP custom resource
//! certificates, and the extra files of a certificate bundle).

use crate::config::Paths;
use crate::constants::{CERT_BUNDLE_TYPES, DEFAULT_CERT_PREFIX, PEM_EXTENSION};
use crate::errors::{CertError, ProxyError};
use crate::files::{is_temporary, write_atomic};
use crate::proxy::ProxyApi;
use crate::store::{Secret, Status};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Role of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretType {
    /// Frontend certificate selected by SNI
    FrontendCert,
    /// Frontend certificate served when no SNI matches
    FrontendDefaultCert,
    /// Client certificate presented to backend servers
    BackendCert,
    /// CA bundle (`tls.crt` only)
    CaCert,
    /// Certificate of a TCP custom resource bind
    TcpCrCert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Pool {
    Frontend,
    Backend,
    Ca,
    TcpCr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CertEntry {
    /// `namespace/name` of the secret
    secret: String,
    path: PathBuf,
    in_use: bool,
    updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingUpdate {
    pool: Pool,
    name: String,
    path: PathBuf,
    payload: Vec<u8>,
    /// The file did not exist before this reconcile
    created: bool,
}

/// Runtime store an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Cert,
    CaFile,
}

impl Pool {
    fn entry_kind(self) -> EntryKind {
        match self {
            Pool::Ca => EntryKind::CaFile,
            _ => EntryKind::Cert,
        }
    }

    /// Pools whose directory is loaded as a certificate list by the `https` frontend.
    fn is_crt_list(self) -> bool {
        self == Pool::Frontend
    }
}

/// Tracks certificate files written from secrets.
#[derive(Debug, Clone)]
pub struct CertManager {
    dirs: BTreeMap<Pool, PathBuf>,
    pools: BTreeMap<Pool, BTreeMap<String, CertEntry>>,
    pending: Vec<PendingUpdate>,
}

/// Strip every PEM block from `message`, keeping the surrounding text.
#[must_use]
pub fn redact_pem(message: &str) -> String {
    const BEGIN: &str = "-----BEGIN";
    const END: &str = "-----END";
    const DASHES: &str = "-----";
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find(BEGIN) {
        out.push_str(&rest[..start]);
        out.push_str("[REDACTED]");
        let after_begin = &rest[start + BEGIN.len()..];
        let Some(end) = after_begin.find(END) else {
            return out;
        };
        let after_end = &after_begin[end + END.len()..];
        match after_end.find(DASHES) {
            Some(close) => rest = &after_end[close + DASHES.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of two or more blank lines into a single line break.
#[must_use]
pub fn normalize_pem(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0;
    for line in content.split_inclusive('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if blank_run == 1 {
            out.push('\n');
        }
        blank_run = 0;
        out.push_str(line);
    }
    if blank_run == 1 && !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Key followed by the certificate, with a line break between them.
fn cert_content(key: &[u8], crt: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + crt.len() + 1);
    buf.extend_from_slice(key);
    if key.last().is_some_and(|b| *b != b'\n') {
        buf.push(b'\n');
    }
    buf.extend_from_slice(crt);
    normalize_pem(&String::from_utf8_lossy(&buf)).into_bytes()
}

fn ca_content(crt: &[u8]) -> Vec<u8> {
    let mut content = normalize_pem(&String::from_utf8_lossy(crt));
    while content.ends_with("\n\n") {
        content.pop();
    }
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content.into_bytes()
}

impl CertManager {
    /// Manager writing into the certificate directories of `paths`.
    #[must_use]
    pub fn new(paths: &Paths) -> Self {
        let dirs = [
            (Pool::Frontend, paths.frontend_certs_dir.clone()),
            (Pool::Backend, paths.backend_certs_dir.clone()),
            (Pool::Ca, paths.ca_certs_dir.clone()),
            (Pool::TcpCr, paths.tcp_cr_certs_dir.clone()),
        ]
        .into_iter()
        .collect();
        Self {
            dirs,
            pools: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    fn dir(&self, pool: Pool) -> &Path {
        self.dirs.get(&pool).map_or(Path::new("."), PathBuf::as_path)
    }

    /// Materialize `secret` as `secret_type` and return the path the proxy should use.
    ///
    /// # Errors
    ///
    /// [`CertError::MissingKey`] when the secret lacks the data the type needs,
    /// [`CertError::Io`] when the file cannot be written.
    pub fn add_secret(
        &mut self,
        secret: &Secret,
        secret_type: SecretType,
    ) -> Result<String, CertError> {
        let (pool, name) = match secret_type {
            SecretType::FrontendDefaultCert => (
                Pool::Frontend,
                format!("{DEFAULT_CERT_PREFIX}{}_{}", secret.namespace, secret.name),
            ),
            SecretType::FrontendCert => (
                Pool::Frontend,
                format!("{}_{}", secret.namespace, secret.name),
            ),
            SecretType::BackendCert => (Pool::Backend, format!("{}_{}", secret.namespace, secret.name)),
            SecretType::CaCert => (Pool::Ca, format!("{}_{}", secret.namespace, secret.name)),
            SecretType::TcpCrCert => (Pool::TcpCr, format!("{}_{}", secret.namespace, secret.name)),
        };

        if let Some(entry) = self.pools.get_mut(&pool).and_then(|p| p.get_mut(&name)) {
            entry.in_use = true;
            if secret.status == Status::Empty && entry.path.exists() {
                return Ok(entry.path.display().to_string());
            }
        }

        let secret_ref = format!("{}/{}", secret.namespace, secret.name);
        let files = if pool == Pool::Ca {
            let crt = secret
                .data
                .get("tls.crt")
                .ok_or_else(|| CertError::MissingKey {
                    secret: secret_ref.clone(),
                    key: "tls.crt".to_string(),
                })?;
            vec![(String::new(), ca_content(crt))]
        } else {
            let mut files = Vec::new();
            for kind in std::iter::once("tls").chain(CERT_BUNDLE_TYPES) {
                let key = secret.data.get(&format!("{kind}.key"));
                let crt = secret.data.get(&format!("{kind}.crt"));
                if let (Some(key), Some(crt)) = (key, crt) {
                    let suffix = if kind == "tls" {
                        String::new()
                    } else {
                        format!(".{kind}")
                    };
                    files.push((suffix, cert_content(key, crt)));
                }
            }
            if files.is_empty() {
                return Err(CertError::MissingKey {
                    secret: secret_ref,
                    key: "tls.key/tls.crt".to_string(),
                });
            }
            files
        };

        let base = self.dir(pool).join(format!("{name}.{PEM_EXTENSION}"));
        let mut path = base.clone();
        let mut created = false;
        let mut needs_reload = false;
        for (suffix, content) in files {
            let file = PathBuf::from(format!("{}{suffix}", base.display()));
            let new_file = match std::fs::read(&file) {
                Ok(existing) if existing == content => {
                    path = file;
                    continue;
                }
                Ok(_) => false,
                Err(_) => true,
            };
            self.write(&file, &content)?;
            created |= new_file;
            if new_file && (!suffix.is_empty() || !(pool.is_crt_list() || pool == Pool::Ca)) {
                needs_reload = true;
            } else {
                self.pending.push(PendingUpdate {
                    pool,
                    name: name.clone(),
                    path: file.clone(),
                    payload: content,
                    created: new_file,
                });
            }
            path = file;
        }
        // Single certificate secrets are referenced by file, bundles by their base name
        if path.extension().is_some_and(|e| e != PEM_EXTENSION) {
            path = base;
        }

        let entry = self
            .pools
            .entry(pool)
            .or_default()
            .entry(name)
            .or_insert_with(|| CertEntry {
                secret: secret_ref.clone(),
                path: path.clone(),
                in_use: true,
                updated: false,
            });
        entry.in_use = true;
        entry.path = path.clone();
        if created {
            info!(secret = %secret_ref, path = %path.display(), "certificate written");
        }
        if needs_reload {
            entry.updated = true;
        }
        Ok(path.display().to_string())
    }

    fn write(&self, file: &Path, content: &[u8]) -> Result<(), CertError> {
        write_atomic(file, content).map_err(|e| CertError::Io {
            path: file.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn mark_updated(&mut self, pool: Pool, name: &str) {
        if let Some(entry) = self.pools.get_mut(&pool).and_then(|p| p.get_mut(name)) {
            entry.updated = true;
        }
    }

    /// Push new and changed certificates over the runtime socket.
    ///
    /// A certificate whose update cannot be applied live is flagged updated so the
    /// reconciler reloads the proxy.
    pub async fn push_runtime_updates(&mut self, proxy: &mut dyn ProxyApi) {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return;
        }
        if !proxy.runtime_available() {
            for update in pending {
                self.mark_updated(update.pool, &update.name);
            }
            return;
        }
        for update in pending {
            let path = update.path.display().to_string();
            let crt_list = Some(update.pool)
                .filter(|pool| update.created && pool.is_crt_list())
                .map(|pool| self.dir(pool).display().to_string());
            let kind = update.pool.entry_kind();
            match push_one(proxy, kind, &path, &update.payload, crt_list.as_deref()).await {
                Ok(()) => debug!(path = %path, "certificate updated live"),
                Err(e) => {
                    error!(
                        path = %path,
                        error = %redact_pem(&e.to_string()),
                        "runtime certificate update failed"
                    );
                    self.mark_updated(update.pool, &update.name);
                }
            }
        }
    }

    /// True when any certificate requires a reload.
    #[must_use]
    pub fn certs_updated(&self) -> bool {
        self.pools
            .values()
            .flat_map(BTreeMap::values)
            .any(|c| c.updated)
    }

    /// True when any frontend certificate is in use this reconcile.
    #[must_use]
    pub fn front_certs_in_use(&self) -> bool {
        self.pools
            .get(&Pool::Frontend)
            .is_some_and(|p| p.values().any(|c| c.in_use))
    }

    /// Frontend certificate directory.
    #[must_use]
    pub fn frontend_dir(&self) -> &Path {
        self.dir(Pool::Frontend)
    }

    /// Delete certificate files that are unknown or unused.
    ///
    /// Frontend certificates are also dropped from the proxy's certificate list over the
    /// runtime socket. Returns the removed files that need a reload to be forgotten.
    pub async fn refresh_certs(&mut self, proxy: &mut dyn ProxyApi) -> Vec<String> {
        let mut reload = Vec::new();
        for pool in [Pool::Frontend, Pool::Backend, Pool::Ca, Pool::TcpCr] {
            let dir = self.dir(pool).to_path_buf();
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot list certificate directory");
                    continue;
                }
            };
            let certs = self.pools.entry(pool).or_default();
            for file in entries.flatten() {
                if file.file_type().map_or(true, |t| t.is_dir()) {
                    continue;
                }
                let file_name = file.file_name().to_string_lossy().into_owned();
                if is_temporary(&file_name) {
                    continue;
                }
                let stem = file_name
                    .split(&format!(".{PEM_EXTENSION}"))
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let keep = certs.get(&stem).is_some_and(|c| c.in_use);
                if keep {
                    continue;
                }
                let file_path = file.path();
                let live = pool.is_crt_list()
                    && file_name == format!("{stem}.{PEM_EXTENSION}")
                    && proxy.runtime_available()
                    && match delete_one(proxy, &dir, &file_path.display().to_string()).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(
                                file = %file_name,
                                error = %redact_pem(&e.to_string()),
                                "runtime certificate delete failed"
                            );
                            false
                        }
                    };
                match std::fs::remove_file(&file_path) {
                    Ok(()) => {
                        info!(file = %file_name, live, "unused certificate removed");
                        if !live {
                            reload.push(file_name);
                        }
                    }
                    Err(e) => warn!(file = %file_name, error = %e, "failed to remove certificate"),
                }
                certs.remove(&stem);
            }
        }
        reload
    }

    /// Reset the per-reconcile flags.
    pub fn clean_certs(&mut self) {
        for entry in self.pools.values_mut().flat_map(BTreeMap::values_mut) {
            entry.in_use = false;
            entry.updated = false;
        }
        self.pending.clear();
    }
}

/// Replace `path` in the runtime store, then list it in `crt_list` when it is new there.
async fn push_one(
    proxy: &mut dyn ProxyApi,
    kind: EntryKind,
    path: &str,
    payload: &[u8],
    crt_list: Option<&str>,
) -> Result<(), ProxyError> {
    let created = match kind {
        EntryKind::Cert => proxy.cert_entry_create(path).await,
        EntryKind::CaFile => proxy.ca_file_create(path).await,
    };
    let already_exists = match created {
        Ok(()) => false,
        Err(e) if e.is_already_exists() || e.to_string().contains("already exists") => true,
        Err(e) => return Err(e),
    };
    let set = match kind {
        EntryKind::Cert => proxy.cert_entry_set(path, payload).await,
        EntryKind::CaFile => proxy.ca_file_set(path, payload).await,
    };
    let result = match (set, kind) {
        (Ok(()), EntryKind::Cert) => proxy.cert_entry_commit(path).await,
        (Ok(()), EntryKind::CaFile) => proxy.ca_file_commit(path).await,
        (Err(e), _) => Err(e),
    };
    if let Err(e) = result {
        let abort = match kind {
            EntryKind::Cert => proxy.cert_entry_abort(path).await,
            EntryKind::CaFile => proxy.ca_file_abort(path).await,
        };
        if let Err(abort) = abort {
            warn!(path = %path, error = %redact_pem(&abort.to_string()), "certificate transaction abort failed");
        }
        return Err(e);
    }
    match crt_list {
        Some(crt_list) if !already_exists => proxy.crt_list_entry_add(crt_list, path).await,
        _ => Ok(()),
    }
}

/// Drop `path` from `crt_list` and from the runtime certificate store.
async fn delete_one(proxy: &mut dyn ProxyApi, crt_list: &Path, path: &str) -> Result<(), ProxyError> {
    proxy
        .crt_list_entry_delete(&crt_list.display().to_string(), path)
        .await?;
    proxy.cert_entry_delete(path).await
}

#[cfg(test)]
#[path = "certs_tests.rs"]
mod certs_tests;
