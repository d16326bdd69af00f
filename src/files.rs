// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Files materialized from cluster objects.
//!
//! Every replacement goes through [`write_atomic`] so the proxy never reads a half
//! written file. [`FileManager`] tracks the error files and pattern files written from
//! ConfigMaps: which are still referenced this reconcile, and which changed.

use crate::errors::{ControllerError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `content` to `path` through a temporary sibling and a rename.
///
/// # Errors
///
/// [`ControllerError::Io`] when the temporary file cannot be written or renamed.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{file_name}.tmp{}.{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            debug!(file = %tmp.display(), error = %cleanup, "temporary file not removed");
        }
        ControllerError::io(path, e)
    })
}

/// Hex SHA-256 of `content`.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// True when `name` is a temporary file left by [`write_atomic`].
#[must_use]
pub fn is_temporary(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManagedFile {
    hash: String,
    in_use: bool,
    updated: bool,
}

/// Tracks the files of one directory.
#[derive(Debug, Clone)]
pub struct FileManager {
    dir: PathBuf,
    files: BTreeMap<String, ManagedFile>,
}

impl FileManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: BTreeMap::new(),
        }
    }

    /// Path of the managed file `name`.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `name` when its content changed and mark it in use.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Io`] when the file cannot be written; the entry is still marked
    /// updated so the next reconcile retries.
    pub fn update(&mut self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let hash = content_hash(content);
        let path = self.path(name);
        if let Some(file) = self.files.get_mut(name) {
            file.in_use = true;
            if file.hash == hash {
                return Ok(path);
            }
        }
        let result = write_atomic(&path, content);
        self.files.insert(
            name.to_string(),
            ManagedFile {
                hash: if result.is_ok() { hash } else { String::new() },
                in_use: true,
                updated: true,
            },
        );
        result.map(|()| {
            debug!(file = %path.display(), "file written");
            path
        })
    }

    /// True when any file was written or removed since the last [`FileManager::clean`].
    #[must_use]
    pub fn updated(&self) -> bool {
        self.files.values().any(|f| f.updated)
    }

    /// Delete files not marked in use this reconcile; returns the removed names.
    pub fn refresh(&mut self) -> Vec<String> {
        let unused: Vec<String> = self
            .files
            .iter()
            .filter(|(_, f)| !f.in_use)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &unused {
            let path = self.path(name);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %e, "failed to remove file");
                }
            }
            self.files.remove(name);
        }
        unused
    }

    /// Reset the per-reconcile flags.
    pub fn clean(&mut self) {
        for file in self.files.values_mut() {
            file.in_use = false;
            file.updated = false;
        }
    }

    /// Names of the tracked files.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod files_tests;
