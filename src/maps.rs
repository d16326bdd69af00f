// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Map files.
//!
//! Routing maps (`host`, `sni`, `path-exact`, `path-prefix`) always exist. Pattern maps
//! holding source address lists are named after their content and disappear once no
//! rule references them. Rows are collected during a reconcile and each map is rewritten
//! at the end only when its rows differ from what was last written.

use crate::constants::{MAP_FILE_EXTENSION, MAP_HOST, MAP_PATH_EXACT, MAP_PATH_PREFIX, MAP_SNI};
use crate::errors::ErrorList;
use crate::files::{content_hash, write_atomic};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ROUTING_MAPS: [&str; 4] = [MAP_HOST, MAP_SNI, MAP_PATH_EXACT, MAP_PATH_PREFIX];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MapFile {
    rows: BTreeSet<String>,
    /// Content last written, `None` before the first write
    written: Option<String>,
    persistent: bool,
}

/// Map files of one directory.
#[derive(Debug, Clone)]
pub struct Maps {
    dir: PathBuf,
    maps: BTreeMap<String, MapFile>,
}

impl Maps {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let maps = ROUTING_MAPS
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    MapFile {
                        persistent: true,
                        ..MapFile::default()
                    },
                )
            })
            .collect();
        Self {
            dir: dir.into(),
            maps,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of map `name`.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{MAP_FILE_EXTENSION}"))
    }

    /// Add a `key value` row to `name` for this reconcile.
    pub fn append_row(&mut self, name: &str, row: impl Into<String>) {
        self.maps
            .entry(name.to_string())
            .or_default()
            .rows
            .insert(row.into());
    }

    /// True when `name` has rows this reconcile.
    #[must_use]
    pub fn map_exists(&self, name: &str) -> bool {
        self.maps.get(name).is_some_and(|m| !m.rows.is_empty())
    }

    /// Rows of `name` in file order.
    #[must_use]
    pub fn rows(&self, name: &str) -> Vec<String> {
        self.maps
            .get(name)
            .map(|m| ordered_rows(name, &m.rows))
            .unwrap_or_default()
    }

    /// Register a pattern map holding `entries` and return its path.
    ///
    /// The name is `<kind>-<hash of the entries>`, so identical lists share one file.
    pub fn pattern_map(&mut self, kind: &str, entries: &[String]) -> PathBuf {
        let joined = entries.join("\n");
        let hash = content_hash(joined.as_bytes());
        let name = format!("{kind}-{}", &hash[..16]);
        for entry in entries {
            self.append_row(&name, entry.clone());
        }
        self.path(&name)
    }

    /// Write every map whose rows changed and delete unused pattern maps.
    ///
    /// Returns true when a written map requires a reload. A failed write still
    /// requests the reload so the next reconcile retries.
    pub fn refresh(&mut self, errors: &mut ErrorList) -> bool {
        let mut reload = false;
        let mut unused = Vec::new();
        for (name, map) in &mut self.maps {
            if !map.persistent && map.rows.is_empty() {
                unused.push(name.clone());
                continue;
            }
            let mut content = ordered_rows(name, &map.rows).join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            if map.written.as_deref() == Some(content.as_str()) {
                continue;
            }
            let path = self.dir.join(format!("{name}.{MAP_FILE_EXTENSION}"));
            reload = true;
            match write_atomic(&path, content.as_bytes()) {
                Ok(()) => {
                    info!(map = %name, rows = map.rows.len(), "map file written");
                    map.written = Some(content);
                }
                Err(e) => {
                    warn!(map = %name, error = %e, "failed to write map file");
                    errors.push(e);
                }
            }
        }
        for name in unused {
            self.maps.remove(&name);
            let path = self.path(&name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(map = %name, "unused map file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(map = %name, error = %e, "failed to remove map file"),
            }
        }
        reload
    }

    /// Drop the rows collected this reconcile.
    pub fn clean(&mut self) {
        for map in self.maps.values_mut() {
            map.rows.clear();
        }
    }
}

/// Prefix maps are matched in file order, so longer keys go first.
fn ordered_rows(name: &str, rows: &BTreeSet<String>) -> Vec<String> {
    let mut ordered: Vec<String> = rows.iter().cloned().collect();
    if name == MAP_PATH_PREFIX {
        let key_len = |row: &String| row.split_whitespace().next().map_or(0, str::len);
        ordered.sort_by(|a, b| key_len(b).cmp(&key_len(a)).then_with(|| a.cmp(b)));
    }
    ordered
}

#[cfg(test)]
#[path = "maps_tests.rs"]
mod maps_tests;
