// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ownership of proxy objects created on behalf of cluster objects.
//!
//! A TCP custom resource owns the frontends built from it, a tcp-services ConfigMap entry
//! owns its `tcp-<port>` frontend. A proxy object may be deleted once it has no owner.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cluster object owning proxy objects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Owner {
    pub resource_type: OwnerType,
    pub namespace: String,
    pub name: String,
}

impl Owner {
    pub fn new(resource_type: OwnerType, namespace: &str, name: &str) -> Self {
        Self {
            resource_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OwnerType {
    TcpCustomResource,
    TcpServicesConfigMap,
}

#[derive(Debug, Default)]
struct Maps {
    by_owner: BTreeMap<Owner, BTreeSet<String>>,
    by_resource: BTreeMap<String, BTreeSet<Owner>>,
}

/// Bidirectional owner / proxy object map.
///
/// Cloning yields another handle on the same map.
#[derive(Debug, Clone, Default)]
pub struct RefCounter {
    inner: Arc<Mutex<Maps>>,
}

impl RefCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record that `owner` needs `resource`.
    pub fn add_owner(&self, owner: Owner, resource: &str) {
        let mut maps = self.lock();
        maps.by_owner
            .entry(owner.clone())
            .or_default()
            .insert(resource.to_string());
        maps.by_resource
            .entry(resource.to_string())
            .or_default()
            .insert(owner);
    }

    /// Drop every claim of `owner`; returns the resources left without owner.
    pub fn remove_owner(&self, owner: &Owner) -> Vec<String> {
        let mut maps = self.lock();
        let Some(resources) = maps.by_owner.remove(owner) else {
            return Vec::new();
        };
        let mut orphans = Vec::new();
        for resource in resources {
            if let Some(owners) = maps.by_resource.get_mut(&resource) {
                owners.remove(owner);
                if owners.is_empty() {
                    maps.by_resource.remove(&resource);
                    orphans.push(resource);
                }
            }
        }
        orphans
    }

    /// Drop the claim of `owner` on `resource` only; returns true when `resource` is
    /// left without owner.
    pub fn remove_owner_for_cfg_resource(&self, owner: &Owner, resource: &str) -> bool {
        let mut maps = self.lock();
        if let Some(resources) = maps.by_owner.get_mut(owner) {
            resources.remove(resource);
            if resources.is_empty() {
                maps.by_owner.remove(owner);
            }
        }
        match maps.by_resource.get_mut(resource) {
            Some(owners) => {
                owners.remove(owner);
                if owners.is_empty() {
                    maps.by_resource.remove(resource);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    #[must_use]
    pub fn has_owners(&self, resource: &str) -> bool {
        self.lock()
            .by_resource
            .get(resource)
            .is_some_and(|o| !o.is_empty())
    }

    /// Resources claimed by `owner`.
    #[must_use]
    pub fn resources(&self, owner: &Owner) -> Vec<String> {
        self.lock()
            .by_owner
            .get(owner)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Owners of type `resource_type`.
    #[must_use]
    pub fn owners(&self, resource_type: OwnerType) -> Vec<Owner> {
        self.lock()
            .by_owner
            .keys()
            .filter(|o| o.resource_type == resource_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut maps = self.lock();
        maps.by_owner.clear();
        maps.by_resource.clear();
    }
}

#[cfg(test)]
#[path = "refcount_tests.rs"]
mod refcount_tests;
