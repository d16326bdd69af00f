// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Event methods merging watch notifications into the store.
//!
//! Each method takes the newly observed object, whose `status` is the verb of the
//! notification (ADDED, MODIFIED or DELETED), and returns whether a reconcile is needed.

use super::types::*;
use super::K8sStore;
use crate::crd::{BackendCrSpec, DefaultsCrSpec, FrontendCrSpec, GlobalCrSpec, LogTargetsCrSpec};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A custom resource referenced by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomResourceSpec {
    Backend(BackendCrSpec),
    Defaults(DefaultsCrSpec),
    Global(GlobalCrSpec),
    LogTargets(LogTargetsCrSpec),
    Frontend(FrontendCrSpec),
}

impl K8sStore {
    /// Merge a namespace notification.
    pub fn event_namespace(&mut self, name: &str, labels: BTreeMap<String, String>, status: Status) -> bool {
        match status {
            Status::Deleted => match self.namespaces.get_mut(name) {
                Some(ns) => {
                    ns.status = Status::Deleted;
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                let ns = self.ensure_namespace(name);
                ns.labels = labels;
                false
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge an ingress notification.
    pub fn event_ingress(&mut self, mut ingress: Ingress) -> bool {
        if !self.is_relevant_namespace(&ingress.namespace) {
            return false;
        }
        let supported_new = self.is_ingress_supported(&ingress);
        let old = self
            .namespaces
            .get(&ingress.namespace)
            .and_then(|ns| ns.ingresses.get(&ingress.name))
            .filter(|old| old.status != Status::Deleted)
            .cloned();
        let supported_old = old.as_ref().is_some_and(|o| self.is_ingress_supported(o));
        let key = ingress.name.clone();
        let ns = self.ensure_namespace(&ingress.namespace);

        match ingress.status {
            Status::Deleted => match ns.ingresses.get_mut(&key) {
                Some(stored) => {
                    stored.set_status_recursive(Status::Deleted);
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                let Some(old) = old else {
                    ingress.set_status_recursive(Status::Added);
                    ns.ingresses.insert(key, ingress);
                    return true;
                };
                if old.same_content(&ingress) {
                    return false;
                }
                let class_changed = supported_old != supported_new;
                let mut merged = match (class_changed, supported_new) {
                    (true, true) => {
                        debug!(ingress = %key, "ingress class now owned by this controller");
                        ingress.set_status_recursive(Status::Added);
                        ingress
                    }
                    (true, false) => {
                        debug!(ingress = %key, "ingress class no longer owned by this controller");
                        ingress.set_status_recursive(Status::Deleted);
                        ingress
                    }
                    _ => merge_ingress(&old, ingress),
                };
                merged.class_updated = class_changed || merged.class != old.class;
                ns.ingresses.insert(key, merged);
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge a service notification.
    pub fn event_service(&mut self, mut service: Service) -> bool {
        if !self.is_relevant_namespace(&service.namespace) {
            return false;
        }
        let ns = self.ensure_namespace(&service.namespace);
        let key = service.name.clone();
        match service.status {
            Status::Deleted => match ns.services.get_mut(&key) {
                Some(stored) => {
                    stored.status = Status::Deleted;
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                match ns.services.get(&key).filter(|s| s.status != Status::Deleted) {
                    None => {
                        service.status = Status::Added;
                        for port in &mut service.ports {
                            port.status = Status::Added;
                        }
                    }
                    Some(old) => {
                        if old.same_content(&service) {
                            return false;
                        }
                        let (annotations, _) = diff_annotations(&old.annotations, &service.annotations);
                        service.annotations = annotations;
                        service.status = Status::Modified;
                        for port in &mut service.ports {
                            port.status = if old.ports.iter().any(|p| p.name == port.name && p.port == port.port) {
                                Status::Empty
                            } else {
                                Status::Modified
                            };
                        }
                    }
                }
                ns.services.insert(key, service);
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge an endpoint slice notification.
    pub fn event_endpoints(&mut self, mut endpoints: Endpoints) -> bool {
        if !self.is_relevant_namespace(&endpoints.namespace) {
            return false;
        }
        let ns = self.ensure_namespace(&endpoints.namespace);
        let slices = ns.endpoints.entry(endpoints.service.clone()).or_default();
        let key = endpoints.slice_name.clone();
        match endpoints.status {
            Status::Deleted => match slices.get_mut(&key) {
                Some(stored) => {
                    stored.status = Status::Deleted;
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                if let Some(old) = slices.get(&key).filter(|e| e.status != Status::Deleted) {
                    if old.ports == endpoints.ports {
                        return false;
                    }
                    endpoints.status = Status::Modified;
                } else {
                    endpoints.status = Status::Added;
                }
                slices.insert(key, endpoints);
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge a secret notification.
    pub fn event_secret(&mut self, mut secret: Secret) -> bool {
        if !self.is_relevant_namespace(&secret.namespace) {
            return false;
        }
        let ns = self.ensure_namespace(&secret.namespace);
        let key = secret.name.clone();
        match secret.status {
            Status::Deleted => match ns.secrets.get_mut(&key) {
                Some(stored) => {
                    stored.status = Status::Deleted;
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                if let Some(old) = ns.secrets.get(&key).filter(|s| s.status != Status::Deleted) {
                    if old.data == secret.data {
                        return false;
                    }
                    secret.status = Status::Modified;
                } else {
                    secret.status = Status::Added;
                }
                ns.secrets.insert(key, secret);
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge a ConfigMap notification; ConfigMaps without a recognized role are ignored.
    pub fn event_config_map(&mut self, config_map: ConfigMap) -> bool {
        let Some(role) = self
            .config_map_refs
            .role(&config_map.namespace, &config_map.name)
        else {
            return false;
        };
        let stored = match role {
            ConfigMapRole::Main => &mut self.config_maps.main,
            ConfigMapRole::TcpServices => &mut self.config_maps.tcp_services,
            ConfigMapRole::Errorfiles => &mut self.config_maps.errorfiles,
            ConfigMapRole::Patternfiles => &mut self.config_maps.patternfiles,
        };
        match config_map.status {
            Status::Deleted => {
                if !stored.loaded {
                    return false;
                }
                warn!(configmap = %format!("{}/{}", stored.namespace, stored.name), "configmap deleted");
                for value in stored.annotations.values_mut() {
                    value.old_value = Some(value.value.clone());
                    value.status = Status::Deleted;
                }
                stored.status = Status::Deleted;
                stored.loaded = false;
                true
            }
            Status::Added | Status::Modified => {
                let (annotations, changed) = diff_annotations(&stored.annotations, &config_map.annotations);
                if stored.loaded && !changed {
                    return false;
                }
                stored.status = if stored.loaded {
                    Status::Modified
                } else {
                    Status::Added
                };
                stored.annotations = annotations;
                stored.loaded = true;
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge an IngressClass notification.
    pub fn event_ingress_class(&mut self, mut class: IngressClass) -> bool {
        let key = class.name.clone();
        match class.status {
            Status::Deleted => match self.ingress_classes.get_mut(&key) {
                Some(stored) => {
                    stored.status = Status::Deleted;
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                if let Some(old) = self
                    .ingress_classes
                    .get(&key)
                    .filter(|c| c.status != Status::Deleted)
                {
                    if old.controller == class.controller && old.annotations == class.annotations {
                        return false;
                    }
                    class.status = Status::Modified;
                } else {
                    class.status = Status::Added;
                }
                self.ingress_classes.insert(key, class);
                true
            }
            Status::Empty | Status::Error => false,
        }
    }

    /// Merge a notification for one of the referenced custom resources.
    ///
    /// `spec` is `None` for a deletion.
    pub fn event_custom_resource(
        &mut self,
        namespace: &str,
        name: &str,
        spec: Option<CustomResourceSpec>,
        kind: CustomResourceKind,
    ) -> bool {
        if !self.is_relevant_namespace(namespace) {
            return false;
        }
        let crs = &mut self.ensure_namespace(namespace).crs;
        let name = name.to_string();
        match (kind, spec) {
            (CustomResourceKind::Backend, Some(CustomResourceSpec::Backend(s))) => upsert(&mut crs.backends, name, s),
            (CustomResourceKind::Defaults, Some(CustomResourceSpec::Defaults(s))) => upsert(&mut crs.defaults, name, s),
            (CustomResourceKind::Global, Some(CustomResourceSpec::Global(s))) => upsert(&mut crs.globals, name, s),
            (CustomResourceKind::LogTargets, Some(CustomResourceSpec::LogTargets(s))) => {
                upsert(&mut crs.log_targets, name, s)
            }
            (CustomResourceKind::Frontend, Some(CustomResourceSpec::Frontend(s))) => upsert(&mut crs.frontends, name, s),
            (CustomResourceKind::Backend, None) => crs.backends.remove(&name).is_some(),
            (CustomResourceKind::Defaults, None) => crs.defaults.remove(&name).is_some(),
            (CustomResourceKind::Global, None) => crs.globals.remove(&name).is_some(),
            (CustomResourceKind::LogTargets, None) => crs.log_targets.remove(&name).is_some(),
            (CustomResourceKind::Frontend, None) => crs.frontends.remove(&name).is_some(),
            (kind, Some(_)) => {
                warn!(?kind, resource = %name, "custom resource kind does not match its spec");
                false
            }
        }
    }

    /// Merge a TCP custom resource notification and re-run collision detection
    /// across every TCP entry of every namespace.
    pub fn event_tcp(&mut self, mut tcp: TcpResource) -> bool {
        if !self.is_relevant_namespace(&tcp.namespace) {
            return false;
        }
        let ns = self.ensure_namespace(&tcp.namespace);
        let key = tcp.name.clone();
        let changed = match tcp.status {
            Status::Deleted => match ns.crs.tcps.get_mut(&key) {
                Some(stored) => {
                    stored.status = Status::Deleted;
                    for item in &mut stored.items {
                        item.status = Status::Deleted;
                    }
                    true
                }
                None => false,
            },
            Status::Added | Status::Modified => {
                let old = ns.crs.tcps.get(&key).filter(|t| t.status != Status::Deleted);
                let same = old.is_some_and(|old| {
                    old.items.len() == tcp.items.len()
                        && old.items.iter().zip(&tcp.items).all(|(a, b)| a.model == b.model)
                });
                if same {
                    false
                } else {
                    let mut items = Vec::with_capacity(tcp.items.len());
                    for mut item in std::mem::take(&mut tcp.items) {
                        let previous = old.and_then(|o| o.items.iter().find(|i| i.model.name == item.model.name));
                        item.status = match previous {
                            Some(p) if p.model == item.model => Status::Empty,
                            Some(_) => Status::Modified,
                            None => Status::Added,
                        };
                        items.push(item);
                    }
                    if let Some(old) = old {
                        let removed_items: Vec<_> = old
                            .items
                            .iter()
                            .filter(|o| !items.iter().any(|i| i.model.name == o.model.name))
                            .cloned()
                            .collect();
                        for mut removed in removed_items {
                            removed.status = Status::Deleted;
                            items.push(removed);
                        }
                    }
                    items.sort_by(|a, b| a.model.name.cmp(&b.model.name));
                    tcp.status = if old.is_some() { Status::Modified } else { Status::Added };
                    tcp.items = items;
                    ns.crs.tcps.insert(key, tcp);
                    true
                }
            }
            Status::Empty | Status::Error => false,
        };
        if changed {
            self.check_tcp_collisions();
        }
        changed
    }

    /// Flag TCP entries that reuse a frontend name or an address:port already claimed
    /// by an entry that sorts earlier (namespace, resource, entry name).
    pub fn check_tcp_collisions(&mut self) {
        let mut frontends: BTreeMap<String, String> = BTreeMap::new();
        let mut addresses: BTreeMap<String, String> = BTreeMap::new();
        for ns in self.namespaces.values_mut() {
            for tcp in ns.crs.tcps.values_mut() {
                for item in &mut tcp.items {
                    item.collision = None;
                    if item.status == Status::Deleted {
                        continue;
                    }
                    let owner = format!("{}/{}/{}", tcp.namespace, tcp.name, item.model.name);
                    if let Some(first) = frontends.get(&item.model.frontend.name) {
                        item.collision = Some(format!(
                            "frontend name '{}' already used by {first}",
                            item.model.frontend.name
                        ));
                        continue;
                    }
                    let binds: Vec<String> = item
                        .model
                        .frontend
                        .binds
                        .iter()
                        .map(|b| format!("{}:{}", b.address, b.port))
                        .collect();
                    if let Some((bind, first)) = binds
                        .iter()
                        .find_map(|b| addresses.get(b).map(|first| (b, first)))
                    {
                        item.collision = Some(format!("bind '{bind}' already used by {first}"));
                        continue;
                    }
                    frontends.insert(item.model.frontend.name.clone(), owner.clone());
                    for bind in binds {
                        addresses.insert(bind, owner.clone());
                    }
                }
            }
        }
    }
}

/// Kinds of referenced custom resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomResourceKind {
    Backend,
    Defaults,
    Global,
    LogTargets,
    Frontend,
}

fn upsert<T: PartialEq>(map: &mut BTreeMap<String, T>, name: String, spec: T) -> bool {
    if map.get(&name) == Some(&spec) {
        return false;
    }
    map.insert(name, spec);
    true
}

fn diff_path(old: Option<&IngressPath>, mut new: IngressPath) -> IngressPath {
    new.status = match old {
        None => Status::Added,
        Some(old) if old.svc_namespace == new.svc_namespace
            && old.svc_name == new.svc_name
            && old.svc_port_int == new.svc_port_int
            && old.svc_port_string == new.svc_port_string
            && old.path == new.path
            && old.path_type == new.path_type =>
        {
            Status::Empty
        }
        Some(_) => Status::Modified,
    };
    new
}

/// Field-by-field diff of an ingress against its stored copy.
///
/// Sub-entities only present in `old` are carried over as DELETED.
fn merge_ingress(old: &Ingress, mut new: Ingress) -> Ingress {
    let mut rules = BTreeMap::new();
    for (host, mut rule) in std::mem::take(&mut new.rules) {
        let old_rule = old.rules.get(&host);
        let mut paths = BTreeMap::new();
        let mut changed = old_rule.is_none();
        for (key, path) in std::mem::take(&mut rule.paths) {
            let path = diff_path(old_rule.and_then(|r| r.paths.get(&key)), path);
            changed |= path.status.is_changed();
            paths.insert(key, path);
        }
        if let Some(old_rule) = old_rule {
            for (key, path) in &old_rule.paths {
                if !paths.contains_key(key) {
                    let mut path = path.clone();
                    path.status = Status::Deleted;
                    paths.insert(key.clone(), path);
                    changed = true;
                }
            }
        }
        rule.paths = paths;
        rule.status = match (old_rule, changed) {
            (None, _) => Status::Added,
            (Some(_), true) => Status::Modified,
            (Some(_), false) => Status::Empty,
        };
        rules.insert(host, rule);
    }
    for (host, rule) in &old.rules {
        if !rules.contains_key(host) {
            let mut rule = rule.clone();
            rule.status = Status::Deleted;
            for path in rule.paths.values_mut() {
                path.status = Status::Deleted;
            }
            rules.insert(host.clone(), rule);
        }
    }
    new.rules = rules;

    let mut tls = BTreeMap::new();
    for (host, mut entry) in std::mem::take(&mut new.tls) {
        entry.status = match old.tls.get(&host) {
            None => Status::Added,
            Some(o) if o.secret_name == entry.secret_name => Status::Empty,
            Some(_) => Status::Modified,
        };
        tls.insert(host, entry);
    }
    for (host, entry) in &old.tls {
        if !tls.contains_key(host) {
            let mut entry = entry.clone();
            entry.status = Status::Deleted;
            tls.insert(host.clone(), entry);
        }
    }
    new.tls = tls;

    new.default_backend = match (old.default_backend.as_ref(), new.default_backend.take()) {
        (old_default, Some(default)) => Some(diff_path(old_default, default)),
        (Some(old_default), None) => {
            let mut removed = old_default.clone();
            removed.status = Status::Deleted;
            Some(removed)
        }
        (None, None) => None,
    };

    let (annotations, _) = diff_annotations(&old.annotations, &new.annotations);
    new.annotations = annotations;
    new.status = Status::Modified;
    new
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;
