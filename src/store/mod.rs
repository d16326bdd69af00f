// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory cluster-state store.
//!
//! The store is owned by the reconciler and is the single source of truth between
//! reconciles. Watch notifications are merged into it through the event methods in
//! [`events`]; the translators read it through the lookup methods below. Every
//! entity carries a [`Status`] that [`K8sStore::clean`] resets once a reconcile ends.

pub mod convert;
pub mod events;
pub mod types;

pub use types::*;

use crate::annotations::AnnotationDefaults;
use crate::config::{ControllerConfig, ObjectRef};
use crate::constants::{CONTROLLER_NAME, DEFAULT_INGRESS_CLASS_ANNOTATION};
use crate::errors::StoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Namespace whitelist / blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    pub whitelist: BTreeSet<String>,
    pub blacklist: BTreeSet<String>,
}

impl NamespaceFilter {
    /// A whitelist, when set, wins over the blacklist.
    #[must_use]
    pub fn is_relevant(&self, namespace: &str) -> bool {
        if !self.whitelist.is_empty() {
            return self.whitelist.contains(namespace);
        }
        !self.blacklist.contains(namespace)
    }
}

/// Which ingress classes this controller owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    /// Configured class name; empty means none configured
    pub class: String,
    /// Admit ingresses without any class
    pub allow_empty: bool,
}

impl ClassFilter {
    /// Controller value an owned IngressClass must carry.
    #[must_use]
    pub fn controller(&self) -> String {
        if self.class.is_empty() {
            CONTROLLER_NAME.to_string()
        } else {
            format!("{CONTROLLER_NAME}/{}", self.class)
        }
    }
}

/// ConfigMaps recognized by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMapRefs {
    pub main: Option<ObjectRef>,
    pub tcp_services: Option<ObjectRef>,
    pub errorfiles: Option<ObjectRef>,
    pub patternfiles: Option<ObjectRef>,
}

impl ConfigMapRefs {
    /// Role of the ConfigMap `namespace/name`, if any.
    #[must_use]
    pub fn role(&self, namespace: &str, name: &str) -> Option<ConfigMapRole> {
        let matches = |r: &Option<ObjectRef>| {
            r.as_ref()
                .is_some_and(|r| r.namespace == namespace && r.name == name)
        };
        if matches(&self.main) {
            Some(ConfigMapRole::Main)
        } else if matches(&self.tcp_services) {
            Some(ConfigMapRole::TcpServices)
        } else if matches(&self.errorfiles) {
            Some(ConfigMapRole::Errorfiles)
        } else if matches(&self.patternfiles) {
            Some(ConfigMapRole::Patternfiles)
        } else {
            None
        }
    }
}

/// Cluster-state store.
#[derive(Debug, Clone, Default)]
pub struct K8sStore {
    pub namespaces: BTreeMap<String, Namespace>,
    pub ingress_classes: BTreeMap<String, IngressClass>,
    pub config_maps: ConfigMaps,
    pub namespace_filter: NamespaceFilter,
    pub class_filter: ClassFilter,
    pub config_map_refs: ConfigMapRefs,
    pub defaults: Arc<AnnotationDefaults>,
}

impl K8sStore {
    /// Create an empty store for `config`.
    #[must_use]
    pub fn new(config: &ControllerConfig, defaults: Arc<AnnotationDefaults>) -> Self {
        let refs = ConfigMapRefs {
            main: Some(config.main_configmap.clone()),
            tcp_services: config.tcp_services_configmap.clone(),
            errorfiles: config.errorfiles_configmap.clone(),
            patternfiles: config.patternfiles_configmap.clone(),
        };
        let named = |r: &Option<ObjectRef>| ConfigMap {
            namespace: r.as_ref().map(|r| r.namespace.clone()).unwrap_or_default(),
            name: r.as_ref().map(|r| r.name.clone()).unwrap_or_default(),
            ..ConfigMap::default()
        };
        Self {
            config_maps: ConfigMaps {
                main: named(&refs.main),
                tcp_services: named(&refs.tcp_services),
                errorfiles: named(&refs.errorfiles),
                patternfiles: named(&refs.patternfiles),
            },
            namespace_filter: NamespaceFilter {
                whitelist: config.namespace_whitelist.clone(),
                blacklist: config.namespace_blacklist.clone(),
            },
            class_filter: ClassFilter {
                class: config.ingress_class.clone(),
                allow_empty: config.empty_ingress_class,
            },
            config_map_refs: refs,
            defaults,
            ..Self::default()
        }
    }

    /// True when objects of `namespace` may be stored.
    #[must_use]
    pub fn is_relevant_namespace(&self, namespace: &str) -> bool {
        self.namespace_filter.is_relevant(namespace)
    }

    /// Look up a namespace.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the namespace is unknown or DELETED.
    pub fn get_namespace(&self, name: &str) -> Result<&Namespace, StoreError> {
        self.namespaces
            .get(name)
            .filter(|ns| ns.status != Status::Deleted)
            .ok_or_else(|| StoreError::not_found("namespace", "", name))
    }

    /// Get or create the namespace `name`.
    pub fn ensure_namespace(&mut self, name: &str) -> &mut Namespace {
        let relevant = self.is_relevant_namespace(name);
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace {
                name: name.to_string(),
                relevant,
                status: Status::Added,
                ..Namespace::default()
            })
    }

    /// Look up a service.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the service is unknown or DELETED.
    pub fn get_service(&self, namespace: &str, name: &str) -> Result<&Service, StoreError> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.services.get(name))
            .filter(|svc| svc.status != Status::Deleted)
            .ok_or_else(|| StoreError::not_found("service", namespace, name))
    }

    /// Look up a secret.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the secret is unknown or DELETED.
    pub fn get_secret(&self, namespace: &str, name: &str) -> Result<&Secret, StoreError> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.secrets.get(name))
            .filter(|s| s.status != Status::Deleted)
            .ok_or_else(|| StoreError::not_found("secret", namespace, name))
    }

    /// Merge every live endpoint slice of a service into one address set per port name.
    #[must_use]
    pub fn get_endpoints(&self, namespace: &str, service: &str) -> BTreeMap<String, PortEndpoints> {
        let mut merged: BTreeMap<String, PortEndpoints> = BTreeMap::new();
        let Some(slices) = self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.endpoints.get(service))
        else {
            return merged;
        };
        for slice in slices.values().filter(|s| s.status != Status::Deleted) {
            for (port_name, port) in &slice.ports {
                let entry = merged.entry(port_name.clone()).or_default();
                entry.port = port.port;
                entry.addresses.extend(port.addresses.iter().cloned());
            }
        }
        merged
    }

    /// Slot bookkeeping of `(service, port)`, created on first use.
    pub fn runtime_backend_mut(
        &mut self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> &mut RuntimeBackend {
        self.ensure_namespace(namespace)
            .runtime
            .entry(service.to_string())
            .or_default()
            .entry(port_name.to_string())
            .or_default()
    }

    /// Live ingresses ordered by creation time, then namespace and name.
    #[must_use]
    pub fn sorted_ingresses(&self) -> Vec<&Ingress> {
        let mut ingresses: Vec<&Ingress> = self
            .namespaces
            .values()
            .filter(|ns| ns.relevant)
            .flat_map(|ns| ns.ingresses.values())
            .filter(|ing| ing.status != Status::Deleted)
            .collect();
        ingresses.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.name.cmp(&b.name))
        });
        ingresses
    }

    fn default_ingress_class(&self) -> Option<&IngressClass> {
        self.ingress_classes.values().find(|ic| {
            ic.status != Status::Deleted
                && ic
                    .annotations
                    .get(DEFAULT_INGRESS_CLASS_ANNOTATION)
                    .is_some_and(|v| v == "true")
        })
    }

    /// Whether an ingress with `class` (possibly empty) belongs to this controller.
    #[must_use]
    pub fn is_ingress_class_supported(&self, class: &str) -> bool {
        let expected = self.class_filter.controller();
        let resource = if class.is_empty() {
            match self.default_ingress_class() {
                Some(ic) => Some(ic),
                None => {
                    return self.class_filter.class.is_empty() || self.class_filter.allow_empty;
                }
            }
        } else {
            self.ingress_classes
                .get(class)
                .filter(|ic| ic.status != Status::Deleted)
        };
        match resource {
            Some(ic) => ic.controller == expected,
            None => false,
        }
    }

    /// Whether `ingress` belongs to this controller.
    ///
    /// The legacy `ingress.class` annotation wins over `spec.ingressClassName`.
    #[must_use]
    pub fn is_ingress_supported(&self, ingress: &Ingress) -> bool {
        let legacy = ingress
            .annotations
            .get("ingress.class")
            .filter(|v| v.status != Status::Deleted && !v.value.is_empty());
        if let Some(legacy) = legacy {
            debug!(
                ingress = %format!("{}/{}", ingress.namespace, ingress.name),
                "annotation 'ingress.class' is deprecated, use spec.ingressClassName"
            );
            return legacy.value == self.class_filter.class;
        }
        self.is_ingress_class_supported(&ingress.class)
    }

    /// Merge annotation `name` across `sources`, highest precedence first.
    ///
    /// DELETED values fall through to the next source and finally to the defaults
    /// table. When the result differs from what the previous reconcile saw, the previous
    /// value is kept in `old_value`.
    #[must_use]
    pub fn get_value_from_annotations(
        &self,
        name: &str,
        sources: &[&Annotations],
    ) -> Option<AnnotationValue> {
        let mut previous: Option<String> = None;
        for source in sources {
            let Some(value) = source.get(name) else {
                continue;
            };
            if value.status == Status::Deleted {
                previous.get_or_insert_with(|| value.value.clone());
                continue;
            }
            let mut result = value.clone();
            if let Some(old) = previous.filter(|old| *old != result.value) {
                result.old_value = Some(old);
                result.status = Status::Modified;
            }
            return Some(result);
        }
        let default = self.defaults.get(name)?;
        let changed = previous.as_deref().is_some_and(|old| old != default);
        Some(AnnotationValue {
            value: default.to_string(),
            old_value: if changed { previous } else { None },
            status: if changed {
                Status::Modified
            } else {
                Status::Empty
            },
        })
    }

    /// Live value of annotation `name`, or its default.
    #[must_use]
    pub fn annotation(&self, name: &str, sources: &[&Annotations]) -> Option<String> {
        self.get_value_from_annotations(name, sources)
            .map(|v| v.value)
    }

    /// Drop DELETED entities and reset every status to EMPTY.
    pub fn clean(&mut self) {
        self.namespaces.retain(|_, ns| ns.status != Status::Deleted);
        for ns in self.namespaces.values_mut() {
            ns.status = Status::Empty;
            ns.ingresses.retain(|_, ing| ing.status != Status::Deleted);
            for ingress in ns.ingresses.values_mut() {
                clean_ingress(ingress);
            }
            ns.services.retain(|_, svc| svc.status != Status::Deleted);
            for service in ns.services.values_mut() {
                service.status = Status::Empty;
                clean_annotations(&mut service.annotations);
                for port in &mut service.ports {
                    port.status = Status::Empty;
                }
            }
            for slices in ns.endpoints.values_mut() {
                slices.retain(|_, ep| ep.status != Status::Deleted);
                for ep in slices.values_mut() {
                    ep.status = Status::Empty;
                }
            }
            ns.endpoints.retain(|_, slices| !slices.is_empty());
            ns.secrets.retain(|_, s| s.status != Status::Deleted);
            for secret in ns.secrets.values_mut() {
                secret.status = Status::Empty;
            }
            let services = &ns.services;
            ns.runtime.retain(|svc, _| services.contains_key(svc));
            for backend in ns.runtime.values_mut().flat_map(BTreeMap::values_mut) {
                backend.dyn_update_failed = false;
                for server in &mut backend.servers {
                    server.modified = false;
                }
            }
            ns.crs.tcps.retain(|_, tcp| tcp.status != Status::Deleted);
            for tcp in ns.crs.tcps.values_mut() {
                tcp.status = Status::Empty;
                tcp.items.retain(|item| item.status != Status::Deleted);
                for item in &mut tcp.items {
                    item.status = Status::Empty;
                }
            }
        }
        for cm in [
            &mut self.config_maps.main,
            &mut self.config_maps.tcp_services,
            &mut self.config_maps.errorfiles,
            &mut self.config_maps.patternfiles,
        ] {
            if cm.status == Status::Deleted {
                cm.annotations.clear();
                cm.loaded = false;
            }
            cm.status = Status::Empty;
            clean_annotations(&mut cm.annotations);
        }
        self.ingress_classes
            .retain(|_, ic| ic.status != Status::Deleted);
        for ic in self.ingress_classes.values_mut() {
            ic.status = Status::Empty;
        }
    }
}

fn clean_annotations(annotations: &mut Annotations) {
    annotations.retain(|_, v| v.status != Status::Deleted);
    for value in annotations.values_mut() {
        value.status = Status::Empty;
        value.old_value = None;
    }
}

fn clean_ingress(ingress: &mut Ingress) {
    ingress.rules.retain(|_, r| r.status != Status::Deleted);
    for rule in ingress.rules.values_mut() {
        rule.paths.retain(|_, p| p.status != Status::Deleted);
    }
    ingress.tls.retain(|_, t| t.status != Status::Deleted);
    if ingress
        .default_backend
        .as_ref()
        .is_some_and(|d| d.status == Status::Deleted)
    {
        ingress.default_backend = None;
    }
    clean_annotations(&mut ingress.annotations);
    ingress.set_status_recursive(Status::Empty);
    ingress.class_updated = false;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
