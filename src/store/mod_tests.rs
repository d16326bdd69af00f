// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for store/mod.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::path::Path;

    fn store() -> K8sStore {
        K8sStore::new(
            &ControllerConfig::with_root(Path::new("/tmp/haproxy")),
            Arc::new(AnnotationDefaults::builtin()),
        )
    }

    fn ingress_class(name: &str, controller: &str, default: bool) -> IngressClass {
        let mut annotations = BTreeMap::new();
        if default {
            annotations.insert(DEFAULT_INGRESS_CLASS_ANNOTATION.to_string(), "true".to_string());
        }
        IngressClass {
            name: name.to_string(),
            controller: controller.to_string(),
            annotations,
            status: Status::Added,
            ..IngressClass::default()
        }
    }

    // ========================================================================
    // Namespace filtering
    // ========================================================================

    #[test]
    fn test_whitelist_wins_over_blacklist() {
        let filter = NamespaceFilter {
            whitelist: ["prod".to_string()].into(),
            blacklist: ["prod".to_string(), "dev".to_string()].into(),
        };
        assert!(filter.is_relevant("prod"));
        assert!(!filter.is_relevant("staging"));

        let filter = NamespaceFilter {
            whitelist: BTreeSet::new(),
            blacklist: ["dev".to_string()].into(),
        };
        assert!(filter.is_relevant("prod"));
        assert!(!filter.is_relevant("dev"));
    }

    #[test]
    fn test_get_service_skips_deleted() {
        let mut store = store();
        store.ensure_namespace("prod").services.insert(
            "web".to_string(),
            Service {
                namespace: "prod".to_string(),
                name: "web".to_string(),
                status: Status::Deleted,
                ..Service::default()
            },
        );
        let err = store.get_service("prod", "web").unwrap_err();
        assert_eq!(err, StoreError::not_found("service", "prod", "web"));
        assert!(store.get_secret("prod", "missing").is_err());
    }

    // ========================================================================
    // Annotation precedence
    // ========================================================================

    #[test]
    fn test_annotation_precedence_service_ingress_configmap_default() {
        let store = store();
        let service = annotations_from([("load-balance", "leastconn")]);
        let ingress = annotations_from([("load-balance", "source")]);
        let configmap = annotations_from([("load-balance", "first")]);
        let empty = Annotations::new();

        let value = store.annotation("load-balance", &[&service, &ingress, &configmap]);
        assert_eq!(value.as_deref(), Some("leastconn"));

        let value = store.annotation("load-balance", &[&empty, &ingress, &configmap]);
        assert_eq!(value.as_deref(), Some("source"));

        let value = store.annotation("load-balance", &[&empty, &empty, &configmap]);
        assert_eq!(value.as_deref(), Some("first"));

        let value = store.annotation("load-balance", &[&empty, &empty, &empty]);
        assert_eq!(value.as_deref(), Some("roundrobin"));

        assert_eq!(store.annotation("no-such-annotation", &[&empty]), None);
    }

    #[test]
    fn test_deleted_annotation_falls_through_with_old_value() {
        let store = store();
        let mut service = Annotations::new();
        service.insert(
            "load-balance".to_string(),
            AnnotationValue {
                value: "leastconn".to_string(),
                old_value: Some("leastconn".to_string()),
                status: Status::Deleted,
            },
        );
        let configmap = annotations_from([("load-balance", "first")]);

        let merged = store
            .get_value_from_annotations("load-balance", &[&service, &configmap])
            .unwrap();
        assert_eq!(merged.value, "first");
        assert_eq!(merged.old_value.as_deref(), Some("leastconn"));
        assert_eq!(merged.status, Status::Modified);

        let merged = store
            .get_value_from_annotations("load-balance", &[&service])
            .unwrap();
        assert_eq!(merged.value, "roundrobin");
        assert_eq!(merged.old_value.as_deref(), Some("leastconn"));
    }

    #[test]
    fn test_overridden_default_used_last() {
        let defaults = AnnotationDefaults::builtin().with_value("load-balance", "leastconn");
        let store = K8sStore::new(
            &ControllerConfig::with_root(Path::new("/tmp/haproxy")),
            Arc::new(defaults),
        );
        let empty = Annotations::new();

        let merged = store
            .get_value_from_annotations("load-balance", &[&empty])
            .unwrap();
        assert_eq!(merged.value, "leastconn");
        assert_eq!(merged.status, Status::Empty);
    }

    // ========================================================================
    // Ingress class support
    // ========================================================================

    #[test]
    fn test_classless_ingress_supported_without_configured_class() {
        let store = store();
        assert!(store.is_ingress_class_supported(""));
        assert!(!store.is_ingress_class_supported("haproxy"));
    }

    #[test]
    fn test_class_resource_must_name_controller() {
        let mut store = store();
        store.class_filter.class = "public".to_string();
        store.ingress_classes.insert(
            "public".to_string(),
            ingress_class("public", "haproxy.org/ingress-controller/public", false),
        );
        store.ingress_classes.insert(
            "nginx".to_string(),
            ingress_class("nginx", "k8s.io/ingress-nginx", false),
        );
        assert!(store.is_ingress_class_supported("public"));
        assert!(!store.is_ingress_class_supported("nginx"));
        assert!(!store.is_ingress_class_supported(""));

        store.class_filter.allow_empty = true;
        assert!(store.is_ingress_class_supported(""));
    }

    #[test]
    fn test_default_ingress_class_applies_to_classless() {
        let mut store = store();
        store.class_filter.class = "public".to_string();
        store.ingress_classes.insert(
            "public".to_string(),
            ingress_class("public", "haproxy.org/ingress-controller/public", true),
        );
        assert!(store.is_ingress_class_supported(""));
    }

    #[test]
    fn test_legacy_class_annotation() {
        let mut store = store();
        store.class_filter.class = "public".to_string();
        let ingress = Ingress {
            annotations: annotations_from([("ingress.class", "public")]),
            ..Ingress::default()
        };
        assert!(store.is_ingress_supported(&ingress));

        let ingress = Ingress {
            annotations: annotations_from([("ingress.class", "other")]),
            ..Ingress::default()
        };
        assert!(!store.is_ingress_supported(&ingress));
    }

    // ========================================================================
    // Clean
    // ========================================================================

    #[test]
    fn test_clean_removes_deleted_and_resets_status() {
        let mut store = store();
        let ns = store.ensure_namespace("prod");
        ns.services.insert(
            "gone".to_string(),
            Service {
                name: "gone".to_string(),
                status: Status::Deleted,
                ..Service::default()
            },
        );
        let mut annotations = annotations_from([("check", "true")]);
        annotations.insert(
            "old".to_string(),
            AnnotationValue {
                value: "x".to_string(),
                old_value: None,
                status: Status::Deleted,
            },
        );
        ns.services.insert(
            "web".to_string(),
            Service {
                name: "web".to_string(),
                annotations,
                status: Status::Added,
                ..Service::default()
            },
        );
        ns.runtime
            .entry("web".to_string())
            .or_default()
            .insert(
                "http".to_string(),
                RuntimeBackend {
                    servers: vec![HaproxySrv {
                        name: "SRV_1".to_string(),
                        address: "10.0.0.1".to_string(),
                        port: 80,
                        modified: true,
                    }],
                    ..RuntimeBackend::default()
                },
            );
        ns.runtime.entry("gone".to_string()).or_default();

        store.clean();

        let ns = store.get_namespace("prod").unwrap();
        assert_eq!(ns.status, Status::Empty);
        assert!(!ns.services.contains_key("gone"));
        let web = &ns.services["web"];
        assert_eq!(web.status, Status::Empty);
        assert!(!web.annotations.contains_key("old"));
        assert_eq!(web.annotations["check"].status, Status::Empty);
        assert!(!ns.runtime["web"]["http"].servers[0].modified);
        assert!(!ns.runtime.contains_key("gone"));
    }

    #[test]
    fn test_sorted_ingresses_by_creation_then_name() {
        use chrono::TimeZone;
        let mut store = store();
        let ns = store.ensure_namespace("prod");
        let t = |s| chrono::Utc.timestamp_opt(s, 0).single();
        for (name, created) in [("b", t(10)), ("a", t(20)), ("c", t(10))] {
            ns.ingresses.insert(
                name.to_string(),
                Ingress {
                    namespace: "prod".to_string(),
                    name: name.to_string(),
                    created,
                    ..Ingress::default()
                },
            );
        }
        let names: Vec<&str> = store
            .sorted_ingresses()
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_endpoints_merge_slices() {
        let mut store = store();
        let ns = store.ensure_namespace("prod");
        let slice = |name: &str, addr: &str, status| Endpoints {
            slice_name: name.to_string(),
            namespace: "prod".to_string(),
            service: "web".to_string(),
            ports: [(
                "http".to_string(),
                PortEndpoints {
                    port: 8080,
                    addresses: [addr.to_string()].into(),
                },
            )]
            .into(),
            status,
        };
        let slices = ns.endpoints.entry("web".to_string()).or_default();
        slices.insert("s1".to_string(), slice("s1", "10.0.0.1", Status::Added));
        slices.insert("s2".to_string(), slice("s2", "10.0.0.2", Status::Added));
        slices.insert("s3".to_string(), slice("s3", "10.0.0.3", Status::Deleted));

        let merged = store.get_endpoints("prod", "web");
        let http = &merged["http"];
        assert_eq!(http.port, 8080);
        assert_eq!(
            http.addresses.iter().cloned().collect::<Vec<_>>(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }
}
