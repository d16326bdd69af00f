// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for watch.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{FrontendCrSpec, TcpSpec};
    use serde_json::json;

    #[test]
    fn test_every_kind_is_awaited_once() {
        let unique: std::collections::BTreeSet<_> = KINDS.iter().collect();
        assert_eq!(unique.len(), KINDS.len());
        assert!(KINDS.contains(&"EndpointSlice"));
    }

    #[test]
    fn test_namespace_event_keeps_labels() {
        let ns: Namespace = serde_json::from_value(json!({
            "metadata": {"name": "prod", "labels": {"team": "web"}}
        }))
        .unwrap();

        let Some(ClusterEvent::Namespace {
            name,
            labels,
            status,
        }) = namespace_event(&ns, Status::Added)
        else {
            panic!("expected a namespace event");
        };
        assert_eq!(name, "prod");
        assert_eq!(labels["team"], "web");
        assert_eq!(status, Status::Added);
    }

    #[test]
    fn test_endpoints_event_carries_status() {
        let slice: EndpointSlice = serde_json::from_value(json!({
            "metadata": {
                "name": "web-abc",
                "namespace": "prod",
                "labels": {"kubernetes.io/service-name": "web"}
            },
            "addressType": "IPv4",
            "endpoints": [{"addresses": ["10.0.0.1"]}],
            "ports": [{"name": "http", "port": 8080}]
        }))
        .unwrap();

        let Some(ClusterEvent::Endpoints(endpoints)) = endpoints_event(&slice, Status::Deleted)
        else {
            panic!("expected an endpoints event");
        };
        assert_eq!(endpoints.service, "web");
        assert_eq!(endpoints.status, Status::Deleted);
    }

    #[test]
    fn test_unlabelled_slice_is_dropped() {
        let slice: EndpointSlice = serde_json::from_value(json!({
            "metadata": {"name": "orphan", "namespace": "prod"},
            "addressType": "IPv4",
            "endpoints": []
        }))
        .unwrap();

        assert!(endpoints_event(&slice, Status::Added).is_none());
    }

    #[test]
    fn test_custom_resource_deletion_has_no_spec() {
        let mut frontend = Frontend::new("web-fe", FrontendCrSpec::default());
        frontend.metadata.namespace = Some("haproxy-controller".to_string());
        let spec = |f: &Frontend| CustomResourceSpec::Frontend(f.spec.clone());

        let applied = custom_resource_event(&frontend, Status::Modified, CustomResourceKind::Frontend, spec);
        let deleted = custom_resource_event(&frontend, Status::Deleted, CustomResourceKind::Frontend, spec);

        assert!(matches!(
            applied,
            Some(ClusterEvent::CustomResource { ref namespace, spec: Some(_), .. })
                if namespace == "haproxy-controller"
        ));
        assert!(matches!(
            deleted,
            Some(ClusterEvent::CustomResource { spec: None, .. })
        ));
    }

    #[test]
    fn test_tcp_event_keeps_namespace() {
        let mut tcp = TCP::new("db", TcpSpec::default());
        tcp.metadata.namespace = Some("data".to_string());

        let Some(ClusterEvent::Tcp(resource)) = tcp_event(&tcp, Status::Added) else {
            panic!("expected a TCP event");
        };
        assert_eq!(resource.namespace, "data");
        assert_eq!(resource.name, "db");
        assert_eq!(resource.status, Status::Added);
    }
}
