// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for crd.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_groups_and_kinds() {
        let crds = [
            (Backend::crd(), "Backend"),
            (Defaults::crd(), "Defaults"),
            (Global::crd(), "Global"),
            (LogTargets::crd(), "LogTargets"),
            (Frontend::crd(), "Frontend"),
            (TCP::crd(), "TCP"),
        ];
        for (crd, kind) in crds {
            assert_eq!(crd.spec.group, "ingress.v3.haproxy.org");
            assert_eq!(crd.spec.names.kind, kind);
            assert_eq!(crd.spec.scope, "Namespaced");
            assert_eq!(crd.spec.versions[0].name, "v3");
        }
    }

    #[test]
    fn test_tcp_spec_deserializes_with_defaults() {
        let spec: TcpSpec = serde_json::from_value(serde_json::json!({
            "items": [{
                "name": "postgres",
                "frontend": {
                    "name": "pg",
                    "binds": [{"name": "v4", "port": 5432}]
                },
                "service": {"name": "postgres", "port": 5432}
            }]
        }))
        .unwrap();
        let item = &spec.items[0];
        assert_eq!(item.frontend.binds[0].address, "");
        assert!(!item.frontend.binds[0].ssl);
        assert!(item.services.is_empty());
        assert_eq!(item.service.port, 5432);
    }

    #[test]
    fn test_backend_spec_camel_case() {
        let spec: BackendCrSpec = serde_json::from_value(serde_json::json!({
            "balance": {"algorithm": "leastconn"},
            "cookie": {"name": "SRV"},
            "defaultServer": {"check": true, "sendProxy": "send-proxy-v2"},
            "checkTimeout": "5s"
        }))
        .unwrap();
        assert_eq!(spec.balance.unwrap().algorithm, "leastconn");
        let cookie = spec.cookie.unwrap();
        assert_eq!(cookie.r#type, "insert");
        assert!(!cookie.dynamic);
        let server = spec.default_server.unwrap();
        assert!(server.check);
        assert_eq!(server.send_proxy.as_deref(), Some("send-proxy-v2"));
        assert_eq!(spec.check_timeout.as_deref(), Some("5s"));
    }
}
