// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for annotations/backend.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::AnnotationDefaults;
    use crate::config::ControllerConfig;
    use crate::crd::{CrBalance, CrCookie, CrDefaultServer};
    use crate::store::{annotations_from, Annotations, K8sStore, Secret, Status};
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: K8sStore,
        certs: CertManager,
        service: Service,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::with_root(dir.path());
        for d in config.paths.directories() {
            std::fs::create_dir_all(d).unwrap();
        }
        let store = K8sStore::new(&config, Arc::new(AnnotationDefaults::builtin()));
        Fixture {
            certs: CertManager::new(&config.paths),
            _dir: dir,
            store,
            service: Service {
                namespace: "prod".to_string(),
                name: "web".to_string(),
                ..Service::default()
            },
        }
    }

    fn build(f: &mut Fixture, annotations: &Annotations, mode: Mode) -> (Backend, ErrorList) {
        let sources = [annotations];
        let set = AnnotationSet::new(&f.store, &sources);
        let mut errors = ErrorList::new();
        let backend = backend_model(
            "prod_svc_web_http",
            mode,
            &f.service,
            set,
            &mut f.certs,
            &mut errors,
        );
        (backend, errors)
    }

    fn add_tls_secret(store: &mut K8sStore, name: &str) {
        store.ensure_namespace("prod").secrets.insert(
            name.to_string(),
            Secret {
                namespace: "prod".to_string(),
                name: name.to_string(),
                data: [
                    ("tls.key".to_string(), b"KEY".to_vec()),
                    ("tls.crt".to_string(), b"CRT".to_vec()),
                ]
                .into_iter()
                .collect(),
                status: Status::Added,
            },
        );
    }

    // ========================================================================
    // Defaults
    // ========================================================================

    #[test]
    fn test_defaults_only() {
        let mut f = fixture();
        let (backend, errors) = build(&mut f, &Annotations::new(), Mode::Http);

        assert!(errors.is_empty());
        assert_eq!(backend.balance.unwrap().algorithm, "roundrobin");
        assert!(backend.forwardfor);
        let params = backend.default_server.unwrap();
        assert!(params.check);
        assert!(!params.ssl);
    }

    #[test]
    fn test_tcp_backend_ignores_http_only_annotations() {
        let mut f = fixture();
        let annotations = annotations_from([("check-http", "/healthz")]);
        let (backend, _) = build(&mut f, &annotations, Mode::Tcp);
        assert!(backend.httpchk.is_none());
        assert!(!backend.forwardfor);
    }

    #[test]
    fn test_invalid_annotation_keeps_default() {
        let mut f = fixture();
        let annotations = annotations_from([("load-balance", "fastest"), ("abortonclose", "maybe")]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert_eq!(errors.len(), 2);
        assert!(backend.balance.is_none());
        assert!(!backend.abortonclose);
    }

    // ========================================================================
    // Settings
    // ========================================================================

    #[test]
    fn test_health_check_and_timeouts() {
        let mut f = fixture();
        let annotations = annotations_from([
            ("check-http", "GET /healthz"),
            ("check-interval", "2s"),
            ("timeout-check", "3s"),
            ("pod-maxconn", "100"),
            ("send-proxy-protocol", "proxy-v2"),
        ]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert!(errors.is_empty());
        let check = backend.httpchk.unwrap();
        assert_eq!(check.method.as_deref(), Some("GET"));
        assert_eq!(check.uri, "/healthz");
        assert_eq!(backend.check_timeout.as_deref(), Some("3s"));
        let params = backend.default_server.unwrap();
        assert_eq!(params.inter.as_deref(), Some("2s"));
        assert_eq!(params.maxconn, Some(100));
        assert_eq!(params.send_proxy.as_deref(), Some("send-proxy-v2"));
    }

    #[test]
    fn test_dynamic_cookie_sets_key() {
        let mut f = fixture();
        let annotations = annotations_from([("cookie-persistence", "SRVID")]);
        let (backend, _) = build(&mut f, &annotations, Mode::Http);
        let cookie = backend.cookie.unwrap();
        assert_eq!(cookie.name, "SRVID");
        assert_eq!(cookie.kind, "insert");
        assert!(cookie.dynamic && cookie.indirect && cookie.nocache);
        assert_eq!(backend.dynamic_cookie_key.as_deref(), Some(DYNAMIC_COOKIE_KEY));
    }

    #[test]
    fn test_cookie_annotations_conflict() {
        let mut f = fixture();
        let annotations = annotations_from([
            ("cookie-persistence", "A"),
            ("cookie-persistence-no-dynamic", "B"),
        ]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert_eq!(errors.len(), 1);
        assert!(backend.cookie.is_none());
    }

    #[test]
    fn test_external_name_init_addr() {
        let mut f = fixture();
        f.service.dns = "db.example.com".to_string();
        let (backend, _) = build(&mut f, &Annotations::new(), Mode::Tcp);
        assert_eq!(
            backend.default_server.unwrap().init_addr.as_deref(),
            Some(EXTERNAL_NAME_INIT_ADDR)
        );
    }

    // ========================================================================
    // Server TLS
    // ========================================================================

    #[test]
    fn test_server_ssl_then_proto_keeps_alpn() {
        let mut f = fixture();
        let annotations = annotations_from([("server-ssl", "true"), ("server-proto", "h2")]);
        let (backend, _) = build(&mut f, &annotations, Mode::Http);
        let params = backend.default_server.unwrap();
        assert!(params.ssl);
        assert_eq!(params.verify.as_deref(), Some("none"));
        assert_eq!(params.alpn.as_deref(), Some(DEFAULT_ALPN));
        assert!(params.proto.is_none());
    }

    #[test]
    fn test_server_proto_alone() {
        let mut f = fixture();
        let annotations = annotations_from([("server-proto", "h2")]);
        let (backend, _) = build(&mut f, &annotations, Mode::Http);
        assert_eq!(backend.default_server.unwrap().proto.as_deref(), Some("h2"));
    }

    #[test]
    fn test_server_ca_requires_verification() {
        let mut f = fixture();
        add_tls_secret(&mut f.store, "backend-ca");
        let annotations = annotations_from([("server-ca", "backend-ca")]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert!(errors.is_empty());
        let params = backend.default_server.unwrap();
        assert!(params.ssl);
        assert_eq!(params.verify.as_deref(), Some("required"));
        assert!(params
            .ssl_cafile
            .is_some_and(|f| f.ends_with("prod_backend-ca.pem")));
    }

    #[test]
    fn test_server_crt_missing_secret() {
        let mut f = fixture();
        let annotations = annotations_from([("server-crt", "prod/absent")]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert_eq!(errors.len(), 1);
        assert!(!backend.default_server.unwrap().ssl);
    }

    // ========================================================================
    // Backend custom resource
    // ========================================================================

    #[test]
    fn test_cr_backend_replaces_annotations() {
        let mut f = fixture();
        f.store.ensure_namespace("prod").crs.backends.insert(
            "sticky".to_string(),
            BackendCrSpec {
                balance: Some(CrBalance {
                    algorithm: "leastconn".to_string(),
                    params: None,
                }),
                cookie: Some(CrCookie {
                    name: "SRV".to_string(),
                    r#type: "insert".to_string(),
                    dynamic: true,
                    ..CrCookie::default()
                }),
                default_server: Some(CrDefaultServer {
                    check: true,
                    inter: Some("2s".to_string()),
                    ..CrDefaultServer::default()
                }),
                ..BackendCrSpec::default()
            },
        );
        let annotations = annotations_from([("cr-backend", "sticky"), ("load-balance", "source")]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);

        assert!(errors.is_empty());
        assert_eq!(backend.balance.unwrap().algorithm, "leastconn");
        assert_eq!(backend.dynamic_cookie_key.as_deref(), Some(DYNAMIC_COOKIE_KEY));
        assert_eq!(backend.default_server.unwrap().inter.as_deref(), Some("2s"));
    }

    #[test]
    fn test_unknown_cr_backend_falls_back() {
        let mut f = fixture();
        let annotations = annotations_from([("cr-backend", "prod/missing")]);
        let (backend, errors) = build(&mut f, &annotations, Mode::Http);
        assert_eq!(errors.len(), 1);
        assert_eq!(backend.balance.unwrap().algorithm, "roundrobin");
    }

    // ========================================================================
    // Parsers
    // ========================================================================

    #[test]
    fn test_send_proxy_values() {
        assert_eq!(send_proxy("proxy").unwrap(), "send-proxy");
        assert_eq!(send_proxy("PROXY-V2-SSL-CN").unwrap(), "send-proxy-v2-ssl-cn");
        assert!(send_proxy("v3").is_err());
    }

    #[test]
    fn test_check_http_forms() {
        assert_eq!(check_http("/hc").unwrap().method, None);
        let check = check_http("GET /hc HTTP/1.1").unwrap();
        assert_eq!(check.method.as_deref(), Some("GET"));
        assert_eq!(check.uri, "/hc HTTP/1.1");
        assert!(check_http("  ").is_err());
    }
}
