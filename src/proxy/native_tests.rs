// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for proxy/native.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::proxy::models::{Directive, Mode};
    use crate::proxy::runtime::RecordingRuntime;

    fn proxy_in(dir: &tempfile::TempDir, runtime: Option<Arc<RecordingRuntime>>) -> NativeProxy {
        let runtime = runtime.map(|r| r as Arc<dyn RuntimeApi>);
        NativeProxy::new(dir.path().join("haproxy.cfg"), runtime)
    }

    fn server(name: &str, address: &str, port: u16) -> Server {
        Server {
            name: name.to_string(),
            address: address.to_string(),
            port: Some(port),
            ..Server::default()
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    #[tokio::test]
    async fn test_calls_require_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        let err = proxy
            .backend_create(Backend::new("b", Mode::Http))
            .unwrap_err();
        assert_eq!(err, ProxyError::NoTransaction);
        assert!(matches!(
            proxy.commit_transaction().await,
            Err(ProxyError::NoTransaction)
        ));
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        assert!(matches!(
            proxy.start_transaction(),
            Err(ProxyError::TransactionInProgress { version: 0 })
        ));
    }

    #[tokio::test]
    async fn test_commit_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);

        // Given: a first commit creating a backend
        proxy.start_transaction().unwrap();
        proxy.backend_create(Backend::new("b", Mode::Http)).unwrap();
        let outcome = proxy.commit_transaction().await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.version, 1);
        let content = std::fs::read_to_string(proxy.main_cfg()).unwrap();
        assert!(content.contains("backend b\n"));

        // When: the same state is committed again
        proxy.start_transaction().unwrap();
        let outcome = proxy.commit_transaction().await.unwrap();

        // Then: nothing is written and the version stays
        assert!(!outcome.written);
        assert_eq!(outcome.version, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy.backend_create(Backend::new("b", Mode::Http)).unwrap();
        assert_eq!(proxy.backends().unwrap(), vec!["b".to_string()]);
        proxy.rollback_transaction();
        assert!(proxy.backends().unwrap().is_empty());
        assert_eq!(proxy.version(), 0);
    }

    // ========================================================================
    // Sections
    // ========================================================================

    #[test]
    fn test_create_twice_is_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy.backend_create(Backend::new("b", Mode::Http)).unwrap();
        assert!(proxy
            .backend_create(Backend::new("b", Mode::Http))
            .unwrap_err()
            .is_already_exists());
        assert!(proxy.frontend_delete("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_backend_edit_keeps_servers() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy.backend_create(Backend::new("b", Mode::Http)).unwrap();
        proxy
            .backend_server_create("b", server("SRV_1", "10.0.0.1", 80))
            .unwrap();

        assert!(!proxy.backend_edit(Backend::new("b", Mode::Http)).unwrap());
        let mut edited = Backend::new("b", Mode::Http);
        edited.forwardfor = true;
        assert!(proxy.backend_edit(edited).unwrap());

        let backend = proxy.backend_get("b").unwrap();
        assert!(backend.forwardfor);
        assert_eq!(backend.servers.len(), 1);
    }

    #[test]
    fn test_frontend_edit_keeps_binds_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy
            .frontend_create(Frontend {
                name: "http".to_string(),
                ..Frontend::default()
            })
            .unwrap();
        proxy
            .frontend_bind_create(
                "http",
                Bind {
                    name: "v4".to_string(),
                    address: "0.0.0.0".to_string(),
                    port: Some(8080),
                    ..Bind::default()
                },
            )
            .unwrap();
        proxy
            .frontend_rules_replace(
                "http",
                vec![ProxyRule::new(Directive::HttpRequest, "set-var(txn.base) base")],
            )
            .unwrap();

        let changed = proxy
            .frontend_edit(Frontend {
                name: "http".to_string(),
                maxconn: Some(100),
                ..Frontend::default()
            })
            .unwrap();
        assert!(changed);
        let frontend = proxy.frontend_get("http").unwrap();
        assert_eq!(frontend.maxconn, Some(100));
        assert_eq!(frontend.binds.len(), 1);
        assert_eq!(frontend.rules.len(), 1);
    }

    #[test]
    fn test_ssl_offload_skips_quic_binds() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy
            .frontend_create(Frontend {
                name: "https".to_string(),
                ..Frontend::default()
            })
            .unwrap();
        for (name, address, alpn) in [
            ("v4", "0.0.0.0", None),
            ("unixsock", "unix@/run/ssl.sock", None),
            ("quicv4", "quic4@0.0.0.0", Some("h3")),
        ] {
            proxy
                .frontend_bind_create(
                    "https",
                    Bind {
                        name: name.to_string(),
                        address: address.to_string(),
                        ssl: alpn.is_some(),
                        alpn: alpn.map(str::to_string),
                        ..Bind::default()
                    },
                )
                .unwrap();
        }
        assert!(!proxy.frontend_ssl_offload_enabled("https").unwrap());

        assert!(proxy
            .frontend_ssl_offload_enable("https", "/certs/frontend", Some("h2,http/1.1"), false)
            .unwrap());
        assert!(!proxy
            .frontend_ssl_offload_enable("https", "/certs/frontend", Some("h2,http/1.1"), false)
            .unwrap());
        let frontend = proxy.frontend_get("https").unwrap();
        assert!(frontend.binds["v4"].ssl);
        assert!(frontend.binds["unixsock"].ssl);
        assert_eq!(frontend.binds["quicv4"].alpn.as_deref(), Some("h3"));
        assert!(proxy.frontend_ssl_offload_enabled("https").unwrap());

        assert!(proxy.frontend_ssl_offload_disable("https").unwrap());
        assert!(!proxy.frontend_ssl_offload_enabled("https").unwrap());
        assert!(proxy.frontend_get("https").unwrap().binds["quicv4"].ssl);
    }

    #[test]
    fn test_journal_records_changes_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        proxy.defaults_push(Defaults::default()).unwrap();
        assert!(proxy.journal().is_empty());
        proxy
            .snippet_set(&SnippetTarget::Global, vec!["tune.ssl.default-dh-param 2048".to_string()])
            .unwrap();
        assert_eq!(proxy.take_journal(), vec!["snippet_set global".to_string()]);
        assert!(proxy.journal().is_empty());
    }

    #[test]
    fn test_userlists() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        proxy.start_transaction().unwrap();
        let userlist = Userlist {
            name: "default-web".to_string(),
            users: Vec::new(),
        };
        assert!(proxy.userlist_replace(userlist.clone()).unwrap());
        assert!(!proxy.userlist_replace(userlist).unwrap());
        assert!(proxy.userlist_exists("default-web").unwrap());
        proxy.userlist_delete("default-web").unwrap();
        assert!(!proxy.userlist_exists("default-web").unwrap());
    }

    // ========================================================================
    // Server updates
    // ========================================================================

    async fn proxy_with_server(
        dir: &tempfile::TempDir,
        runtime: Option<Arc<RecordingRuntime>>,
    ) -> NativeProxy {
        let mut proxy = proxy_in(dir, runtime);
        proxy.start_transaction().unwrap();
        proxy.backend_create(Backend::new("b", Mode::Http)).unwrap();
        proxy
            .backend_server_create("b", server("SRV_1", "10.0.0.1", 8080))
            .unwrap();
        proxy.commit_transaction().await.unwrap();
        proxy
    }

    #[tokio::test]
    async fn test_server_edit_live_when_runtime_compatible() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::new());
        let mut proxy = proxy_with_server(&dir, Some(runtime.clone())).await;

        proxy.start_transaction().unwrap();
        let update = proxy
            .backend_server_edit("b", server("SRV_1", "10.0.0.2", 8080))
            .unwrap();
        assert_eq!(update, ServerUpdate::Live);
        assert!(runtime.commands().is_empty());

        let outcome = proxy.commit_transaction().await.unwrap();
        assert!(outcome.runtime_failures.is_empty());
        assert_eq!(
            runtime.commands(),
            vec!["set server b/SRV_1 addr 10.0.0.2 port 8080".to_string()]
        );
    }

    #[tokio::test]
    async fn test_server_edit_unchanged_and_structural() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::new());
        let mut proxy = proxy_with_server(&dir, Some(runtime)).await;

        proxy.start_transaction().unwrap();
        assert_eq!(
            proxy
                .backend_server_edit("b", server("SRV_1", "10.0.0.1", 8080))
                .unwrap(),
            ServerUpdate::Unchanged
        );
        let mut weighted = server("SRV_1", "10.0.0.1", 8080);
        weighted.params.weight = Some(10);
        assert_eq!(
            proxy.backend_server_edit("b", weighted).unwrap(),
            ServerUpdate::NeedsReload
        );
    }

    #[tokio::test]
    async fn test_server_edit_without_runtime_needs_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_with_server(&dir, None).await;
        proxy.start_transaction().unwrap();
        let mut disabled = server("SRV_1", "10.0.0.1", 8080);
        disabled.maintenance = true;
        assert_eq!(
            proxy.backend_server_edit("b", disabled).unwrap(),
            ServerUpdate::NeedsReload
        );
    }

    #[tokio::test]
    async fn test_runtime_failures_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.fail_on("set server");
        let mut proxy = proxy_with_server(&dir, Some(runtime)).await;

        proxy.start_transaction().unwrap();
        let mut disabled = server("SRV_1", "10.0.0.1", 8080);
        disabled.maintenance = true;
        proxy.backend_server_edit("b", disabled).unwrap();
        let outcome = proxy.commit_transaction().await.unwrap();
        assert_eq!(
            outcome.runtime_failures,
            vec!["set server b/SRV_1 state maint".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cert_entries_need_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let mut proxy = proxy_in(&dir, None);
        assert!(!proxy.runtime_available());
        assert_eq!(
            proxy.cert_entry_create("/c/a.pem").await.unwrap_err(),
            ProxyError::RuntimeUnavailable
        );

        let runtime = Arc::new(RecordingRuntime::new());
        let mut proxy = proxy_in(&dir, Some(runtime.clone()));
        proxy.cert_entry_create("/c/a.pem").await.unwrap();
        proxy.cert_entry_commit("/c/a.pem").await.unwrap();
        assert_eq!(
            runtime.commands(),
            vec![
                "new ssl cert /c/a.pem".to_string(),
                "commit ssl cert /c/a.pem".to_string()
            ]
        );
    }
}
