// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/refresh.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::constants::MAP_HOST;
    use crate::context::CustomRoute;
    use crate::handlers::http_bind::HttpBind;
    use crate::handlers::test_support::{fixture, Fixture};
    use crate::proxy::models::{Backend, User, Userlist};

    async fn prepared() -> Fixture {
        let mut f = fixture();
        f.run(&mut HttpBind).await.unwrap();
        f
    }

    fn rule_lines(f: &Fixture, frontend: &str) -> Vec<String> {
        f.proxy.staged_tree().frontends[frontend]
            .rules
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    // ========================================================================
    // Rules
    // ========================================================================

    #[tokio::test]
    async fn test_routing_rules_on_web_frontends() {
        let mut f = prepared().await;

        f.run(&mut Refresh).await.unwrap();

        let http = rule_lines(&f, FRONTEND_HTTP);
        assert!(http[0].starts_with("http-request set-var(txn.base) base"));
        assert_eq!(
            http.last().unwrap(),
            "use_backend %[var(txn.path_match),field(1,.)] if { var(txn.path_match) -m found }"
        );
        assert!(!http.iter().any(|l| l.contains("X-Forwarded-Proto")));

        let https = rule_lines(&f, FRONTEND_HTTPS);
        assert!(https.contains(&"http-request set-header X-Forwarded-Proto https".to_string()));
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_collected_rules_rendered_with_scope() {
        let mut f = prepared().await;
        let header = Rule::ReqSetHeader {
            name: "X-Team".to_string(),
            value: "blue".to_string(),
        };
        let id = f.ctx.rules.add(FRONTEND_HTTP, header, true);
        f.ctx.custom_routes.insert(CustomRoute {
            backend: "web_svc_api_http".to_string(),
            cond: "{ path -m beg /api } { src 10.0.0.0/8 }".to_string(),
        });

        f.run(&mut Refresh).await.unwrap();

        let http = rule_lines(&f, FRONTEND_HTTP);
        assert!(http.contains(&format!(
            "http-request set-header X-Team blue if {{ var(txn.path_match) -m dom {id} }}"
        )));
        let custom = http
            .iter()
            .position(|l| l.starts_with("use_backend web_svc_api_http if"))
            .unwrap();
        assert_eq!(custom, http.len() - 2);
    }

    #[tokio::test]
    async fn test_passthrough_rules_on_ssl_frontend() {
        let mut f = prepared().await;
        f.proxy
            .frontend_create(Frontend {
                name: FRONTEND_SSL.to_string(),
                mode: Mode::Tcp,
                ..Frontend::default()
            })
            .unwrap();
        f.ctx.passthrough = true;
        f.set_main_configmap(&[("timeout-client", "30s")]);

        f.run(&mut Refresh).await.unwrap();

        let ssl = rule_lines(&f, FRONTEND_SSL);
        assert_eq!(ssl[0], "tcp-request content accept if { req_ssl_hello_type 1 }");
        assert_eq!(ssl[1], "tcp-request inspect-delay 30000");
        assert!(ssl.last().unwrap().contains("var(txn.sni_match)"));
    }

    #[tokio::test]
    async fn test_invalid_timeout_uses_default_delay() {
        let mut f = prepared().await;
        f.proxy
            .frontend_create(Frontend {
                name: FRONTEND_SSL.to_string(),
                mode: Mode::Tcp,
                ..Frontend::default()
            })
            .unwrap();
        f.ctx.passthrough = true;
        f.set_main_configmap(&[("timeout-client", "soon")]);

        assert!(f.run(&mut Refresh).await.is_err());

        let ssl = rule_lines(&f, FRONTEND_SSL);
        assert_eq!(ssl[1], format!("tcp-request inspect-delay {DEFAULT_INSPECT_DELAY_MS}"));
    }

    // ========================================================================
    // Default backend, backends and maps
    // ========================================================================

    #[tokio::test]
    async fn test_default_backend_applied() {
        let mut f = prepared().await;
        f.ctx.default_backend = Some("default_svc_default-local-service_http".to_string());

        f.run(&mut Refresh).await.unwrap();

        let tree = f.proxy.staged_tree();
        for name in [FRONTEND_HTTP, FRONTEND_HTTPS] {
            assert_eq!(
                tree.frontends[name].default_backend.as_deref(),
                Some("default_svc_default-local-service_http")
            );
        }
    }

    #[tokio::test]
    async fn test_unclaimed_backends_deleted() {
        let mut f = prepared().await;
        f.proxy.backend_create(Backend::new("kept", Mode::Http)).unwrap();
        f.proxy.backend_create(Backend::new("stale", Mode::Http)).unwrap();
        f.ctx.active_backends.insert("kept".to_string());

        f.run(&mut Refresh).await.unwrap();

        let tree = f.proxy.staged_tree();
        assert!(tree.backends.contains_key("kept"));
        assert!(!tree.backends.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_stick_tables_created() {
        let mut f = prepared().await;
        let table = Backend::new("RateLimit-10000", Mode::Tcp);
        f.ctx.active_backends.insert(table.name.clone());
        f.ctx.stick_tables.insert(table.name.clone(), table);

        f.run(&mut Refresh).await.unwrap();

        assert!(f.proxy.staged_tree().backends.contains_key("RateLimit-10000"));
    }

    #[tokio::test]
    async fn test_map_rows_written() {
        let mut f = prepared().await;
        f.ctx.maps.append_row(MAP_HOST, "example.com example.com");

        f.run(&mut Refresh).await.unwrap();

        let content = std::fs::read_to_string(f.ctx.maps.path(MAP_HOST)).unwrap();
        assert_eq!(content, "example.com example.com\n");
    }

    // ========================================================================
    // Userlists
    // ========================================================================

    #[tokio::test]
    async fn test_userlists_pushed_then_removed() {
        let mut f = prepared().await;
        f.ctx.userlists.insert(
            "web-auth".to_string(),
            Userlist {
                name: "web-auth".to_string(),
                users: vec![User {
                    name: "admin".to_string(),
                    password: "$5$hash".to_string(),
                    secure: true,
                }],
            },
        );
        f.run(&mut Refresh).await.unwrap();
        assert!(f.proxy.userlist_exists("web-auth").unwrap());
        f.next_reconcile().await;

        f.run(&mut HttpBind).await.unwrap();
        f.run(&mut Refresh).await.unwrap();

        assert!(!f.proxy.userlist_exists("web-auth").unwrap());
        assert!(f.ctx.applied_userlists.is_empty());
        assert!(f.ctx.action.need_reload());
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    #[tokio::test]
    async fn test_steady_state_needs_no_action() {
        let mut f = prepared().await;
        f.ctx.maps.append_row(MAP_HOST, "example.com example.com");
        f.run(&mut Refresh).await.unwrap();
        f.next_reconcile().await;

        f.run(&mut HttpBind).await.unwrap();
        f.ctx.maps.append_row(MAP_HOST, "example.com example.com");
        f.run(&mut Refresh).await.unwrap();

        assert!(!f.ctx.action.need_action());
    }
}
