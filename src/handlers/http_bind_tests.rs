// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/http_bind.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::handlers::test_support::{fixture, fixture_with};

    #[tokio::test]
    async fn test_creates_web_and_stats_frontends() {
        let mut f = fixture();

        f.run(&mut HttpBind).await.unwrap();

        let tree = f.proxy.staged_tree();
        let http = &tree.frontends[FRONTEND_HTTP];
        assert_eq!(http.binds[BIND_IPV4].port, Some(8080));
        assert_eq!(http.binds[BIND_IPV6].address, "::");
        assert!(!http.binds[BIND_IPV6].v4v6);
        assert!(tree.frontends[FRONTEND_HTTPS].binds.is_empty());
        let stats = &tree.frontends[FRONTEND_STATS];
        assert_eq!(stats.binds[BIND_IPV4].port, Some(STATS_PORT));
        assert_eq!(
            stats.rules[0].to_string(),
            "http-request use-service prometheus-exporter if { path /metrics }"
        );
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let mut f = fixture();
        f.run(&mut HttpBind).await.unwrap();
        f.next_reconcile().await;

        f.run(&mut HttpBind).await.unwrap();

        assert!(!f.ctx.action.need_action());
    }

    #[tokio::test]
    async fn test_disabled_family_and_frontend() {
        let mut f = fixture_with(|c| {
            c.ipv6 = false;
            c.https = false;
        });

        f.run(&mut HttpBind).await.unwrap();

        let tree = f.proxy.staged_tree();
        assert!(!tree.frontends.contains_key(FRONTEND_HTTPS));
        assert!(!tree.frontends[FRONTEND_HTTP].binds.contains_key(BIND_IPV6));
        assert!(!tree.frontends[FRONTEND_STATS].binds.contains_key(BIND_IPV6));
    }

    #[tokio::test]
    async fn test_port_change_edits_bind() {
        let mut f = fixture();
        f.run(&mut HttpBind).await.unwrap();
        f.next_reconcile().await;
        let mut config = (*f.ctx.config).clone();
        config.http_port = 80;
        f.ctx.config = std::sync::Arc::new(config);

        f.run(&mut HttpBind).await.unwrap();

        let http = &f.proxy.staged_tree().frontends[FRONTEND_HTTP];
        assert_eq!(http.binds[BIND_IPV4].port, Some(80));
        assert!(f.ctx.action.need_reload());
    }
}
