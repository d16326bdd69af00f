// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/global.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::handlers::test_support::fixture;
    use crate::rules::Rule;

    // ========================================================================
    // Process sections
    // ========================================================================

    #[tokio::test]
    async fn test_first_run_pushes_sections_and_reloads() {
        let mut f = fixture();

        f.run(&mut GlobalCfg).await.unwrap();

        let tree = f.proxy.staged_tree();
        assert!(tree.global.master_worker);
        assert_eq!(tree.defaults.timeouts.get("client").map(String::as_str), Some("50s"));
        assert_eq!(tree.log_targets.len(), 1);
        assert!(f.ctx.action.need_restart());
    }

    #[tokio::test]
    async fn test_steady_state_needs_no_action() {
        let mut f = fixture();
        f.run(&mut GlobalCfg).await.unwrap();
        f.next_reconcile().await;

        f.run(&mut GlobalCfg).await.unwrap();

        assert!(!f.ctx.action.need_action());
    }

    #[tokio::test]
    async fn test_timeout_change_reloads_only() {
        let mut f = fixture();
        f.run(&mut GlobalCfg).await.unwrap();
        f.next_reconcile().await;

        f.set_main_configmap(&[("timeout-client", "10s")]);
        f.run(&mut GlobalCfg).await.unwrap();

        assert!(f.ctx.action.need_reload());
        assert!(!f.ctx.action.need_restart());
    }

    #[tokio::test]
    async fn test_syslog_change_restarts() {
        let mut f = fixture();
        f.run(&mut GlobalCfg).await.unwrap();
        f.next_reconcile().await;

        f.set_main_configmap(&[("syslog-server", "address:10.0.0.9, facility: local1")]);
        f.run(&mut GlobalCfg).await.unwrap();

        assert!(f.ctx.action.need_restart());
    }

    #[tokio::test]
    async fn test_errorfiles_survive_defaults_push() {
        let mut f = fixture();
        let mut defaults = f.proxy.defaults_get().unwrap();
        defaults.errorfiles.insert(503, "/etc/haproxy/errorfiles/503".to_string());
        f.proxy.defaults_push(defaults).unwrap();

        f.run(&mut GlobalCfg).await.unwrap();

        assert!(f.proxy.defaults_get().unwrap().errorfiles.contains_key(&503));
    }

    // ========================================================================
    // ConfigMap wide rules, snippets and certificate
    // ========================================================================

    #[tokio::test]
    async fn test_configmap_rules_apply_to_every_request() {
        let mut f = fixture();
        f.set_main_configmap(&[("request-set-header", "X-Env prod")]);

        f.run(&mut GlobalCfg).await.unwrap();

        for frontend in [FRONTEND_HTTP, FRONTEND_HTTPS] {
            let entries = f.ctx.rules.entries(frontend);
            assert_eq!(entries.len(), 1, "{frontend}");
            assert!(!entries[0].ingress_acl);
            assert!(matches!(entries[0].rule, Rule::ReqSetHeader { .. }));
        }
    }

    #[tokio::test]
    async fn test_invalid_value_is_reported_and_rest_applied() {
        let mut f = fixture();
        f.set_main_configmap(&[("timeout-server", "soon"), ("maxconn", "500")]);

        let result = f.run(&mut GlobalCfg).await;

        assert!(result.is_err());
        assert_eq!(f.proxy.staged_tree().global.maxconn, Some(500));
    }

    #[tokio::test]
    async fn test_default_certificate_from_configmap() {
        let mut f = fixture();
        f.add_tls_secret("default", "wildcard");
        f.set_main_configmap(&[("ssl-certificate", "default/wildcard")]);

        f.run(&mut GlobalCfg).await.unwrap();

        assert!(f.ctx.certs.front_certs_in_use());
        assert!(f
            .ctx
            .certs
            .frontend_dir()
            .join("0_default_wildcard.pem")
            .exists());
    }

    #[tokio::test]
    async fn test_missing_default_certificate_is_skipped() {
        let mut f = fixture();
        f.set_main_configmap(&[("ssl-certificate", "default/absent")]);

        f.run(&mut GlobalCfg).await.unwrap();

        assert!(!f.ctx.certs.front_certs_in_use());
    }
}
