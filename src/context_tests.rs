// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for context.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::proxy::models::Mode;
    use crate::rules::Rule;

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ControllerConfig::with_root(dir.path()));
        let ctx = Context::new(config, ActionDecider::new());
        (dir, ctx)
    }

    #[test]
    fn test_new_context_is_first_run() {
        let (_dir, ctx) = context();
        assert!(ctx.first_run);
        assert!(!ctx.passthrough);
        assert!(ctx.active_backends.is_empty());
    }

    #[test]
    fn test_begin_reconcile_clears_collections() {
        let (_dir, mut ctx) = context();
        ctx.active_backends.insert("prod_svc_web_http".to_string());
        ctx.stick_tables
            .insert("RateLimit-1000".to_string(), Backend::new("RateLimit-1000", Mode::Http));
        ctx.custom_routes.insert(CustomRoute {
            backend: "prod_svc_web_http".to_string(),
            cond: "{ path -m beg /api }".to_string(),
        });
        ctx.rules.add(
            "http",
            Rule::ReqSetHost {
                host: "example.com".to_string(),
            },
            false,
        );
        ctx.maps.append_row("host", "example.com example.com");
        ctx.passthrough = true;
        ctx.default_backend = Some("default-local-service".to_string());
        assert!(ctx.claim_servers("prod_svc_web_http"));

        ctx.begin_reconcile();

        assert!(ctx.active_backends.is_empty());
        assert!(ctx.stick_tables.is_empty());
        assert!(ctx.custom_routes.is_empty());
        assert!(ctx.rules.entries("http").is_empty());
        assert!(!ctx.maps.map_exists("host"));
        assert!(!ctx.passthrough);
        assert!(ctx.default_backend.is_none());
        assert!(ctx.claim_servers("prod_svc_web_http"));
    }

    #[test]
    fn test_servers_claimed_once_per_reconcile() {
        let (_dir, mut ctx) = context();
        assert!(ctx.claim_servers("prod_svc_web_http"));
        assert!(!ctx.claim_servers("prod_svc_web_http"));
        assert!(ctx.claim_servers("prod_svc_api_http"));
    }

    #[test]
    fn test_end_reconcile_keeps_applied_userlists() {
        let (_dir, mut ctx) = context();
        ctx.applied_userlists.insert("prod-web".to_string());
        ctx.end_reconcile();
        ctx.begin_reconcile();
        assert!(!ctx.first_run);
        assert!(ctx.applied_userlists.contains("prod-web"));
    }
}
