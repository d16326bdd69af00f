// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/default_service.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::ObjectRef;
    use crate::handlers::test_support::{fixture, fixture_with};

    #[tokio::test]
    async fn test_local_service_by_default() {
        let mut f = fixture();

        f.run(&mut DefaultService).await.unwrap();

        let name = "default_svc_default-local-service_http";
        assert_eq!(f.ctx.default_backend.as_deref(), Some(name));
        let backend = &f.proxy.staged_tree().backends[name];
        assert!(backend
            .servers
            .iter()
            .any(|s| s.address == "127.0.0.1" && s.port == Some(6061)));
        assert!(f.store.get_service("default", DEFAULT_LOCAL_BACKEND).unwrap().faked);
    }

    #[tokio::test]
    async fn test_configured_service() {
        let mut f = fixture_with(|c| {
            c.default_backend_service = Some(ObjectRef {
                namespace: "web".to_string(),
                name: "fallback".to_string(),
            });
        });
        f.add_service("web", "fallback", 80);

        f.run(&mut DefaultService).await.unwrap();

        assert_eq!(
            f.ctx.default_backend.as_deref(),
            Some("web_svc_fallback_http")
        );
        assert!(f.store.get_service("default", DEFAULT_LOCAL_BACKEND).is_err());
    }

    #[tokio::test]
    async fn test_missing_configured_service_falls_back_to_local() {
        let mut f = fixture_with(|c| {
            c.default_backend_service = Some(ObjectRef {
                namespace: "web".to_string(),
                name: "absent".to_string(),
            });
        });

        let result = f.run(&mut DefaultService).await;

        assert!(result.unwrap_err().is_not_found());
        let name = "default_svc_default-local-service_http";
        assert_eq!(f.ctx.default_backend.as_deref(), Some(name));
        assert!(f.proxy.staged_tree().backends.contains_key(name));
    }
}
