// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/https.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::handlers::http_bind::HttpBind;
    use crate::handlers::test_support::{fixture, Fixture};

    async fn prepared() -> Fixture {
        let mut f = fixture();
        f.run(&mut HttpBind).await.unwrap();
        f.add_tls_secret("default", "site");
        f
    }

    fn use_site_cert(f: &mut Fixture) {
        let secret = f.store.get_secret("default", "site").unwrap();
        f.ctx
            .certs
            .add_secret(secret, SecretType::FrontendCert)
            .unwrap();
    }

    // ========================================================================
    // Offload
    // ========================================================================

    #[tokio::test]
    async fn test_plain_binds_without_certificates() {
        let mut f = prepared().await;

        f.run(&mut Https).await.unwrap();

        let https = &f.proxy.staged_tree().frontends[FRONTEND_HTTPS];
        assert_eq!(https.binds[BIND_IPV4].port, Some(8443));
        assert!(https.binds[BIND_IPV6].v4v6);
        assert!(https.binds.values().all(|b| !b.ssl));
    }

    #[tokio::test]
    async fn test_offload_follows_certificates() {
        let mut f = prepared().await;
        use_site_cert(&mut f);

        f.run(&mut Https).await.unwrap();

        let https = &f.proxy.staged_tree().frontends[FRONTEND_HTTPS];
        let bind = &https.binds[BIND_IPV4];
        assert!(bind.ssl);
        assert_eq!(bind.alpn.as_deref(), Some("h2,http/1.1"));
        assert_eq!(
            bind.ssl_certificate.as_deref(),
            Some(f.ctx.certs.frontend_dir().display().to_string().as_str())
        );
        assert!(f.ctx.action.need_reload());

        f.next_reconcile().await;
        f.run(&mut Https).await.unwrap();

        assert!(!f.proxy.staged_tree().frontends[FRONTEND_HTTPS].binds[BIND_IPV4].ssl);
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_steady_state_needs_no_action() {
        let mut f = prepared().await;
        use_site_cert(&mut f);
        f.run(&mut Https).await.unwrap();
        f.next_reconcile().await;

        use_site_cert(&mut f);
        f.run(&mut Https).await.unwrap();

        assert!(!f.ctx.action.need_action());
    }

    #[tokio::test]
    async fn test_client_ca_sets_verification() {
        let mut f = prepared().await;
        f.add_tls_secret("default", "client-ca");
        f.set_main_configmap(&[("client-ca", "default/client-ca")]);
        use_site_cert(&mut f);

        f.run(&mut Https).await.unwrap();

        let bind = &f.proxy.staged_tree().frontends[FRONTEND_HTTPS].binds[BIND_IPV4];
        assert!(bind.ca_file.as_deref().is_some_and(|p| p.ends_with(".pem")));
        assert_eq!(bind.verify.as_deref(), Some("required"));

        f.next_reconcile().await;
        f.set_main_configmap(&[
            ("client-ca", "default/client-ca"),
            ("client-crt-optional", "true"),
        ]);
        use_site_cert(&mut f);
        f.run(&mut Https).await.unwrap();

        let bind = &f.proxy.staged_tree().frontends[FRONTEND_HTTPS].binds[BIND_IPV4];
        assert_eq!(bind.verify.as_deref(), Some("optional"));
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_missing_client_ca_disables_verification() {
        let mut f = prepared().await;
        f.set_main_configmap(&[("client-ca", "default/absent")]);
        use_site_cert(&mut f);

        f.run(&mut Https).await.unwrap();

        let bind = &f.proxy.staged_tree().frontends[FRONTEND_HTTPS].binds[BIND_IPV4];
        assert!(bind.ca_file.is_none());
        assert!(bind.verify.is_none());
    }

    // ========================================================================
    // SSL passthrough
    // ========================================================================

    #[tokio::test]
    async fn test_passthrough_chains_through_unix_socket() {
        let mut f = prepared().await;
        use_site_cert(&mut f);
        f.ctx.passthrough = true;

        f.run(&mut Https).await.unwrap();

        let tree = f.proxy.staged_tree();
        let https = &tree.frontends[FRONTEND_HTTPS];
        assert_eq!(https.binds.len(), 1);
        let socket = &https.binds[BIND_UNIX_SOCKET];
        assert!(socket.accept_proxy);
        assert!(socket.ssl);
        assert!(socket.address.ends_with("run/ssl-frontend.sock"));

        let ssl = &tree.frontends[FRONTEND_SSL];
        assert_eq!(ssl.mode, Mode::Tcp);
        assert_eq!(ssl.default_backend.as_deref(), Some(BACKEND_SSL));
        assert_eq!(ssl.binds[BIND_IPV4].port, Some(8443));
        assert!(!ssl.binds[BIND_IPV4].ssl);

        let server = &tree.backends[BACKEND_SSL].servers[0];
        assert_eq!(server.address, socket.address);
        assert_eq!(server.params.send_proxy.as_deref(), Some("send-proxy-v2"));
        assert!(f.ctx.active_backends.contains(BACKEND_SSL));
    }

    #[tokio::test]
    async fn test_passthrough_removed() {
        let mut f = prepared().await;
        f.ctx.passthrough = true;
        f.run(&mut Https).await.unwrap();
        f.next_reconcile().await;

        f.run(&mut Https).await.unwrap();

        let tree = f.proxy.staged_tree();
        assert!(!tree.frontends.contains_key(FRONTEND_SSL));
        let https = &tree.frontends[FRONTEND_HTTPS];
        assert!(!https.binds.contains_key(BIND_UNIX_SOCKET));
        assert!(https.binds.contains_key(BIND_IPV4));
        assert!(!f.ctx.active_backends.contains(BACKEND_SSL));
        assert!(f.ctx.action.need_reload());
    }
}
