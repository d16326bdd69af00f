// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for annotations/frontend.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::AnnotationDefaults;
    use crate::config::ControllerConfig;
    use crate::store::{annotations_from, K8sStore, Secret, Status};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: K8sStore,
        maps: Maps,
        patterns_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::with_root(dir.path());
        Fixture {
            store: K8sStore::new(&config, Arc::new(AnnotationDefaults::builtin())),
            maps: Maps::new(&config.paths.maps_dir),
            patterns_dir: config.paths.patterns_dir.clone(),
            _dir: dir,
        }
    }

    fn ingress_rules(
        f: &mut Fixture,
        own: &Annotations,
        configmap: &Annotations,
        tls: bool,
    ) -> (FrontendRules, ErrorList) {
        let sources = [own, configmap];
        let set = AnnotationSet::new(&f.store, &sources);
        let owner = RuleOwner {
            namespace: "prod",
            ingress: Some("web-ing"),
            own,
            tls,
            passthrough: false,
        };
        let mut errors = ErrorList::new();
        let rules = frontend_rules(owner, set, &mut f.maps, &f.patterns_dir, &mut errors);
        (rules, errors)
    }

    // ========================================================================
    // SSL redirect
    // ========================================================================

    #[test]
    fn test_tls_ingress_redirects_by_default() {
        let mut f = fixture();
        let (rules, errors) = ingress_rules(&mut f, &Annotations::new(), &Annotations::new(), true);

        assert!(errors.is_empty());
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.rules[0].frontends, vec![FRONTEND_HTTP]);
        assert_eq!(
            rules.rules[0].rule,
            Rule::ReqRedirect {
                redirect: Redirect::Scheme { port: 8443 },
                code: 302
            }
        );
    }

    #[test]
    fn test_configmap_disables_tls_redirect() {
        let mut f = fixture();
        let configmap = annotations_from([("ssl-redirect", "false")]);
        let (rules, _) = ingress_rules(&mut f, &Annotations::new(), &configmap, true);
        assert!(rules.rules.is_empty());
    }

    #[test]
    fn test_plain_ingress_has_no_rules() {
        let mut f = fixture();
        let (rules, errors) = ingress_rules(&mut f, &Annotations::new(), &Annotations::new(), false);
        assert!(errors.is_empty());
        assert_eq!(rules, FrontendRules::default());
    }

    #[test]
    fn test_invalid_redirect_code() {
        let mut f = fixture();
        let own = annotations_from([("ssl-redirect", "true"), ("ssl-redirect-code", "200")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert!(rules.rules.is_empty());
        assert_eq!(errors.len(), 1);
    }

    // ========================================================================
    // Source lists
    // ========================================================================

    #[test]
    fn test_deny_list_written_to_pattern_map() {
        let mut f = fixture();
        let own = annotations_from([("deny-list", "10.0.0.0/8, 192.168.1.7")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);

        assert!(errors.is_empty());
        let Rule::ReqDeny {
            src_map,
            allow_list,
        } = &rules.rules[0].rule
        else {
            panic!("expected a deny rule, got {:?}", rules.rules[0].rule);
        };
        assert!(!allow_list);
        assert!(src_map.contains("/maps/blacklist-"));
        let name = PathBuf::from(src_map)
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert_eq!(
            f.maps.rows(&name),
            vec!["10.0.0.0/8".to_string(), "192.168.1.7".to_string()]
        );
    }

    #[test]
    fn test_allow_list_pattern_file_reference() {
        let mut f = fixture();
        let own = annotations_from([("whitelist", "patterns/office")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert!(errors.is_empty());
        assert_eq!(
            rules.rules[0].rule,
            Rule::ReqDeny {
                src_map: f.patterns_dir.join("office").display().to_string(),
                allow_list: true,
            }
        );
    }

    #[test]
    fn test_invalid_source_rejected() {
        let mut f = fixture();
        let own = annotations_from([("deny-list", "10.0.0.1, not-an-ip")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert!(rules.rules.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_is_source() {
        assert!(is_source("10.1.2.3"));
        assert!(is_source("10.0.0.0/8"));
        assert!(is_source("2001:db8::/32"));
        assert!(!is_source("10.0.0.0/33"));
        assert!(!is_source("example.com"));
    }

    // ========================================================================
    // Rate limiting
    // ========================================================================

    #[test]
    fn test_rate_limit_registers_stick_table() {
        let mut f = fixture();
        let own = annotations_from([
            ("rate-limit-requests", "20"),
            ("rate-limit-period", "10s"),
        ]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);

        assert!(errors.is_empty());
        assert_eq!(
            rules.rules[0].rule,
            Rule::ReqRateLimit {
                table: "RateLimit-10000".to_string(),
                requests: 20,
                status_code: 403,
                whitelist_map: None,
            }
        );
        let table = rules.stick_table.unwrap();
        assert_eq!(table.name, "RateLimit-10000");
        let stick = table.stick_table.unwrap();
        assert_eq!(stick.size, "100k");
        assert_eq!(stick.store.as_deref(), Some("http_req_rate(10s)"));
    }

    #[test]
    fn test_rate_limit_refinement_requires_requests() {
        let mut f = fixture();
        let own = annotations_from([("rate-limit-status-code", "429")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert!(rules.stick_table.is_none());
        assert_eq!(errors.len(), 1);
    }

    // ========================================================================
    // Basic auth
    // ========================================================================

    #[test]
    fn test_basic_auth_builds_userlist() {
        let mut f = fixture();
        f.store.ensure_namespace("prod").secrets.insert(
            "users".to_string(),
            Secret {
                namespace: "prod".to_string(),
                name: "users".to_string(),
                data: [
                    ("alice".to_string(), b"$5$hash\n".to_vec()),
                    ("bob".to_string(), Vec::new()),
                ]
                .into_iter()
                .collect(),
                status: Status::Added,
            },
        );
        let own = annotations_from([("auth-type", "basic-auth"), ("auth-secret", "users")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);

        assert!(errors.is_empty());
        assert_eq!(
            rules.rules[0].rule,
            Rule::ReqAuth {
                userlist: "prod-web-ing".to_string(),
                realm: "Protected-Content".to_string(),
            }
        );
        let userlist = rules.userlist.unwrap();
        assert_eq!(userlist.users.len(), 1);
        assert_eq!(userlist.users[0].password, "$5$hash");
    }

    #[test]
    fn test_basic_auth_errors() {
        let mut f = fixture();
        let own = annotations_from([("auth-type", "digest")]);
        let (_, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert_eq!(errors.len(), 1);

        let own = annotations_from([("auth-type", "basic-auth"), ("auth-secret", "missing")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert_eq!(errors.len(), 1);
        assert!(rules.userlist.is_none());
    }

    // ========================================================================
    // Headers, rewrites and CORS
    // ========================================================================

    #[test]
    fn test_header_and_rewrite_rules() {
        let mut f = fixture();
        let own = annotations_from([
            ("request-set-header", "X-Env prod\nX-Team  web team"),
            ("response-set-header", "Cache-Control no-store"),
            ("path-rewrite", "^/api/(.*) /\\1"),
            ("set-host", "internal.example.com"),
        ]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);

        assert!(errors.is_empty());
        let kinds: Vec<&Rule> = rules.rules.iter().map(|r| &r.rule).collect();
        assert!(kinds.contains(&&Rule::ReqSetHeader {
            name: "X-Team".to_string(),
            value: "web team".to_string(),
        }));
        assert!(kinds.contains(&&Rule::ResSetHeader {
            name: "Cache-Control".to_string(),
            value: "no-store".to_string(),
        }));
        assert!(kinds.contains(&&Rule::ReqPathRewrite {
            pattern: Some("^/api/(.*)".to_string()),
            replacement: "/\\1".to_string(),
        }));
        assert!(rules
            .rules
            .iter()
            .all(|r| r.frontends == vec![FRONTEND_HTTP, FRONTEND_HTTPS]));
    }

    #[test]
    fn test_cors_uses_defaults() {
        let mut f = fixture();
        let own = annotations_from([("cors-enable", "true"), ("cors-allow-credentials", "true")]);
        let (rules, errors) = ingress_rules(&mut f, &own, &Annotations::new(), false);
        assert!(errors.is_empty());
        assert_eq!(
            rules.rules[0].rule,
            Rule::ResSetCors {
                origin: "*".to_string(),
                methods: "*".to_string(),
                headers: "*".to_string(),
                max_age_secs: 5,
                credentials: true,
            }
        );
    }

    #[test]
    fn test_configmap_owner_triggers_on_its_own_annotations() {
        let mut f = fixture();
        let configmap = annotations_from([("request-capture", "hdr(User-Agent)")]);
        let sources = [&configmap];
        let set = AnnotationSet::new(&f.store, &sources);
        let owner = RuleOwner {
            namespace: "default",
            ingress: None,
            own: &configmap,
            tls: true,
            passthrough: true,
        };
        let mut errors = ErrorList::new();
        let rules = frontend_rules(owner, set, &mut f.maps, &f.patterns_dir, &mut errors);

        // No TLS auto-redirect for the ConfigMap, capture reaches the passthrough frontend
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(
            rules.rules[0].frontends,
            vec![FRONTEND_HTTP, FRONTEND_HTTPS, FRONTEND_SSL]
        );
        assert_eq!(
            rules.rules[0].rule,
            Rule::ReqCapture {
                expression: "hdr(User-Agent)".to_string(),
                len: 128,
            }
        );
    }
}
