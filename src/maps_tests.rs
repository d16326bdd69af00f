// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for maps.rs

#[cfg(test)]
mod tests {
    use super::super::*;

    fn maps() -> (tempfile::TempDir, Maps) {
        let dir = tempfile::tempdir().unwrap();
        let maps = Maps::new(dir.path());
        (dir, maps)
    }

    #[test]
    fn test_routing_maps_written_on_first_refresh() {
        let (dir, mut maps) = maps();
        let mut errors = ErrorList::new();

        assert!(maps.refresh(&mut errors));
        assert!(errors.is_empty());
        for name in ROUTING_MAPS {
            let path = dir.path().join(format!("{name}.map"));
            assert_eq!(std::fs::read_to_string(path).unwrap(), "");
        }
    }

    #[test]
    fn test_unchanged_rows_do_not_reload() {
        let (_dir, mut maps) = maps();
        let mut errors = ErrorList::new();
        maps.append_row(MAP_HOST, "example.com example.com");
        assert!(maps.refresh(&mut errors));

        // Given the same rows on the next reconcile
        maps.clean();
        maps.append_row(MAP_HOST, "example.com example.com");

        // Then nothing is rewritten
        assert!(!maps.refresh(&mut errors));
    }

    #[test]
    fn test_changed_rows_rewrite_map() {
        let (dir, mut maps) = maps();
        let mut errors = ErrorList::new();
        maps.append_row(MAP_HOST, "a.com a.com");
        maps.refresh(&mut errors);

        maps.clean();
        maps.append_row(MAP_HOST, "b.com b.com");
        maps.append_row(MAP_HOST, "a.com a.com");

        assert!(maps.refresh(&mut errors));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("host.map")).unwrap(),
            "a.com a.com\nb.com b.com\n"
        );
    }

    #[test]
    fn test_prefix_map_orders_longest_key_first() {
        let (_dir, mut maps) = maps();
        maps.append_row(MAP_PATH_PREFIX, "example.com/ prod_svc_web_http");
        maps.append_row(MAP_PATH_PREFIX, "example.com/api/v1 prod_svc_v1_http");
        maps.append_row(MAP_PATH_PREFIX, "example.com/api prod_svc_api_http");

        assert_eq!(
            maps.rows(MAP_PATH_PREFIX),
            vec![
                "example.com/api/v1 prod_svc_v1_http".to_string(),
                "example.com/api prod_svc_api_http".to_string(),
                "example.com/ prod_svc_web_http".to_string(),
            ]
        );
    }

    #[test]
    fn test_map_exists_tracks_rows() {
        let (_dir, mut maps) = maps();
        assert!(!maps.map_exists(MAP_SNI));
        maps.append_row(MAP_SNI, "secure.com prod_svc_db_https");
        assert!(maps.map_exists(MAP_SNI));
        maps.clean();
        assert!(!maps.map_exists(MAP_SNI));
    }

    // ========================================================================
    // Pattern maps
    // ========================================================================

    #[test]
    fn test_pattern_map_named_after_content() {
        let (_dir, mut maps) = maps();
        let entries = vec!["10.0.0.0/8".to_string(), "192.168.1.1".to_string()];
        let first = maps.pattern_map("blacklist", &entries);
        let second = maps.pattern_map("blacklist", &entries);
        let other = maps.pattern_map("blacklist", &["172.16.0.0/12".to_string()]);

        assert_eq!(first, second);
        assert_ne!(first, other);
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("blacklist-"));
        assert!(name.ends_with(".map"));
    }

    #[test]
    fn test_unused_pattern_map_removed() {
        let (_dir, mut maps) = maps();
        let mut errors = ErrorList::new();
        let path = maps.pattern_map("whitelist", &["10.0.0.1".to_string()]);
        maps.refresh(&mut errors);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.0.0.1\n");

        // Next reconcile no longer references the list
        maps.clean();
        maps.refresh(&mut errors);

        assert!(!path.exists());
        assert!(maps.path(MAP_HOST).exists());
    }

    #[test]
    fn test_write_failure_still_requests_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut maps = Maps::new(dir.path().join("missing"));
        let mut errors = ErrorList::new();

        assert!(maps.refresh(&mut errors));
        assert_eq!(errors.len(), ROUTING_MAPS.len());

        // Failed maps are retried on the next refresh
        assert!(maps.refresh(&mut errors));
    }
}
