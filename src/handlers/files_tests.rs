// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for handlers/files.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::handlers::test_support::fixture;
    use crate::store::annotations_from;

    const PAGE_503: &str = "HTTP/1.1 503 Service Unavailable\r\n\r\nbusy\n";

    // ========================================================================
    // Error files
    // ========================================================================

    #[tokio::test]
    async fn test_error_pages_written_and_set_on_defaults() {
        let mut f = fixture();
        f.store.config_maps.errorfiles.annotations = annotations_from([("503", PAGE_503)]);

        f.run(&mut ErrorFiles).await.unwrap();

        let path = f.ctx.config.paths.errorfiles_dir.join("503");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), PAGE_503);
        let defaults = f.proxy.defaults_get().unwrap();
        assert_eq!(defaults.errorfiles[&503], path.display().to_string());
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_unsupported_code_is_reported() {
        let mut f = fixture();
        f.store.config_maps.errorfiles.annotations =
            annotations_from([("418", "teapot"), ("404", "missing")]);

        let result = f.run(&mut ErrorFiles).await;

        assert!(result.is_err());
        let defaults = f.proxy.defaults_get().unwrap();
        assert_eq!(defaults.errorfiles.keys().copied().collect::<Vec<_>>(), vec![404]);
    }

    #[tokio::test]
    async fn test_unchanged_pages_need_no_reload() {
        let mut f = fixture();
        f.store.config_maps.errorfiles.annotations = annotations_from([("503", PAGE_503)]);
        f.run(&mut ErrorFiles).await.unwrap();
        f.next_reconcile().await;

        f.run(&mut ErrorFiles).await.unwrap();

        assert!(!f.ctx.action.need_action());
    }

    #[tokio::test]
    async fn test_removed_page_is_deleted() {
        let mut f = fixture();
        f.store.config_maps.errorfiles.annotations = annotations_from([("503", PAGE_503)]);
        f.run(&mut ErrorFiles).await.unwrap();
        f.next_reconcile().await;

        f.store.config_maps.errorfiles.annotations.clear();
        f.run(&mut ErrorFiles).await.unwrap();

        assert!(!f.ctx.config.paths.errorfiles_dir.join("503").exists());
        assert!(f.proxy.defaults_get().unwrap().errorfiles.is_empty());
        assert!(f.ctx.action.need_reload());
    }

    // ========================================================================
    // Pattern files
    // ========================================================================

    #[tokio::test]
    async fn test_pattern_files_written() {
        let mut f = fixture();
        f.store.config_maps.patternfiles.annotations =
            annotations_from([("office", "10.1.0.0/16\n10.2.0.0/16\n")]);

        f.run(&mut PatternFiles).await.unwrap();

        let path = f.ctx.config.paths.patterns_dir.join("office");
        assert!(std::fs::read_to_string(path).unwrap().contains("10.2.0.0/16"));
        assert!(f.ctx.action.need_reload());
    }

    #[tokio::test]
    async fn test_pattern_file_name_with_slash_rejected() {
        let mut f = fixture();
        f.store.config_maps.patternfiles.annotations =
            annotations_from([("../escape", "10.0.0.1")]);

        assert!(f.run(&mut PatternFiles).await.is_err());
        assert_eq!(f.ctx.patternfiles.names().count(), 0);
    }
}
