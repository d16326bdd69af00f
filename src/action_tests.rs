// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for action.rs

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_starts_idle() {
        let action = ActionDecider::new();
        assert!(!action.need_action());
        assert_eq!(action.action(), ProcessAction::None);
    }

    #[test]
    fn test_reload_and_reset() {
        let action = ActionDecider::new();
        action.reload("map host updated");
        assert!(action.need_reload());
        assert!(!action.need_restart());
        assert_eq!(action.action(), ProcessAction::Reload);

        action.reset();
        assert!(!action.need_action());
    }

    #[test]
    fn test_restart_supersedes_reload() {
        let action = ActionDecider::new();
        action.reload("backend created");
        action.restart("log targets changed");
        assert_eq!(action.action(), ProcessAction::Restart);
    }

    #[test]
    fn test_conditional_requests() {
        let action = ActionDecider::new();
        action.reload_if(false, "never");
        action.restart_if(false, "never");
        assert!(!action.need_action());
        action.reload_if(true, "certificate written");
        assert!(action.need_reload());
    }

    #[test]
    fn test_empty_reason_still_sets_flag() {
        let action = ActionDecider::new();
        action.reload("  ");
        assert!(action.need_reload());
    }

    #[test]
    fn test_clones_share_flags() {
        let action = ActionDecider::new();
        let handle = action.clone();
        std::thread::spawn(move || handle.restart("from another thread"))
            .join()
            .unwrap();
        assert!(action.need_restart());
    }
}
