// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reload / restart decision.
//!
//! Any component may ask for a reload or a restart with a reason. The reconciler reads
//! the flags once the transaction is committed and acts on the strongest request.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Flags {
    reload: bool,
    restart: bool,
}

/// What the proxy process needs after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    None,
    Reload,
    Restart,
}

/// Shared reload / restart flags.
///
/// Cloning yields another handle on the same flags.
#[derive(Debug, Clone, Default)]
pub struct ActionDecider {
    flags: Arc<Mutex<Flags>>,
}

impl ActionDecider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn valid(kind: &str, reason: &str) -> bool {
        if reason.trim().is_empty() {
            error!(action = kind, "action requested without a reason");
            return false;
        }
        true
    }

    /// Ask for a reload.
    pub fn reload(&self, reason: impl AsRef<str>) {
        let reason = reason.as_ref();
        if Self::valid("reload", reason) {
            info!(reason = %reason, "reload required");
        }
        self.lock().reload = true;
    }

    /// Ask for a reload when `cond` holds.
    pub fn reload_if(&self, cond: bool, reason: impl AsRef<str>) {
        if cond {
            self.reload(reason);
        }
    }

    /// Ask for a restart.
    pub fn restart(&self, reason: impl AsRef<str>) {
        let reason = reason.as_ref();
        if Self::valid("restart", reason) {
            info!(reason = %reason, "restart required");
        }
        self.lock().restart = true;
    }

    /// Ask for a restart when `cond` holds.
    pub fn restart_if(&self, cond: bool, reason: impl AsRef<str>) {
        if cond {
            self.restart(reason);
        }
    }

    #[must_use]
    pub fn need_reload(&self) -> bool {
        self.lock().reload
    }

    #[must_use]
    pub fn need_restart(&self) -> bool {
        self.lock().restart
    }

    #[must_use]
    pub fn need_action(&self) -> bool {
        let flags = self.lock();
        flags.reload || flags.restart
    }

    /// The strongest pending request; a restart supersedes a reload.
    #[must_use]
    pub fn action(&self) -> ProcessAction {
        let flags = *self.lock();
        if flags.restart {
            ProcessAction::Restart
        } else if flags.reload {
            ProcessAction::Reload
        } else {
            ProcessAction::None
        }
    }

    /// Clear both flags.
    pub fn reset(&self) {
        *self.lock() = Flags::default();
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod action_tests;
