// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Proxy process supervision.
//!
//! - [`MasterSocket`] runs the proxy in master-worker mode and reloads it through the
//!   master CLI socket; a restart stops and re-spawns the program.
//! - [`External`] is used when the proxy runs outside the controller: requests are only logged.
//! - [`RecordingSupervisor`] records requests for tests.

use crate::errors::{ControllerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// Starts, reloads and restarts the proxy.
#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Start the proxy for the first time.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Process`] when the configuration is invalid or the program fails to spawn.
    async fn start(&mut self) -> Result<()>;

    /// Graceful reload picking up the new configuration.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Process`] when the configuration is rejected or the reload fails.
    async fn reload(&mut self) -> Result<()>;

    /// Replace the process.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Process`] when the program cannot be stopped or started.
    async fn restart(&mut self) -> Result<()>;
}

/// `[ALERT]` lines of the proxy output.
#[must_use]
pub fn alert_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains("[ALERT]"))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Proxy process running in master-worker mode.
#[derive(Debug)]
pub struct MasterSocket {
    program: PathBuf,
    master_socket: PathBuf,
    config_files: Vec<PathBuf>,
    child: Option<Child>,
}

impl MasterSocket {
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        master_socket: impl Into<PathBuf>,
        main_cfg: &Path,
        aux_cfg: &Path,
    ) -> Self {
        Self {
            program: program.into(),
            master_socket: master_socket.into(),
            config_files: vec![main_cfg.to_path_buf(), aux_cfg.to_path_buf()],
            child: None,
        }
    }

    fn config_args(&self) -> Vec<String> {
        self.config_files
            .iter()
            .filter(|f| f.exists())
            .flat_map(|f| ["-f".to_string(), f.display().to_string()])
            .collect()
    }

    /// Validate the configuration with `-c`.
    async fn check_config(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("-c")
            .args(self.config_args())
            .output()
            .await
            .map_err(|e| ControllerError::io(&self.program, e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let alerts = alert_lines(&stderr);
        for alert in &alerts {
            error!(alert = %alert, "proxy configuration rejected");
        }
        Err(ControllerError::Process(format!(
            "configuration check failed: {}",
            alerts.join("; ")
        )))
    }

    async fn spawn(&mut self) -> Result<()> {
        let child = Command::new(&self.program)
            .arg("-W")
            .arg("-S")
            .arg(&self.master_socket)
            .args(self.config_args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ControllerError::io(&self.program, e))?;
        info!(pid = ?child.id(), program = %self.program.display(), "proxy started");
        self.child = Some(child);
        Ok(())
    }

    fn running(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|c| matches!(c.try_wait(), Ok(None)))
    }

    async fn master_command(&self, command: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.master_socket)
            .await
            .map_err(|e| ControllerError::io(&self.master_socket, e))?;
        stream
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| ControllerError::io(&self.master_socket, e))?;
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .map_err(|e| ControllerError::io(&self.master_socket, e))?;
        Ok(response)
    }
}

#[async_trait]
impl ProcessSupervisor for MasterSocket {
    async fn start(&mut self) -> Result<()> {
        self.check_config().await?;
        self.spawn().await
    }

    async fn reload(&mut self) -> Result<()> {
        self.check_config().await?;
        if !self.running() {
            warn!("proxy not running, starting it instead of reloading");
            return self.spawn().await;
        }
        let response = self.master_command("reload").await?;
        let alerts = alert_lines(&response);
        if !alerts.is_empty() {
            for alert in &alerts {
                error!(alert = %alert, "proxy reload failed");
            }
            return Err(ControllerError::Process(format!(
                "reload failed: {}",
                alerts.join("; ")
            )));
        }
        info!("proxy reloaded");
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        self.check_config().await?;
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|e| ControllerError::Process(format!("failed to stop proxy: {e}")))?;
        }
        self.spawn().await?;
        info!("proxy restarted");
        Ok(())
    }
}

/// The proxy is managed outside of the controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct External;

#[async_trait]
impl ProcessSupervisor for External {
    async fn start(&mut self) -> Result<()> {
        info!("external proxy mode, not starting the proxy");
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        info!("external proxy mode, reload requested");
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        info!("external proxy mode, restart requested");
        Ok(())
    }
}

/// Supervisor request recorded by [`RecordingSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRequest {
    Start,
    Reload,
    Restart,
}

/// Records requests; clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingSupervisor {
    requests: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl RecordingSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.clear();
        }
    }

    fn push(&self, request: ProcessRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn start(&mut self) -> Result<()> {
        self.push(ProcessRequest::Start);
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.push(ProcessRequest::Reload);
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        self.push(ProcessRequest::Restart);
        Ok(())
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod process_tests;
