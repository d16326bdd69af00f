// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Runtime socket commands.
//!
//! The runtime API is a line protocol over a UNIX socket: one command per connection,
//! the response is read until the proxy closes the stream. Commands carrying a payload
//! use the `<<` form terminated by an empty line.

use crate::constants::RUNTIME_COMMAND_TIMEOUT_SECS;
use crate::errors::ProxyError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Executes runtime commands against a running proxy.
#[async_trait]
pub trait RuntimeApi: Send + Sync {
    /// Send `command` and return the raw response.
    ///
    /// # Errors
    ///
    /// [`ProxyError::RuntimeUnavailable`] when the socket cannot be reached,
    /// [`ProxyError::Runtime`] when the proxy rejects the command.
    async fn execute(&self, command: &str) -> Result<String, ProxyError>;
}

/// Responses that signal a rejected command.
const ERROR_MARKERS: &[&str] = &[
    "No such",
    "Unknown command",
    "Can't",
    "can't",
    "failed",
    "Failed",
    "Require",
    "Invalid",
    "invalid",
    "error",
    "Error",
    "not found",
    "already exists",
];

/// Map a raw response to an error when it carries one of the known markers.
///
/// # Errors
///
/// [`ProxyError::Runtime`] naming the command and the proxy response.
pub fn check_response(command: &str, response: String) -> Result<String, ProxyError> {
    let trimmed = response.trim();
    if ERROR_MARKERS.iter().any(|m| trimmed.contains(m)) {
        let command = command.lines().next().unwrap_or_default().to_string();
        if trimmed.contains("already exists") {
            return Err(ProxyError::AlreadyExists {
                kind: "runtime entry",
                name: command,
            });
        }
        return Err(ProxyError::Runtime {
            command,
            response: trimmed.to_string(),
        });
    }
    Ok(response)
}

/// `set server <backend>/<server> addr <address> [port <port>]`
#[must_use]
pub fn set_server_addr(backend: &str, server: &str, address: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("set server {backend}/{server} addr {address} port {port}"),
        None => format!("set server {backend}/{server} addr {address}"),
    }
}

/// `set server <backend>/<server> state ready|maint`
#[must_use]
pub fn set_server_state(backend: &str, server: &str, maintenance: bool) -> String {
    let state = if maintenance { "maint" } else { "ready" };
    format!("set server {backend}/{server} state {state}")
}

/// `new ssl cert <path>`
#[must_use]
pub fn new_ssl_cert(path: &str) -> String {
    format!("new ssl cert {path}")
}

/// `set ssl cert <path> <<` followed by the payload.
#[must_use]
pub fn set_ssl_cert(path: &str, payload: &[u8]) -> String {
    let payload = String::from_utf8_lossy(payload);
    format!("set ssl cert {path} <<\n{}\n", payload.trim_end())
}

/// `commit ssl cert <path>`
#[must_use]
pub fn commit_ssl_cert(path: &str) -> String {
    format!("commit ssl cert {path}")
}

/// `abort ssl cert <path>`
#[must_use]
pub fn abort_ssl_cert(path: &str) -> String {
    format!("abort ssl cert {path}")
}

/// `del ssl cert <path>`
#[must_use]
pub fn del_ssl_cert(path: &str) -> String {
    format!("del ssl cert {path}")
}

/// `add ssl crt-list <crt-list> <path>`
#[must_use]
pub fn add_ssl_crt_list(crt_list: &str, path: &str) -> String {
    format!("add ssl crt-list {crt_list} {path}")
}

/// `del ssl crt-list <crt-list> <path>`
#[must_use]
pub fn del_ssl_crt_list(crt_list: &str, path: &str) -> String {
    format!("del ssl crt-list {crt_list} {path}")
}

/// `new ssl ca-file <path>`
#[must_use]
pub fn new_ssl_ca_file(path: &str) -> String {
    format!("new ssl ca-file {path}")
}

/// `set ssl ca-file <path> <<` followed by the payload.
#[must_use]
pub fn set_ssl_ca_file(path: &str, payload: &[u8]) -> String {
    let payload = String::from_utf8_lossy(payload);
    format!("set ssl ca-file {path} <<\n{}\n", payload.trim_end())
}

/// `commit ssl ca-file <path>`
#[must_use]
pub fn commit_ssl_ca_file(path: &str) -> String {
    format!("commit ssl ca-file {path}")
}

/// `abort ssl ca-file <path>`
#[must_use]
pub fn abort_ssl_ca_file(path: &str) -> String {
    format!("abort ssl ca-file {path}")
}

/// Runtime API over the proxy's stats socket.
#[derive(Debug, Clone)]
pub struct SocketRuntime {
    socket: PathBuf,
    timeout: Duration,
}

impl SocketRuntime {
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(RUNTIME_COMMAND_TIMEOUT_SECS),
        }
    }

    async fn exchange(&self, command: &str) -> std::io::Result<String> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream.write_all(format!("{command}\n").as_bytes()).await?;
        stream.flush().await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }
}

#[async_trait]
impl RuntimeApi for SocketRuntime {
    async fn execute(&self, command: &str) -> Result<String, ProxyError> {
        debug!(command = %command.lines().next().unwrap_or_default(), "runtime command");
        let response = tokio::time::timeout(self.timeout, self.exchange(command))
            .await
            .map_err(|_| ProxyError::RuntimeUnavailable)?
            .map_err(|_| ProxyError::RuntimeUnavailable)?;
        check_response(command, response)
    }
}

/// In-process runtime that records commands; commands matching a configured prefix fail.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    commands: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command starting with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(prefix.to_string());
        }
    }

    /// Commands received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Forget recorded commands.
    pub fn clear(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }
}

#[async_trait]
impl RuntimeApi for RecordingRuntime {
    async fn execute(&self, command: &str) -> Result<String, ProxyError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        let fails = self
            .failing
            .lock()
            .map(|f| f.iter().any(|p| command.starts_with(p.as_str())))
            .unwrap_or(false);
        if fails {
            return Err(ProxyError::Runtime {
                command: command.lines().next().unwrap_or_default().to_string(),
                response: "simulated failure".to_string(),
            });
        }
        Ok(String::new())
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod runtime_tests;
