// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the HAProxy ingress controller.
//!
//! Errors are grouped by the layer that raises them:
//! - [`StoreError`] - a referenced cluster object is absent
//! - [`AnnotationError`] - a malformed annotation value
//! - [`ProxyError`] - a failed call against the proxy configuration or runtime API
//! - [`CertError`] - certificate material could not be written or pushed live
//! - [`RouteError`] - a host/path cannot be turned into routing map rows
//!
//! [`ControllerError`] wraps all of them plus I/O and fatal conditions, and
//! [`ErrorList`] accumulates independent failures so a reconcile can keep going.

use std::fmt;
use thiserror::Error;

/// Errors raised while looking up objects in the cluster-state store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A referenced object does not exist or is marked DELETED.
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        /// Kind of object (`service`, `secret`, `namespace`, ...)
        kind: &'static str,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// A service does not expose the port an ingress path refers to.
    #[error("service '{namespace}/{name}': no service port matching '{port}'")]
    PortNotFound {
        /// Namespace of the service
        namespace: String,
        /// Name of the service
        name: String,
        /// Requested port, as number or name
        port: String,
    },
}

impl StoreError {
    /// Build a [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Errors raised while parsing annotation values.
///
/// An invalid annotation is ignored: defaults stay in effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// The annotation value could not be parsed.
    #[error("annotation '{name}': invalid value '{value}': {reason}")]
    InvalidValue {
        /// Annotation name, without prefix
        name: String,
        /// Raw value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Two mutually exclusive annotations were set.
    #[error("annotations '{first}' and '{second}' cannot be used together")]
    Conflict {
        /// First annotation name
        first: String,
        /// Second annotation name
        second: String,
    },
}

impl AnnotationError {
    /// Build an [`AnnotationError::InvalidValue`].
    pub fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the proxy configuration API or its runtime socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// The requested proxy object does not exist.
    #[error("{kind} '{name}' does not exist")]
    NotFound {
        /// Object kind (`frontend`, `backend`, `server`, `bind`, ...)
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// The object to create already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// A configuration call was issued outside of a transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A transaction was opened while another one is in progress.
    #[error("transaction already in progress (version {version})")]
    TransactionInProgress {
        /// Version the open transaction is based on
        version: u64,
    },

    /// The configuration changed underneath the transaction; retry on the next reconcile.
    #[error("version mismatch: transaction based on {expected}, configuration at {actual}")]
    VersionMismatch {
        /// Version the transaction was opened against
        expected: u64,
        /// Current configuration version
        actual: u64,
    },

    /// No runtime socket is available.
    #[error("runtime API unavailable")]
    RuntimeUnavailable,

    /// A runtime command returned an error.
    #[error("runtime command '{command}' failed: {response}")]
    Runtime {
        /// Command sent to the runtime socket
        command: String,
        /// Response from the proxy
        response: String,
    },

    /// The configuration could not be written.
    #[error("failed to write configuration '{path}': {reason}")]
    Write {
        /// Destination path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Generic API failure.
    #[error("proxy API error: {0}")]
    Api(String),
}

impl ProxyError {
    /// True for [`ProxyError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for [`ProxyError::AlreadyExists`].
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True when the failure is expected to clear on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. } | Self::Runtime { .. } | Self::RuntimeUnavailable
        )
    }
}

/// Errors raised by the certificate manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertError {
    /// A secret lacks a key required for its certificate type.
    #[error("secret '{secret}': missing key '{key}'")]
    MissingKey {
        /// Secret `namespace/name`
        secret: String,
        /// Missing data key
        key: String,
    },

    /// Certificate file could not be written or removed.
    #[error("certificate '{path}': {reason}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Pushing the certificate over the runtime socket failed.
    ///
    /// The reason is redacted of PEM content.
    #[error("runtime update of certificate '{path}' failed: {reason}")]
    Runtime {
        /// Certificate path known to the proxy
        path: String,
        /// Redacted error message
        reason: String,
    },
}

/// Errors raised while turning an ingress path into routing map rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Route without a backend.
    #[error("route has no backend")]
    MissingBackend,

    /// SSL passthrough route without a host to match the SNI against.
    #[error("backend '{backend}': SSL passthrough requires a host")]
    EmptySni {
        /// Backend of the route
        backend: String,
    },

    /// Neither a host nor a path to match.
    #[error("backend '{backend}': neither host nor path provided")]
    NoHostNoPath {
        /// Backend of the route
        backend: String,
    },
}

/// Top-level error type for the reconciliation engine.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Referenced cluster object is absent.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed annotation value.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// Proxy API call failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Certificate handling failed.
    #[error(transparent)]
    Cert(#[from] CertError),

    /// An ingress path could not be routed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Filesystem write failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path being written
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Unrecoverable condition; the process should exit.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The proxy process could not be started, reloaded or restarted.
    #[error("proxy process: {0}")]
    Process(String),

    /// Several independent failures.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<ControllerError>),
}

impl ControllerError {
    /// Build a [`ControllerError::Io`] for `path`.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// True when the error is (or only contains) NotFound errors.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Proxy(e) => e.is_not_found(),
            Self::Multiple(errors) => errors.iter().all(Self::is_not_found),
            _ => false,
        }
    }

    /// True for [`ControllerError::Fatal`], including inside a [`ControllerError::Multiple`].
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Fatal(_) => true,
            Self::Multiple(errors) => errors.iter().any(Self::is_fatal),
            _ => false,
        }
    }

    /// Metric label of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "not_found",
            Self::Annotation(_) | Self::Route(_) => "validation",
            Self::Proxy(e) if e.is_not_found() => "not_found",
            Self::Proxy(_) => "proxy",
            Self::Cert(_) => "cert",
            Self::Io { .. } => "io",
            Self::Fatal(_) => "fatal",
            Self::Process(_) => "process",
            Self::Multiple(_) => "multiple",
        }
    }
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used across the crate.
pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

/// Accumulator for independent failures.
///
/// Subsystems keep going after an error and report everything at the end.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<ControllerError>,
}

impl ErrorList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error of `result`, if any.
    pub fn add<T, E: Into<ControllerError>>(&mut self, result: std::result::Result<T, E>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    /// Record an error.
    pub fn push(&mut self, error: impl Into<ControllerError>) {
        match error.into() {
            ControllerError::Multiple(inner) => self.errors.extend(inner),
            e => self.errors.push(e),
        }
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse into a single result.
    ///
    /// # Errors
    ///
    /// Returns the single recorded error, or [`ControllerError::Multiple`] when several were recorded.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ControllerError::Multiple(self.errors)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_errors(&self.errors))
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
