// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Base values for annotations that no source sets.
//!
//! The table is assembled once at startup and shared read-only afterwards.

use std::collections::BTreeMap;

/// Default log format of HTTP frontends.
pub const DEFAULT_LOG_FORMAT: &str = "%ci:%cp [%tr] %ft %b/%s %TR/%Tw/%Tc/%Tr/%Ta %ST %B %CC %CS %tsc %ac/%fc/%bc/%sc/%rc %sq/%bq %hr %hs \"%HM %[var(txn.base)] %HV\"";

const BUILTIN: &[(&str, &str)] = &[
    ("auth-realm", "Protected Content"),
    ("check", "true"),
    ("client-crt-optional", "false"),
    ("cookie-indirect", "true"),
    ("cookie-nocache", "true"),
    ("cookie-type", "insert"),
    ("cors-allow-headers", "*"),
    ("cors-allow-methods", "*"),
    ("cors-allow-origin", "*"),
    ("cors-max-age", "5s"),
    ("forwarded-for", "true"),
    ("hard-stop-after", "1h"),
    ("load-balance", "roundrobin"),
    ("log-format", DEFAULT_LOG_FORMAT),
    ("quic-alt-svc-max-age", "60"),
    ("rate-limit-period", "1s"),
    ("rate-limit-size", "100k"),
    ("rate-limit-status-code", "403"),
    ("request-capture-len", "128"),
    ("request-redirect-code", "302"),
    ("scale-server-slots", "42"),
    ("server-ssl", "false"),
    ("ssl-passthrough", "false"),
    ("ssl-redirect-code", "302"),
    ("ssl-redirect-port", "8443"),
    (
        "syslog-server",
        "address:127.0.0.1, facility: local0, level: notice",
    ),
    ("timeout-client", "50s"),
    ("timeout-connect", "5s"),
    ("timeout-http-keep-alive", "1m"),
    ("timeout-http-request", "5s"),
    ("timeout-queue", "5s"),
    ("timeout-server", "50s"),
    ("timeout-tunnel", "1h"),
    ("tls-alpn", "h2,http/1.1"),
];

/// Frozen table of annotation defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDefaults {
    values: BTreeMap<String, String>,
}

impl Default for AnnotationDefaults {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AnnotationDefaults {
    /// The built-in table.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            values: BUILTIN
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Replace (or add) one default.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Default value of `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Number of registered defaults.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
