// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation registry and value parsers.
//!
//! Annotations reach the controller from four sources: the service, the ingress, the
//! main ConfigMap and the built-in [`AnnotationDefaults`]. [`AnnotationSet`] walks them
//! in that order through [`K8sStore::get_value_from_annotations`] and offers typed
//! accessors on top. The submodules turn the merged values into proxy models:
//!
//! - [`backend`] - backend section and default-server parameters
//! - [`frontend`] - request/response rules attached to frontends
//! - [`global`] - `global` and `defaults` sections, log targets

pub mod backend;
pub mod defaults;
pub mod frontend;
pub mod global;

pub use defaults::AnnotationDefaults;

use crate::config::ObjectRef;
use crate::errors::AnnotationError;
use crate::proxy::models::Balance;
use crate::store::{AnnotationValue, Annotations, K8sStore, Status};

/// Annotation sources in precedence order, bound to the store that resolves them.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationSet<'a> {
    store: &'a K8sStore,
    sources: &'a [&'a Annotations],
}

impl<'a> AnnotationSet<'a> {
    /// Bind `sources` (highest precedence first) to `store`.
    #[must_use]
    pub fn new(store: &'a K8sStore, sources: &'a [&'a Annotations]) -> Self {
        Self { store, sources }
    }

    /// Merged value with its previous value and status.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<AnnotationValue> {
        self.store.get_value_from_annotations(name, self.sources)
    }

    /// Merged value; empty strings count as unset.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<String> {
        self.value(name)
            .map(|v| v.value.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// First of `names` that has a value.
    #[must_use]
    pub fn first_of(&self, names: &[&str]) -> Option<(String, String)> {
        names
            .iter()
            .find_map(|n| self.string(n).map(|v| ((*n).to_string(), v)))
    }

    /// Alias of `names` set by the highest-precedence source; within one source the
    /// order of `names` decides.
    #[must_use]
    pub fn explicit_alias<'n>(&self, names: &[&'n str]) -> Option<&'n str> {
        self.sources.iter().find_map(|source| {
            names
                .iter()
                .copied()
                .find(|n| is_set(std::slice::from_ref(source), n))
        })
    }

    /// True when the merged value changed since the previous reconcile.
    #[must_use]
    pub fn changed(&self, name: &str) -> bool {
        self.value(name).is_some_and(|v| v.status.is_changed())
    }

    /// Boolean annotation; unset is `false`.
    ///
    /// # Errors
    ///
    /// [`AnnotationError::InvalidValue`] on an unparsable value.
    pub fn bool(&self, name: &str) -> Result<bool, AnnotationError> {
        self.string(name)
            .map_or(Ok(false), |v| parse_bool(name, &v))
    }

    /// Integer annotation.
    ///
    /// # Errors
    ///
    /// [`AnnotationError::InvalidValue`] on an unparsable value.
    pub fn int(&self, name: &str) -> Result<Option<i64>, AnnotationError> {
        self.string(name).map(|v| parse_int(name, &v)).transpose()
    }

    /// Timeout annotation, validated and returned as written.
    ///
    /// # Errors
    ///
    /// [`AnnotationError::InvalidValue`] on an unparsable value.
    pub fn timeout(&self, name: &str) -> Result<Option<String>, AnnotationError> {
        match self.string(name) {
            Some(v) => {
                parse_timeout_ms(name, &v)?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// Secret reference; a bare name is looked up in `default_namespace`.
    ///
    /// # Errors
    ///
    /// [`AnnotationError::InvalidValue`] on a malformed reference.
    pub fn secret(
        &self,
        name: &str,
        default_namespace: &str,
    ) -> Result<Option<ObjectRef>, AnnotationError> {
        self.string(name)
            .map(|v| parse_secret_ref(name, &v, default_namespace))
            .transpose()
    }

    /// The store the set resolves against.
    #[must_use]
    pub fn store(&self) -> &'a K8sStore {
        self.store
    }
}

/// Values accepted as booleans, matching the proxy tooling conventions.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] for anything else.
pub fn parse_bool(name: &str, value: &str) -> Result<bool, AnnotationError> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" | "on" | "yes" | "enabled" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" | "off" | "no" | "disabled" => Ok(false),
        _ => Err(AnnotationError::invalid(name, value, "expected a boolean")),
    }
}

/// Parse a signed integer.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] when the value is not an integer.
pub fn parse_int(name: &str, value: &str) -> Result<i64, AnnotationError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| AnnotationError::invalid(name, value, e.to_string()))
}

/// Parse a proxy time value (`500`, `50ms`, `5s`, `1m`, `1h`, `1d`, `100us`) into milliseconds.
///
/// A bare number is milliseconds. Microseconds are rounded up.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] on an unknown unit or a non-numeric value.
pub fn parse_timeout_ms(name: &str, value: &str) -> Result<i64, AnnotationError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(AnnotationError::invalid(name, value, "missing number"));
    }
    let number: i64 = digits
        .parse()
        .map_err(|e: std::num::ParseIntError| AnnotationError::invalid(name, value, e.to_string()))?;
    let ms = match unit {
        "" | "ms" => Some(number),
        "us" => Some((number + 999) / 1000),
        "s" => number.checked_mul(1000),
        "m" => number.checked_mul(60_000),
        "h" => number.checked_mul(3_600_000),
        "d" => number.checked_mul(86_400_000),
        _ => return Err(AnnotationError::invalid(name, value, format!("unknown unit '{unit}'"))),
    };
    ms.ok_or_else(|| AnnotationError::invalid(name, value, "value out of range"))
}

/// Parse `name` or `namespace/name`.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] when a part is empty.
pub fn parse_secret_ref(
    name: &str,
    value: &str,
    default_namespace: &str,
) -> Result<ObjectRef, AnnotationError> {
    let value = value.trim();
    let (namespace, secret) = match value.split_once('/') {
        Some((ns, secret)) => (ns, secret),
        None => (default_namespace, value),
    };
    if namespace.is_empty() || secret.is_empty() || secret.contains('/') {
        return Err(AnnotationError::invalid(
            name,
            value,
            "expected 'name' or 'namespace/name'",
        ));
    }
    Ok(ObjectRef {
        namespace: namespace.to_string(),
        name: secret.to_string(),
    })
}

/// Parse the `load-balance` annotation.
///
/// Supported algorithms: `roundrobin`, `static-rr`, `leastconn`, `first`, `source`,
/// `random[(<draws>)]`, `uri [len <n>] [depth <n>] [whole]`, `url_param <param> [check_post]`,
/// `hdr(<name>) [use_domain_only]` and `rdp-cookie[(<name>)]`.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] on an unknown algorithm or parameter.
pub fn parse_load_balance(value: &str) -> Result<Balance, AnnotationError> {
    const NAME: &str = "load-balance";
    let invalid = |reason: &str| AnnotationError::invalid(NAME, value, reason);
    let mut words = value.split_whitespace();
    let algorithm = words.next().ok_or_else(|| invalid("empty value"))?;
    let params: Vec<&str> = words.collect();

    let no_params = || {
        if params.is_empty() {
            Ok(())
        } else {
            Err(invalid("algorithm takes no parameters"))
        }
    };

    match algorithm {
        "roundrobin" | "static-rr" | "leastconn" | "first" | "source" => no_params()?,
        "uri" => {
            let mut iter = params.iter();
            while let Some(param) = iter.next() {
                match *param {
                    "whole" => {}
                    "len" | "depth" => {
                        let n = iter.next().ok_or_else(|| invalid("missing number"))?;
                        n.parse::<u32>().map_err(|_| invalid("expected a number"))?;
                    }
                    _ => return Err(invalid("unknown uri parameter")),
                }
            }
        }
        "url_param" => match params.as_slice() {
            [_] | [_, "check_post"] => {}
            _ => return Err(invalid("expected 'url_param <param> [check_post]'")),
        },
        a if a.starts_with("hdr(") && a.ends_with(')') && a.len() > 5 => match params.as_slice() {
            [] | ["use_domain_only"] => {}
            _ => return Err(invalid("expected 'hdr(<name>) [use_domain_only]'")),
        },
        a if a == "random" || (a.starts_with("random(") && a.ends_with(')')) => {
            no_params()?;
            if let Some(draws) = a.strip_prefix("random(").and_then(|r| r.strip_suffix(')')) {
                draws
                    .parse::<u32>()
                    .map_err(|_| invalid("expected 'random(<draws>)'"))?;
            }
        }
        a if a == "rdp-cookie" || (a.starts_with("rdp-cookie(") && a.ends_with(')')) => {
            no_params()?;
        }
        _ => return Err(invalid("unknown algorithm")),
    }

    Ok(Balance {
        algorithm: algorithm.to_string(),
        params: if params.is_empty() {
            None
        } else {
            Some(params.join(" "))
        },
    })
}

/// True when at least one source has a non-deleted entry for `name`.
#[must_use]
pub fn is_set(sources: &[&Annotations], name: &str) -> bool {
    sources.iter().any(|s| {
        s.get(name)
            .is_some_and(|v| v.status != Status::Deleted && !v.value.trim().is_empty())
    })
}
