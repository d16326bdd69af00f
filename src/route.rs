// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Routing map rows.
//!
//! A route sends a host/path to a backend. It becomes rows of the `host`, `path-exact`,
//! `path-prefix` and (for SSL passthrough) `sni` maps. The value of a path row is the
//! backend name followed by the ids of the ingress-scoped rules, dot separated, which is
//! what the frontend rules match with `-m dom <id>`.
//!
//! A route carrying a `route-acl` becomes a conditional `use_backend` instead.

use crate::constants::{MAP_HOST, MAP_PATH_EXACT, MAP_PATH_PREFIX, MAP_SNI};
use crate::context::CustomRoute;
use crate::errors::RouteError;
use crate::maps::Maps;
use crate::store::{IngressPath, PathType};

/// One host/path to backend mapping.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    /// Empty for a rule without host
    pub host: &'a str,
    pub path: &'a IngressPath,
    pub backend: &'a str,
    /// Ids of the ingress-scoped rules applying to this route
    pub rule_ids: &'a [String],
    pub ssl_passthrough: bool,
}

impl Route<'_> {
    /// Host with a leading wildcard removed (`*.example.com` matches as `.example.com`).
    #[must_use]
    pub fn host(&self) -> &str {
        self.host.strip_prefix('*').unwrap_or(self.host)
    }

    /// Map value: the backend followed by the rule ids.
    #[must_use]
    pub fn value(&self) -> String {
        let mut value = self.backend.to_string();
        for id in self.rule_ids {
            value.push('.');
            value.push_str(id);
        }
        value
    }
}

/// Append the map rows of `route`.
///
/// # Errors
///
/// [`RouteError`] when the route has no backend, a passthrough route has no host, or
/// neither host nor path is set.
pub fn add_host_path_route(route: &Route<'_>, maps: &mut Maps) -> Result<(), RouteError> {
    if route.backend.is_empty() {
        return Err(RouteError::MissingBackend);
    }
    let host = route.host();
    let value = route.value();

    if route.ssl_passthrough {
        if host.is_empty() {
            return Err(RouteError::EmptySni {
                backend: route.backend.to_string(),
            });
        }
        maps.append_row(MAP_SNI, format!("{host} {value}"));
        return Ok(());
    }

    let path = route.path.path.as_str();
    if !host.is_empty() {
        maps.append_row(MAP_HOST, format!("{host} {host}"));
    } else if path.is_empty() {
        return Err(RouteError::NoHostNoPath {
            backend: route.backend.to_string(),
        });
    }

    match route.path.path_type {
        PathType::Exact => maps.append_row(MAP_PATH_EXACT, format!("{host}{path} {value}")),
        _ if path.is_empty() || path == "/" => {
            maps.append_row(MAP_PATH_PREFIX, format!("{host}/ {value}"));
        }
        PathType::Prefix => {
            let path = path.trim_end_matches('/');
            maps.append_row(MAP_PATH_EXACT, format!("{host}{path} {value}"));
            maps.append_row(MAP_PATH_PREFIX, format!("{host}{path}/ {value}"));
        }
        PathType::ImplementationSpecific => {
            let path = path.trim_end_matches('/');
            maps.append_row(MAP_PATH_EXACT, format!("{host}{path} {value}"));
            maps.append_row(MAP_PATH_PREFIX, format!("{host}{path} {value}"));
        }
    }
    Ok(())
}

/// Build the conditional `use_backend` of a route guarded by `acl`.
#[must_use]
pub fn custom_route(route: &Route<'_>, acl: &str) -> CustomRoute {
    let mut cond = Vec::new();
    let host = route.host();
    if !host.is_empty() {
        cond.push(format!("{{ var(txn.host) -m str {host} }}"));
    }
    let path = route.path.path.as_str();
    if !path.is_empty() {
        if route.path.path_type == PathType::Exact {
            cond.push(format!("{{ path {path} }}"));
        } else {
            cond.push(format!("{{ path -m beg {path} }}"));
        }
    }
    cond.push(format!("{{ {} }}", acl.trim()));
    CustomRoute {
        backend: route.backend.to_string(),
        cond: cond.join(" "),
    }
}

#[cfg(test)]
#[path = "route_tests.rs"]
mod route_tests;
