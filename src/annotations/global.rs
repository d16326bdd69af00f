// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `global` and `defaults` sections built from the main ConfigMap.
//!
//! `cr-global`, `cr-defaults` and `cr-log-targets` name custom resources (`namespace/name`)
//! whose content replaces what the annotations would build.

use super::{parse_int, AnnotationSet};
use crate::config::{ControllerConfig, ObjectRef};
use crate::crd::{DefaultsCrSpec, GlobalCrSpec, LogTargetsCrSpec};
use crate::errors::{AnnotationError, ErrorList};
use crate::proxy::models::{Defaults, Global, LogTarget, Mode};
use crate::store::K8sStore;
use std::collections::BTreeMap;

/// Timeouts of the defaults section, by annotation suffix.
const TIMEOUTS: [&str; 9] = [
    "check",
    "client",
    "client-fin",
    "connect",
    "http-keep-alive",
    "http-request",
    "queue",
    "server",
    "tunnel",
];

const HTTP_CONNECTION_MODES: [&str; 3] = ["http-keep-alive", "http-server-close", "httpclose"];

/// The three process level sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSettings {
    pub global: Global,
    pub log_targets: Vec<LogTarget>,
    pub defaults: Defaults,
}

/// Build `global`, log targets and `defaults`.
pub fn global_settings(
    annotations: AnnotationSet<'_>,
    config: &ControllerConfig,
    errors: &mut ErrorList,
) -> GlobalSettings {
    let store = annotations.store();
    let global = match cr_lookup(store, annotations, "cr-global", |ns| &ns.crs.globals, errors) {
        Some(cr) => global_from_cr(config, &cr),
        None => global_from_annotations(config, annotations, errors),
    };
    let log_targets = match cr_lookup(
        store,
        annotations,
        "cr-log-targets",
        |ns| &ns.crs.log_targets,
        errors,
    ) {
        Some(cr) => log_targets_from_cr(&cr),
        None => match annotations.string("syslog-server") {
            Some(value) => parse_syslog_servers(&value).unwrap_or_else(|e| {
                errors.push(e);
                Vec::new()
            }),
            None => Vec::new(),
        },
    };
    let defaults = match cr_lookup(store, annotations, "cr-defaults", |ns| &ns.crs.defaults, errors)
    {
        Some(cr) => defaults_from_cr(&cr),
        None => defaults_from_annotations(annotations, errors),
    };
    GlobalSettings {
        global,
        log_targets,
        defaults,
    }
}

fn cr_lookup<T: Clone>(
    store: &K8sStore,
    annotations: AnnotationSet<'_>,
    name: &str,
    pick: impl Fn(&crate::store::Namespace) -> &BTreeMap<String, T>,
    errors: &mut ErrorList,
) -> Option<T> {
    let value = annotations.string(name)?;
    let reference = match ObjectRef::parse(&value) {
        Ok(r) => r,
        Err(reason) => {
            errors.push(AnnotationError::invalid(name, &value, reason));
            return None;
        }
    };
    let found = store
        .namespaces
        .get(&reference.namespace)
        .and_then(|ns| pick(ns).get(&reference.name))
        .cloned();
    if found.is_none() {
        errors.push(AnnotationError::invalid(name, &value, "custom resource not found"));
    }
    found
}

fn base_global(config: &ControllerConfig) -> Global {
    Global {
        master_worker: true,
        pidfile: Some(config.paths.runtime_dir.join("haproxy.pid").display().to_string()),
        stats_socket: Some(config.runtime_socket.display().to_string()),
        ..Global::default()
    }
}

fn global_from_cr(config: &ControllerConfig, cr: &GlobalCrSpec) -> Global {
    Global {
        maxconn: cr.maxconn,
        nbthread: cr.nbthread,
        hard_stop_after: cr.hard_stop_after.clone(),
        ssl_default_bind_options: cr.ssl_default_bind_options.clone(),
        ssl_default_bind_ciphers: cr.ssl_default_bind_ciphers.clone(),
        ..base_global(config)
    }
}

fn global_from_annotations(
    config: &ControllerConfig,
    annotations: AnnotationSet<'_>,
    errors: &mut ErrorList,
) -> Global {
    let mut global = base_global(config);
    match annotations.int("maxconn") {
        Ok(v) => global.maxconn = v,
        Err(e) => errors.push(e),
    }
    match annotations.int("nbthread") {
        Ok(v) => global.nbthread = v,
        Err(e) => errors.push(e),
    }
    match annotations.timeout("hard-stop-after") {
        Ok(v) => global.hard_stop_after = v,
        Err(e) => errors.push(e),
    }
    global.ssl_default_bind_options = annotations.string("ssl-options");
    global.ssl_default_bind_ciphers = annotations.string("ssl-ciphers");
    global
}

fn log_targets_from_cr(cr: &LogTargetsCrSpec) -> Vec<LogTarget> {
    cr.targets
        .iter()
        .map(|t| LogTarget {
            address: t.address.clone(),
            facility: t.facility.clone(),
            level: t.level.clone(),
            format: t.format.clone(),
            length: t.length,
        })
        .collect()
}

/// Parse `syslog-server`: one target per line, each a comma separated list of
/// `address`, `port`, `facility`, `level`, `format` and `length` entries.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] on an unknown key, a malformed entry or a target
/// without address.
pub fn parse_syslog_servers(value: &str) -> Result<Vec<LogTarget>, AnnotationError> {
    const NAME: &str = "syslog-server";
    let mut targets = Vec::new();
    for line in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut target = LogTarget::default();
        let mut port = None;
        for part in line.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, val) = part
                .split_once(':')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| AnnotationError::invalid(NAME, line, "expected 'key: value'"))?;
            match key {
                "address" => target.address = val.to_string(),
                "port" => port = Some(val.to_string()),
                "facility" => target.facility = Some(val.to_string()),
                "level" => target.level = Some(val.to_string()),
                "format" => target.format = Some(val.to_string()),
                "length" => target.length = Some(parse_int(NAME, val)?),
                _ => {
                    return Err(AnnotationError::invalid(
                        NAME,
                        line,
                        format!("unknown key '{key}'"),
                    ))
                }
            }
        }
        if target.address.is_empty() {
            return Err(AnnotationError::invalid(NAME, line, "missing address"));
        }
        if let Some(port) = port {
            target.address = format!("{}:{port}", target.address);
        }
        if target.address == "stdout" {
            target.format.get_or_insert_with(|| "raw".to_string());
        }
        targets.push(target);
    }
    Ok(targets)
}

/// Quote a log format for the configuration file.
fn quoted_log_format(format: &str) -> String {
    let format = format.trim();
    if format.starts_with('\'') || format.starts_with('"') {
        format.to_string()
    } else {
        format!("'{format}'")
    }
}

fn defaults_from_cr(cr: &DefaultsCrSpec) -> Defaults {
    Defaults {
        mode: Mode::Http,
        log_global: true,
        log_format: cr.log_format.as_deref().map(quoted_log_format),
        dontlognull: cr.dontlognull,
        logasap: cr.logasap,
        http_connection_mode: cr.http_connection_mode.clone(),
        timeouts: cr.timeouts.clone(),
        ..Defaults::default()
    }
}

fn defaults_from_annotations(annotations: AnnotationSet<'_>, errors: &mut ErrorList) -> Defaults {
    let mut defaults = Defaults {
        mode: Mode::Http,
        log_global: true,
        log_format: annotations.string("log-format").as_deref().map(quoted_log_format),
        ..Defaults::default()
    };
    for (field, name) in [
        (&mut defaults.dontlognull, "dontlognull"),
        (&mut defaults.logasap, "logasap"),
    ] {
        match annotations.bool(name) {
            Ok(v) => *field = v,
            Err(e) => errors.push(e),
        }
    }
    if let Some(mode) = annotations.string("http-connection-mode") {
        if HTTP_CONNECTION_MODES.contains(&mode.as_str()) {
            defaults.http_connection_mode = Some(mode);
        } else {
            errors.push(AnnotationError::invalid(
                "http-connection-mode",
                &mode,
                "expected http-keep-alive, http-server-close or httpclose",
            ));
        }
    }
    for timeout in TIMEOUTS {
        match annotations.timeout(&format!("timeout-{timeout}")) {
            Ok(Some(value)) => {
                defaults.timeouts.insert(timeout.to_string(), value);
            }
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    defaults
}

#[cfg(test)]
#[path = "global_tests.rs"]
mod global_tests;
