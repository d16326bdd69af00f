// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend section built from service / ingress / ConfigMap annotations.
//!
//! A `cr-backend` reference replaces the annotation-built settings with those of the
//! `Backend` custom resource. The TLS annotations run in a fixed order: `server-ssl`,
//! `server-crt`, `server-ca`, then `server-proto`, each refining what the previous one set.

use super::{parse_bool, parse_load_balance, AnnotationSet};
use crate::certs::{CertManager, SecretType};
use crate::constants::{DEFAULT_ALPN, DYNAMIC_COOKIE_KEY, EXTERNAL_NAME_INIT_ADDR};
use crate::crd::BackendCrSpec;
use crate::errors::{AnnotationError, ControllerError, ErrorList};
use crate::proxy::models::{Backend, Balance, Cookie, HttpCheck, Mode, ServerParams};
use crate::store::Service;
use tracing::warn;

/// Build the backend `name` for `service`.
///
/// Invalid annotations are recorded in `errors` and leave the corresponding setting at its
/// default.
pub fn backend_model(
    name: &str,
    mode: Mode,
    service: &Service,
    annotations: AnnotationSet<'_>,
    certs: &mut CertManager,
    errors: &mut ErrorList,
) -> Backend {
    let mut backend = Backend::new(name, mode);
    let mut params = ServerParams::default();

    if let Some(cr) = cr_backend(service, annotations, errors) {
        apply_cr(&mut backend, &mut params, &cr);
    } else {
        apply_annotations(&mut backend, &mut params, annotations, errors);
    }
    apply_server_tls(&mut params, service, annotations, certs, errors);

    if !service.dns.is_empty() {
        params.init_addr = Some(EXTERNAL_NAME_INIT_ADDR.to_string());
    }
    if params != ServerParams::default() {
        backend.default_server = Some(params);
    }
    backend
}

fn cr_backend(
    service: &Service,
    annotations: AnnotationSet<'_>,
    errors: &mut ErrorList,
) -> Option<BackendCrSpec> {
    let value = annotations.string("cr-backend")?;
    let (namespace, name) = match value.split_once('/') {
        Some((ns, name)) => (ns.to_string(), name.to_string()),
        None => (service.namespace.clone(), value.clone()),
    };
    let found = annotations
        .store()
        .namespaces
        .get(&namespace)
        .and_then(|ns| ns.crs.backends.get(&name))
        .cloned();
    if found.is_none() {
        errors.push(AnnotationError::invalid(
            "cr-backend",
            &value,
            "Backend resource not found",
        ));
    }
    found
}

fn apply_cr(backend: &mut Backend, params: &mut ServerParams, cr: &BackendCrSpec) {
    if let Some(mode) = cr.mode.as_deref() {
        backend.mode = if mode == "tcp" { Mode::Tcp } else { Mode::Http };
    }
    backend.balance = cr.balance.as_ref().map(|b| Balance {
        algorithm: b.algorithm.clone(),
        params: b.params.clone(),
    });
    backend.cookie = cr.cookie.as_ref().map(|c| Cookie {
        name: c.name.clone(),
        kind: c.r#type.clone(),
        indirect: c.indirect,
        nocache: c.nocache,
        dynamic: c.dynamic,
    });
    if backend.cookie.as_ref().is_some_and(|c| c.dynamic) {
        backend.dynamic_cookie_key = Some(DYNAMIC_COOKIE_KEY.to_string());
    }
    backend.forwardfor = cr.forwardfor.unwrap_or(false);
    backend.abortonclose = cr.abortonclose.unwrap_or(false);
    backend.check_timeout = cr.check_timeout.clone();
    backend.httpchk = cr.httpchk.as_ref().map(|c| HttpCheck {
        method: c.method.clone(),
        uri: c.uri.clone(),
    });
    if let Some(ds) = &cr.default_server {
        params.check = ds.check;
        params.inter = ds.inter.clone();
        params.maxconn = ds.maxconn;
        params.send_proxy = ds.send_proxy.clone();
        params.ssl = ds.ssl;
        params.verify = ds.verify.clone();
        params.alpn = ds.alpn.clone();
    }
}

fn apply_annotations(
    backend: &mut Backend,
    params: &mut ServerParams,
    annotations: AnnotationSet<'_>,
    errors: &mut ErrorList,
) {
    match annotations.bool("abortonclose") {
        Ok(v) => backend.abortonclose = v,
        Err(e) => errors.push(e),
    }
    match annotations.timeout("timeout-check") {
        Ok(v) => backend.check_timeout = v,
        Err(e) => errors.push(e),
    }
    if let Some(value) = annotations.string("load-balance") {
        match parse_load_balance(&value) {
            Ok(balance) => backend.balance = Some(balance),
            Err(e) => errors.push(e),
        }
    }
    match annotations.bool("check") {
        Ok(v) => params.check = v,
        Err(e) => errors.push(e),
    }
    match annotations.timeout("check-interval") {
        Ok(v) => params.inter = v,
        Err(e) => errors.push(e),
    }
    match cookie(annotations) {
        Ok(cookie) => {
            if cookie.as_ref().is_some_and(|c| c.dynamic) {
                backend.dynamic_cookie_key = Some(DYNAMIC_COOKIE_KEY.to_string());
            }
            backend.cookie = cookie;
        }
        Err(e) => errors.push(e),
    }
    match annotations.int("pod-maxconn") {
        Ok(v) => params.maxconn = v,
        Err(e) => errors.push(e),
    }
    if let Some(value) = annotations.string("send-proxy-protocol") {
        match send_proxy(&value) {
            Ok(v) => params.send_proxy = Some(v.to_string()),
            Err(e) => errors.push(e),
        }
    }
    if backend.mode == Mode::Http {
        if let Some(value) = annotations.string("check-http") {
            match check_http(&value) {
                Ok(check) => backend.httpchk = Some(check),
                Err(e) => errors.push(e),
            }
        }
        match annotations.bool("forwarded-for") {
            Ok(v) => backend.forwardfor = v,
            Err(e) => errors.push(e),
        }
    }
}

/// TLS towards the servers; applies to annotation and resource built backends alike.
fn apply_server_tls(
    params: &mut ServerParams,
    service: &Service,
    annotations: AnnotationSet<'_>,
    certs: &mut CertManager,
    errors: &mut ErrorList,
) {
    match annotations.bool("server-ssl") {
        Ok(true) => {
            params.ssl = true;
            params.verify = Some("none".to_string());
            params.alpn = Some(DEFAULT_ALPN.to_string());
        }
        Ok(false) => {}
        Err(e) => errors.push(e),
    }

    let store = annotations.store();
    for (annotation, secret_type) in [
        ("server-crt", SecretType::BackendCert),
        ("server-ca", SecretType::CaCert),
    ] {
        let reference = match annotations.secret(annotation, &service.namespace) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        let secret = match store.get_secret(&reference.namespace, &reference.name) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(annotation = annotation, secret = %reference, "secret not found");
                errors.push(e);
                continue;
            }
        };
        let file = match certs.add_secret(secret, secret_type) {
            Ok(file) => file,
            Err(e) => {
                errors.push(ControllerError::from(e));
                continue;
            }
        };
        params.ssl = true;
        params.alpn = Some(DEFAULT_ALPN.to_string());
        if secret_type == SecretType::CaCert {
            params.verify = Some("required".to_string());
            params.ssl_cafile = Some(file);
        } else {
            params.verify = Some("none".to_string());
            params.ssl_certificate = Some(file);
        }
    }

    if let Some(proto) = annotations.string("server-proto") {
        if proto == "h2" {
            if params.alpn.is_none() {
                params.proto = Some(proto);
            }
        } else {
            errors.push(AnnotationError::invalid(
                "server-proto",
                &proto,
                "only 'h2' is supported",
            ));
        }
    }
}

/// `cookie-persistence` (dynamic) or `cookie-persistence-no-dynamic`.
fn cookie(annotations: AnnotationSet<'_>) -> Result<Option<Cookie>, AnnotationError> {
    let dynamic = annotations.string("cookie-persistence");
    let static_ = annotations.string("cookie-persistence-no-dynamic");
    let (name, is_dynamic) = match (dynamic, static_) {
        (Some(_), Some(_)) => {
            return Err(AnnotationError::Conflict {
                first: "cookie-persistence".to_string(),
                second: "cookie-persistence-no-dynamic".to_string(),
            })
        }
        (None, None) => return Ok(None),
        (Some(name), None) => (name, true),
        (None, Some(name)) => (name, false),
    };
    let name = name.split_whitespace().next().unwrap_or_default().to_string();
    let kind = annotations
        .string("cookie-type")
        .unwrap_or_else(|| "insert".to_string());
    let flag = |n: &str| annotations.string(n).map_or(Ok(true), |v| parse_bool(n, &v));
    Ok(Some(Cookie {
        name,
        kind,
        indirect: flag("cookie-indirect")?,
        nocache: flag("cookie-nocache")?,
        dynamic: is_dynamic,
    }))
}

/// Map the `send-proxy-protocol` value to a server keyword.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] on an unknown protocol version.
pub fn send_proxy(value: &str) -> Result<&'static str, AnnotationError> {
    match value.trim().to_lowercase().as_str() {
        "proxy" | "proxy-v1" => Ok("send-proxy"),
        "proxy-v2" => Ok("send-proxy-v2"),
        "proxy-v2-ssl" => Ok("send-proxy-v2-ssl"),
        "proxy-v2-ssl-cn" => Ok("send-proxy-v2-ssl-cn"),
        _ => Err(AnnotationError::invalid(
            "send-proxy-protocol",
            value,
            "expected proxy, proxy-v1, proxy-v2, proxy-v2-ssl or proxy-v2-ssl-cn",
        )),
    }
}

/// Parse `check-http`: `<uri>`, `<method> <uri>` or `<method> <uri> <version...>`.
///
/// # Errors
///
/// [`AnnotationError::InvalidValue`] when the value is empty.
pub fn check_http(value: &str) -> Result<HttpCheck, AnnotationError> {
    let words: Vec<&str> = value.split_whitespace().collect();
    match words.as_slice() {
        [] => Err(AnnotationError::invalid("check-http", value, "missing uri")),
        [uri] => Ok(HttpCheck {
            method: None,
            uri: (*uri).to_string(),
        }),
        [method, rest @ ..] => Ok(HttpCheck {
            method: Some((*method).to_string()),
            uri: rest.join(" "),
        }),
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod backend_tests;
