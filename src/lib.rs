// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # HAProxy Ingress - Kubernetes Ingress Controller for HAProxy
//!
//! Watches Ingress, Service, EndpointSlice, Secret, ConfigMap, IngressClass and the
//! `ingress.v3.haproxy.org` custom resources, and keeps a running HAProxy configured to
//! route the traffic they describe.
//!
//! ## Overview
//!
//! Cluster notifications are merged into an in-memory store. A reconcile turns the store
//! into HAProxy configuration through a transactional proxy API, and decides whether the
//! change can be applied live through the runtime socket or needs a reload or restart.
//! Endpoint churn is absorbed by pre-allocated server slots so scaling a deployment does
//! not reload the proxy.
//!
//! ## Modules
//!
//! - [`store`] - cluster state and the event merge rules
//! - [`reconciler`] - the event loop and the reconcile pipeline
//! - [`handlers`] - pipeline stages around the ingress translation
//! - [`ingress`] / [`service`] / [`route`] - translation of ingresses and their services
//! - [`annotations`] - annotation resolution and the parsers behind each annotation
//! - [`certs`], [`maps`], [`files`], [`snippets`] - managed files and config snippets
//! - [`proxy`] - proxy API, configuration rendering, runtime socket and process supervision
//! - [`watch`] - Kubernetes watch tasks
//! - [`metrics`] - Prometheus metrics and the controller HTTP endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use haproxy_ingress::action::ActionDecider;
//! use haproxy_ingress::annotations::AnnotationDefaults;
//! use haproxy_ingress::config::ControllerConfig;
//! use haproxy_ingress::context::Context;
//! use haproxy_ingress::proxy::native::NativeProxy;
//! use haproxy_ingress::proxy::process::External;
//! use haproxy_ingress::reconciler::Reconciler;
//! use haproxy_ingress::store::K8sStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> haproxy_ingress::errors::Result<()> {
//! let config = Arc::new(ControllerConfig::with_root(Path::new("/etc/haproxy")));
//! let store = K8sStore::new(&config, Arc::new(AnnotationDefaults::builtin()));
//! let proxy = NativeProxy::new(config.paths.main_cfg.clone(), None);
//! let ctx = Context::new(config, ActionDecider::new());
//!
//! let mut reconciler = Reconciler::new(store, proxy, External, ctx);
//! reconciler.reconcile().await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod annotations;
pub mod certs;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod files;
pub mod handlers;
pub mod ingress;
pub mod maps;
pub mod metrics;
pub mod proxy;
pub mod reconciler;
pub mod refcount;
pub mod route;
pub mod rules;
pub mod service;
pub mod snippets;
pub mod store;
pub mod watch;
