// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The reconcile loop.
//!
//! Watch tasks send [`ClusterEvent`]s over a bounded channel. The [`Reconciler`] is their
//! only consumer and the only owner of the store: it merges events in batches, and once
//! every watched kind reported its initial sync it runs a reconcile whenever the store
//! changed.
//!
//! One reconcile opens a proxy transaction, runs the handlers registered before the
//! ingresses, translates every supported ingress, runs the handlers registered after
//! them, commits, and then asks the process supervisor to start, reload or restart the
//! proxy. A failed commit is rolled back and the pending reload/restart flags are kept for
//! the next attempt.

use crate::action::ProcessAction;
use crate::context::Context;
use crate::errors::{ControllerError, ErrorList, Result};
use crate::handlers::{after_ingress, before_ingress, Handler};
use crate::ingress::translate_ingress;
use crate::metrics;
use crate::proxy::process::ProcessSupervisor;
use crate::proxy::ProxyApi;
use crate::store::events::{CustomResourceKind, CustomResourceSpec};
use crate::store::{
    ConfigMap, Endpoints, Ingress, IngressClass, K8sStore, Secret, Service, Status, TcpResource,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A notification from a watch task.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Namespace {
        name: String,
        labels: BTreeMap<String, String>,
        status: Status,
    },
    Ingress(Ingress),
    IngressClass(IngressClass),
    Service(Service),
    Endpoints(Endpoints),
    Secret(Secret),
    ConfigMap(ConfigMap),
    CustomResource {
        namespace: String,
        name: String,
        kind: CustomResourceKind,
        /// `None` on deletion
        spec: Option<CustomResourceSpec>,
    },
    Tcp(TcpResource),
    /// The watcher of `kind` listed every existing object.
    InitDone(&'static str),
}

impl ClusterEvent {
    /// Resource kind, used in logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace { .. } => "Namespace",
            Self::Ingress(_) => "Ingress",
            Self::IngressClass(_) => "IngressClass",
            Self::Service(_) => "Service",
            Self::Endpoints(_) => "EndpointSlice",
            Self::Secret(_) => "Secret",
            Self::ConfigMap(_) => "ConfigMap",
            Self::CustomResource { kind, .. } => match kind {
                CustomResourceKind::Backend => "Backend",
                CustomResourceKind::Defaults => "Defaults",
                CustomResourceKind::Global => "Global",
                CustomResourceKind::LogTargets => "LogTargets",
                CustomResourceKind::Frontend => "Frontend",
            },
            Self::Tcp(_) => "TCP",
            Self::InitDone(kind) => kind,
        }
    }
}

/// Merge `event` into `store`; true when a reconcile is needed.
pub fn apply_event(store: &mut K8sStore, event: ClusterEvent) -> bool {
    match event {
        ClusterEvent::Namespace {
            name,
            labels,
            status,
        } => store.event_namespace(&name, labels, status),
        ClusterEvent::Ingress(ingress) => store.event_ingress(ingress),
        ClusterEvent::IngressClass(class) => store.event_ingress_class(class),
        ClusterEvent::Service(service) => store.event_service(service),
        ClusterEvent::Endpoints(endpoints) => store.event_endpoints(endpoints),
        ClusterEvent::Secret(secret) => store.event_secret(secret),
        ClusterEvent::ConfigMap(config_map) => store.event_config_map(config_map),
        ClusterEvent::CustomResource {
            namespace,
            name,
            kind,
            spec,
        } => store.event_custom_resource(&namespace, &name, spec, kind),
        ClusterEvent::Tcp(tcp) => store.event_tcp(tcp),
        ClusterEvent::InitDone(_) => false,
    }
}

/// Owner of the store, the proxy transaction and the proxy process.
pub struct Reconciler<P: ProxyApi, S: ProcessSupervisor> {
    store: K8sStore,
    proxy: P,
    supervisor: S,
    ctx: Context,
    before: Vec<Box<dyn Handler>>,
    after: Vec<Box<dyn Handler>>,
}

impl<P: ProxyApi, S: ProcessSupervisor> Reconciler<P, S> {
    /// Build a reconciler with the handler stages enabled by `ctx.config`.
    pub fn new(store: K8sStore, proxy: P, supervisor: S, ctx: Context) -> Self {
        let before = before_ingress(&ctx.config);
        let after = after_ingress(&ctx.config);
        Self {
            store,
            proxy,
            supervisor,
            ctx,
            before,
            after,
        }
    }

    #[must_use]
    pub fn store(&self) -> &K8sStore {
        &self.store
    }

    #[must_use]
    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Merge one event into the store.
    pub fn apply(&mut self, event: ClusterEvent) -> bool {
        let kind = event.kind();
        let changed = apply_event(&mut self.store, event);
        metrics::record_event(kind, changed);
        changed
    }

    /// Run one reconcile and act on the proxy process.
    ///
    /// Returns the reload/restart flags raised by the reconcile. The first reconcile starts
    /// the proxy whatever the flags.
    ///
    /// # Errors
    ///
    /// - the transaction could not be opened or committed; it is rolled back and the
    ///   reload/restart flags stay raised
    /// - a stage failed with a fatal error
    /// - the supervisor could not start, reload or restart the proxy
    pub async fn reconcile(&mut self) -> Result<ProcessAction> {
        let started = Instant::now();
        debug!("reconcile started");
        self.ctx.begin_reconcile();
        self.proxy.start_transaction()?;

        if let Err(e) = self.run_stages().await {
            self.proxy.rollback_transaction();
            metrics::record_reconcile_error(started.elapsed());
            return Err(e);
        }

        let outcome = match self.proxy.commit_transaction().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.proxy.rollback_transaction();
                metrics::record_reconcile_error(started.elapsed());
                warn!(error = %e, "transaction rolled back");
                return Err(e.into());
            }
        };
        for failure in &outcome.runtime_failures {
            self.ctx
                .action
                .reload(format!("runtime update failed: {failure}"));
        }

        // The configuration on disk now reflects the store.
        let first_run = self.ctx.first_run;
        self.store.clean();
        self.ctx.end_reconcile();

        let action = self.ctx.action.action();
        let (label, result) = if first_run {
            ("start", self.supervisor.start().await)
        } else {
            match action {
                ProcessAction::Restart => ("restart", self.supervisor.restart().await),
                ProcessAction::Reload => ("reload", self.supervisor.reload().await),
                ProcessAction::None => ("none", Ok(())),
            }
        };
        if label != "none" {
            metrics::record_proxy_action(label, result.is_ok());
        }
        match result {
            Ok(()) => {
                self.ctx.action.reset();
                metrics::record_reconcile_success(started.elapsed());
                info!(
                    version = outcome.version,
                    written = outcome.written,
                    action = label,
                    duration_ms = started.elapsed().as_millis(),
                    "reconcile done"
                );
                Ok(action)
            }
            Err(e) if first_run => Err(ControllerError::Fatal(format!("proxy start: {e}"))),
            Err(e) => {
                error!(error = %e, action = label, "proxy process request failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<()> {
        for handler in &mut self.before {
            let result = handler
                .update(&mut self.store, &mut self.proxy, &mut self.ctx)
                .await;
            check(handler.name(), result)?;
        }

        let ingresses: Vec<Ingress> = self.store.sorted_ingresses().into_iter().cloned().collect();
        for ingress in &ingresses {
            let mut errors = ErrorList::new();
            let result = translate_ingress(
                &mut self.store,
                &mut self.proxy,
                &mut self.ctx,
                ingress,
                &mut errors,
            );
            errors.add(result);
            check(
                &format!("ingress {}/{}", ingress.namespace, ingress.name),
                errors.into_result(),
            )?;
        }

        for handler in &mut self.after {
            let result = handler
                .update(&mut self.store, &mut self.proxy, &mut self.ctx)
                .await;
            check(handler.name(), result)?;
        }
        Ok(())
    }

    /// Consume `events` until the channel closes.
    ///
    /// No reconcile runs before every kind in `kinds` reported [`ClusterEvent::InitDone`].
    /// A failed reconcile is retried on the next sync period tick.
    ///
    /// # Errors
    ///
    /// Fatal errors only; everything else is logged and retried.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ClusterEvent>,
        kinds: impl IntoIterator<Item = &'static str>,
    ) -> Result<()> {
        let config = self.ctx.config.clone();
        let mut waiting: BTreeSet<&'static str> = kinds.into_iter().collect();
        let mut ticker = tokio::time::interval(config.sync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dirty = false;

        info!(kinds = waiting.len(), "waiting for initial sync");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event channel closed, stopping reconciler");
                        return Ok(());
                    };
                    dirty |= self.absorb(event, &mut waiting);
                    let deadline = tokio::time::Instant::now() + config.events_batch_window;
                    let mut count = 1;
                    while count < config.events_batch_size {
                        match tokio::time::timeout_at(deadline, events.recv()).await {
                            Ok(Some(event)) => {
                                dirty |= self.absorb(event, &mut waiting);
                                count += 1;
                            }
                            Ok(None) | Err(_) => break,
                        }
                    }
                    debug!(events = count, "event batch merged");
                }
                _ = ticker.tick() => {}
            }

            if !waiting.is_empty() || !(dirty || self.ctx.first_run) {
                continue;
            }
            match self.reconcile().await {
                Ok(_) => dirty = false,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(error = %e, "reconcile failed, retrying on next tick");
                    dirty = true;
                }
            }
        }
    }

    fn absorb(&mut self, event: ClusterEvent, waiting: &mut BTreeSet<&'static str>) -> bool {
        if let ClusterEvent::InitDone(kind) = event {
            if waiting.remove(kind) {
                info!(kind, remaining = waiting.len(), "initial sync done");
            }
            return false;
        }
        self.apply(event)
    }
}

/// Log the errors of a stage; only fatal errors stop the reconcile.
fn check(stage: &str, result: Result<()>) -> Result<()> {
    let Err(err) = result else {
        return Ok(());
    };
    if err.is_fatal() {
        error!(stage, error = %err, "fatal error");
        metrics::record_error("fatal");
        return Err(err);
    }
    let errors = match err {
        ControllerError::Multiple(errors) => errors,
        e => vec![e],
    };
    for e in errors {
        metrics::record_error(e.kind());
        if e.is_not_found() {
            warn!(stage, error = %e, "skipped");
        } else {
            error!(stage, error = %e, "stage error");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
