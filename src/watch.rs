// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch tasks feeding the reconciler.
//!
//! One `kube::runtime::watcher` stream per resource kind. Every notification is converted
//! into a [`ClusterEvent`] carrying the verb as its status:
//!
//! | Watcher event | Status     |
//! |---------------|------------|
//! | `InitApply`   | `Added`    |
//! | `Apply`       | `Modified` |
//! | `Delete`      | `Deleted`  |
//!
//! The end of the initial listing is reported with [`ClusterEvent::InitDone`].

use crate::crd::{Backend, Defaults, Frontend, Global, LogTargets, TCP};
use crate::reconciler::ClusterEvent;
use crate::store::convert::{
    convert_config_map, convert_endpoint_slice, convert_ingress, convert_ingress_class,
    convert_secret, convert_service, convert_tcp,
};
use crate::store::events::{CustomResourceKind, CustomResourceSpec};
use crate::store::Status;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Kinds watched by [`spawn_all`]; the reconciler waits for each of them to sync.
pub const KINDS: [&str; 13] = [
    "Namespace",
    "Ingress",
    "IngressClass",
    "Service",
    "EndpointSlice",
    "Secret",
    "ConfigMap",
    "Backend",
    "Defaults",
    "Global",
    "LogTargets",
    "Frontend",
    "TCP",
];

/// Start one watch task per kind in [`KINDS`].
#[must_use]
pub fn spawn_all(client: &Client, tx: &mpsc::Sender<ClusterEvent>) -> Vec<JoinHandle<()>> {
    vec![
        spawn_watcher::<Namespace, _>(client, "Namespace", tx, namespace_event),
        spawn_watcher::<Ingress, _>(client, "Ingress", tx, |o, status| {
            let mut ingress = convert_ingress(o);
            ingress.status = status;
            Some(ClusterEvent::Ingress(ingress))
        }),
        spawn_watcher::<IngressClass, _>(client, "IngressClass", tx, |o, status| {
            let mut class = convert_ingress_class(o);
            class.status = status;
            Some(ClusterEvent::IngressClass(class))
        }),
        spawn_watcher::<Service, _>(client, "Service", tx, |o, status| {
            let mut service = convert_service(o);
            service.status = status;
            Some(ClusterEvent::Service(service))
        }),
        spawn_watcher::<EndpointSlice, _>(client, "EndpointSlice", tx, endpoints_event),
        spawn_watcher::<Secret, _>(client, "Secret", tx, |o, status| {
            let mut secret = convert_secret(o);
            secret.status = status;
            Some(ClusterEvent::Secret(secret))
        }),
        spawn_watcher::<ConfigMap, _>(client, "ConfigMap", tx, |o, status| {
            let mut config_map = convert_config_map(o);
            config_map.status = status;
            Some(ClusterEvent::ConfigMap(config_map))
        }),
        spawn_watcher::<Backend, _>(client, "Backend", tx, |o, status| {
            custom_resource_event(o, status, CustomResourceKind::Backend, |s| {
                CustomResourceSpec::Backend(s.spec.clone())
            })
        }),
        spawn_watcher::<Defaults, _>(client, "Defaults", tx, |o, status| {
            custom_resource_event(o, status, CustomResourceKind::Defaults, |s| {
                CustomResourceSpec::Defaults(s.spec.clone())
            })
        }),
        spawn_watcher::<Global, _>(client, "Global", tx, |o, status| {
            custom_resource_event(o, status, CustomResourceKind::Global, |s| {
                CustomResourceSpec::Global(s.spec.clone())
            })
        }),
        spawn_watcher::<LogTargets, _>(client, "LogTargets", tx, |o, status| {
            custom_resource_event(o, status, CustomResourceKind::LogTargets, |s| {
                CustomResourceSpec::LogTargets(s.spec.clone())
            })
        }),
        spawn_watcher::<Frontend, _>(client, "Frontend", tx, |o, status| {
            custom_resource_event(o, status, CustomResourceKind::Frontend, |s| {
                CustomResourceSpec::Frontend(s.spec.clone())
            })
        }),
        spawn_watcher::<TCP, _>(client, "TCP", tx, tcp_event),
    ]
}

/// Watch every `K` of the cluster and forward converted notifications to `tx`.
///
/// The stream retries with the watcher's default backoff; the task ends when the
/// reconciler drops its receiver.
fn spawn_watcher<K, F>(
    client: &Client,
    kind: &'static str,
    tx: &mpsc::Sender<ClusterEvent>,
    convert: F,
) -> JoinHandle<()>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
    F: Fn(&K, Status) -> Option<ClusterEvent> + Send + 'static,
{
    let api = Api::<K>::all(client.clone());
    let tx = tx.clone();
    tokio::spawn(async move {
        info!(kind, "starting watcher");
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(watcher::Event::InitApply(obj)) => convert(&obj, Status::Added),
                Ok(watcher::Event::Apply(obj)) => convert(&obj, Status::Modified),
                Ok(watcher::Event::Delete(obj)) => convert(&obj, Status::Deleted),
                Ok(watcher::Event::Init) => {
                    debug!(kind, "listing started");
                    None
                }
                Ok(watcher::Event::InitDone) => Some(ClusterEvent::InitDone(kind)),
                Err(e) => {
                    warn!(kind, error = %e, "watch failed, retrying");
                    None
                }
            };
            let Some(event) = event else {
                continue;
            };
            if tx.send(event).await.is_err() {
                info!(kind, "event channel closed, stopping watcher");
                return;
            }
        }
    })
}

fn namespace_event(ns: &Namespace, status: Status) -> Option<ClusterEvent> {
    Some(ClusterEvent::Namespace {
        name: ns.name_any(),
        labels: ns.labels().clone(),
        status,
    })
}

fn endpoints_event(slice: &EndpointSlice, status: Status) -> Option<ClusterEvent> {
    let mut endpoints = convert_endpoint_slice(slice)?;
    endpoints.status = status;
    Some(ClusterEvent::Endpoints(endpoints))
}

fn tcp_event(tcp: &TCP, status: Status) -> Option<ClusterEvent> {
    let mut resource = convert_tcp(tcp);
    resource.status = status;
    Some(ClusterEvent::Tcp(resource))
}

/// Referenced custom resources are stored by spec only; a deletion carries no spec.
fn custom_resource_event<K: ResourceExt>(
    obj: &K,
    status: Status,
    kind: CustomResourceKind,
    spec: impl Fn(&K) -> CustomResourceSpec,
) -> Option<ClusterEvent> {
    Some(ClusterEvent::CustomResource {
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        kind,
        spec: (status != Status::Deleted).then(|| spec(obj)),
    })
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod watch_tests;
