// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use haproxy_ingress::{
    action::ActionDecider,
    annotations::AnnotationDefaults,
    config::{Args, ControllerConfig},
    constants::{EVENT_CHANNEL_CAPACITY, TOKIO_WORKER_THREADS},
    context::Context,
    metrics,
    proxy::{
        native::NativeProxy,
        process::{External, MasterSocket, ProcessSupervisor},
        runtime::{RuntimeApi, SocketRuntime},
    },
    reconciler::Reconciler,
    store::K8sStore,
    watch,
};
use kube::Client;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("haproxy-ingress")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT (json | text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting HAProxy Ingress Controller");

    let config = Arc::new(ControllerConfig::try_from(args).map_err(anyhow::Error::msg)?);
    for dir in config.paths.directories() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    debug!(root = %config.paths.root.display(), "configuration directories ready");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let watchers = watch::spawn_all(&client, &tx);
    drop(tx);
    info!(watchers = watchers.len(), "watchers started");

    let metrics_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics_port));
    let controller_addr = (config.prometheus || config.pprof)
        .then(|| SocketAddr::from((Ipv4Addr::LOCALHOST, config.controller_port)));

    let runtime: Arc<dyn RuntimeApi> = Arc::new(SocketRuntime::new(&config.runtime_socket));
    let proxy = NativeProxy::new(config.paths.main_cfg.clone(), Some(runtime));
    let store = K8sStore::new(&config, Arc::new(AnnotationDefaults::builtin()));
    let ctx = Context::new(config.clone(), ActionDecider::new());

    // The controller should never exit - if a task stops, log it and exit the process
    let reconcile = async {
        if config.external {
            run_reconciler(store, proxy, External, ctx, rx).await
        } else {
            let supervisor = MasterSocket::new(
                &config.program,
                &config.master_socket,
                &config.paths.main_cfg,
                &config.paths.aux_cfg,
            );
            run_reconciler(store, proxy, supervisor, ctx, rx).await
        }
    };

    tokio::select! {
        result = reconcile => {
            error!("CRITICAL: reconciler exited: {:?}", result);
            result?;
            anyhow::bail!("reconciler exited unexpectedly without error")
        }
        result = serve(metrics_addr) => {
            error!("CRITICAL: metrics server exited: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        result = serve_optional(controller_addr) => {
            error!("CRITICAL: controller endpoint exited: {:?}", result);
            result?;
            anyhow::bail!("controller endpoint exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
            for watcher in watchers {
                watcher.abort();
            }
            Ok(())
        }
    }
}

async fn run_reconciler<S: ProcessSupervisor>(
    store: K8sStore,
    proxy: NativeProxy,
    supervisor: S,
    ctx: Context,
    rx: mpsc::Receiver<haproxy_ingress::reconciler::ClusterEvent>,
) -> Result<()> {
    Reconciler::new(store, proxy, supervisor, ctx)
        .run(rx, watch::KINDS)
        .await
        .context("reconciler failed")
}

/// Serve the metrics router on `addr`.
async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!(%addr, "serving metrics");
    axum::serve(listener, metrics::router())
        .await
        .context("metrics server failed")
}

/// Local endpoint the proxy forwards its metrics and pprof paths to.
async fn serve_optional(addr: Option<SocketAddr>) -> Result<()> {
    match addr {
        Some(addr) => serve(addr).await,
        None => std::future::pending().await,
    }
}
