// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use tenant_controller::{
    cluster::KubeCluster,
    config::{self, Config},
    constants::{CONTROLLER_NAME, TOKIO_WORKER_THREADS},
    context::Context,
    controller,
    leader::{KubeLeaseBackend, LeaderElector, LeaderGate},
    metrics::MetricsRecorder,
    server, shutdown,
};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name(CONTROLLER_NAME)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize logging with custom format
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Example: RUST_LOG=debug cargo run
    //
    // Respects RUST_LOG_FORMAT environment variable for output format
    // Example: RUST_LOG_FORMAT=json cargo run
    init_tracing();

    let config = Config::parse();
    config.validate()?;

    info!(
        workers = config.workers,
        sweep_interval_secs = config.sweep_interval_secs,
        leader_election = config.enable_leader_election,
        "Starting Tenant Controller"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let metrics = Arc::new(MetricsRecorder::new()?);
    let (trigger, signal) = shutdown::channel();
    let mut tasks = JoinSet::new();

    let gate = if config.enable_leader_election {
        let identity = config::identity();
        let backend = KubeLeaseBackend::new(client.clone(), config.lease_settings(identity.clone()));
        let (elector, gate) = LeaderElector::new(backend, identity, metrics.clone());
        tasks.spawn(elector.run(signal.clone()));
        gate
    } else {
        info!("Leader election disabled, this replica reconciles unconditionally");
        metrics.set_leader(true);
        LeaderGate::always_leader()
    };

    let metrics_listener = TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics address {}", config.metrics_addr))?;
    let probe_listener = TcpListener::bind(config.probe_addr)
        .await
        .with_context(|| format!("failed to bind probe address {}", config.probe_addr))?;

    tasks.spawn(server::serve(
        metrics_listener,
        server::metrics_router(metrics.clone()),
        "metrics",
        signal.clone(),
    ));
    tasks.spawn(server::serve(
        probe_listener,
        server::probe_router(),
        "probes",
        signal.clone(),
    ));

    let ctx = Context::new(Arc::new(KubeCluster::new(client.clone())), metrics, gate);
    tasks.spawn(controller::run(client, ctx, config.controller_settings(), signal));

    let received = tokio::select! {
        result = wait_for_signal() => result?,
        Some(joined) = tasks.join_next() => {
            error!("CRITICAL: controller task exited unexpectedly: {:?}", joined);
            "task exit"
        }
    };

    info!(signal = received, "Stopping controller and releasing leader election lease...");
    let _ = trigger.send(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Task failed during shutdown");
        }
    }

    info!("Graceful shutdown completed successfully");
    Ok(())
}

fn init_tracing() {
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
}

/// Wait for SIGINT or, on Unix, SIGTERM (pod termination).
async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                Ok("SIGINT")
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
                Ok("SIGTERM")
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown...");
        Ok("SIGINT")
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
