// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `magents serve` - HTTP API over the lifecycle orchestrator

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

use magents_core::infrastructure::event_bus::{EventBusError, EventReceiver};
use magents_core::presentation::api;

use crate::embedded::{build_orchestrator, load_config};
use crate::Globals;

#[derive(Args)]
pub struct ServeArgs {
    /// Bind address (default: spec.api.bind_address)
    #[arg(long, env = "MAGENTS_HOST")]
    host: Option<String>,

    /// Port (default: spec.api.port)
    #[arg(long, env = "MAGENTS_PORT")]
    port: Option<u16>,
}

pub async fn handle_command(args: ServeArgs, globals: &Globals) -> Result<()> {
    let config = load_config(globals.config_path.clone())?;
    let host = args.host.unwrap_or_else(|| config.spec.api.bind_address.clone());
    let port = args.port.unwrap_or(config.spec.api.port);

    let orchestrator = Arc::new(build_orchestrator(config).await?);
    tokio::spawn(log_events(orchestrator.events().subscribe()));

    // Drift left by earlier crashes is reported, not repaired
    match orchestrator.reconcile(false).await {
        Ok(report) if report.is_clean() => info!("Registry and containers agree"),
        Ok(report) => warn!(
            issues = report.issue_count(),
            "Registry drift detected; run 'magents agent reconcile --fix-orphaned'"
        ),
        Err(e) => warn!(error = %e, "Startup reconcile failed"),
    }

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("magents API listening on {}", addr);

    axum::serve(listener, api::app(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("magents API shutting down");

    Ok(())
}

async fn log_events(mut receiver: EventReceiver) {
    loop {
        match receiver.recv().await {
            Ok(event) => match event.agent_id() {
                Some(agent_id) => debug!(agent_id = %agent_id, event = ?event, "Lifecycle event"),
                None => debug!(event = ?event, "Lifecycle event"),
            },
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
