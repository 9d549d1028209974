use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use grid_broker::{BrokerBridge, LivenessHandler, MemoryBroker, QueueResponder};
use grid_gateway::{AppState, GatewayConfig, serve};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "grid-gateway")]
#[command(about = "Serve grid push channels and command sending over HTTP")]
struct Args {
    /// Directory holding gateway.toml (defaults to the current directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Answer liveness commands for this tenant (repeatable)
    #[arg(long = "tenant")]
    tenants: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "grid_gateway=debug,grid_broker=debug,tower_http=debug,info"
    } else {
        "grid_gateway=info,grid_broker=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let mut config = GatewayConfig::load(&config_dir).context("loading gateway config")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    for tenant in args.tenants {
        if !config.responder_tenants.contains(&tenant) {
            config.responder_tenants.push(tenant);
        }
    }

    let bridge = Arc::new(BrokerBridge::with_reply_buffer(
        MemoryBroker::with_capacity(config.queue_capacity),
        config.reply_buffer,
    ));

    let responders = CancellationToken::new();
    let mut responder_tasks = Vec::new();
    let responder = QueueResponder::new(LivenessHandler);
    for tenant in &config.responder_tenants {
        let tasks = responder
            .serve_tenant(bridge.broker(), tenant, responders.clone())
            .await
            .with_context(|| format!("starting liveness responder for {tenant}"))?;
        info!(tenant = %tenant, "liveness responder started");
        responder_tasks.extend(tasks);
    }

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("grid gateway listening on http://{addr}");

    let shutdown_signal = {
        let responders = responders.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("no Ctrl+C handler, running until killed: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal, cleaning up...");
            responders.cancel();
        }
    };

    let server_result = serve(listener, AppState::new(bridge.clone()), shutdown_signal)
        .await
        .context("Server error");

    for task in responder_tasks {
        if let Err(e) = task.await {
            warn!("responder task ended abnormally: {e}");
        }
    }
    // sessions opened while draining
    bridge.shutdown().await;
    info!("shutdown complete");

    server_result
}
