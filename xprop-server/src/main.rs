//! xprop-server - gRPC satellite propagation daemon
//!
//! The server:
//! - Loads configuration from YAML and `SERVICE_*` environment variables
//! - Serves `api.v1.Propagator` and `grpc.health.v1.Health`
//! - Registers gRPC reflection when `reflection` is enabled
//! - Logs every call with its method and latency
//! - Sweeps idle satellites from the propagator cache
//! - Optionally exposes Prometheus metrics
//! - Drains in-flight calls on SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xprop::config::ServiceConfig;
use xprop::dispatch::Dispatcher;
use xprop::metrics::{PrometheusExporter, ServiceMetrics};
use xprop_server::grpc_server::{self, BuildInfo};

#[derive(Parser)]
#[command(name = "xprop-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "gRPC satellite propagation service", long_about = None)]
struct Args {
    #[arg(short, long, help = "Path to the YAML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Listen address, overrides the configuration")]
    host: Option<String>,

    #[arg(short, long, help = "Listen port, overrides the configuration")]
    port: Option<u16>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(long, help = "Print build information and exit")]
    print_build: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let build = BuildInfo::current();

    if args.print_build {
        println!("version:    {}", build.version);
        println!("commit:     {}", build.commit);
        println!("build date: {}", build.build_date);
        return Ok(());
    }

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "xprop-server v{} ({}, built {}) starting...",
        build.version, build.commit, build.build_date
    );

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let addr = config.socket_addr().context("Invalid listen address")?;

    let metrics = ServiceMetrics::new().context("Failed to create metrics registry")?;
    #[cfg(target_os = "linux")]
    metrics
        .registry()
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
        .context("Failed to register process metrics")?;

    let dispatcher = Dispatcher::new(
        config.satellite_cache(),
        config.dispatch_settings(),
        metrics.clone(),
    );
    let sweeper = dispatcher.spawn_cache_sweeper(config.gc.sweep_interval);

    let shutdown = CancellationToken::new();

    let exporter = match config.metrics_addr()? {
        Some(metrics_addr) => {
            let exporter = PrometheusExporter::new(metrics, metrics_addr);
            let listener = exporter
                .bind()
                .await
                .context("Failed to bind metrics endpoint")?;
            Some(tokio::spawn(exporter.serve(listener, shutdown.clone())))
        }
        None => None,
    };

    let server_token = shutdown.clone();
    let mut server = tokio::spawn(grpc_server::serve(
        addr,
        dispatcher.clone(),
        build,
        config.reflection,
        async move { server_token.cancelled().await },
    ));

    info!("xprop-server running on {}. Press Ctrl+C to exit.", addr);

    tokio::select! {
        result = &mut server => {
            shutdown.cancel();
            dispatcher.shutdown();
            return result
                .context("gRPC server task panicked")?
                .context("gRPC server failed");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    info!(
        "Waiting up to {:?} for in-flight calls",
        config.graceful_stop_timeout
    );
    match tokio::time::timeout(config.graceful_stop_timeout, &mut server).await {
        Ok(result) => result
            .context("gRPC server task panicked")?
            .context("gRPC server failed")?,
        Err(_) => {
            warn!("Graceful stop timed out, cancelling active streams");
            dispatcher.shutdown();
            server.abort();
        }
    }

    dispatcher.shutdown();
    let _ = sweeper.await;
    if let Some(exporter) = exporter {
        if let Ok(Err(e)) = exporter.await {
            warn!("Metrics exporter failed: {}", e);
        }
    }

    info!("xprop-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
