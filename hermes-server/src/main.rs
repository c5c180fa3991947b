// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Hermes: inter-service call gateway
//
//  Data plane:  axum on a multi-threaded tokio runtime
//  Cache:       per-service TTL cache with background prune
//  Config:      YAML + HERMES_* environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use hermes_core::{HermesConfig, IdentityResolver};
use hermes_observability::ProxyMetrics;
use hermes_proxy::HttpDownstream;
use hermes_server::sink::CallLog;
use hermes_server::{GatewayDeps, build_router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hermes", version, about = "Hermes: inter-service call gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/hermes/hermes.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Hermes starting");

    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        HermesConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        HermesConfig::default()
    };

    // Resolves service hosts through blocking DNS, so it runs before the runtime starts.
    let identity = IdentityResolver::from_services(&config.services);
    info!(applications = identity.len(), "Identity table built");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, identity))
}

async fn run(config: HermesConfig, identity: IdentityResolver) -> anyhow::Result<()> {
    let call_log = CallLog::from_config(&config.log_sink)?;

    let deps = GatewayDeps {
        downstream: Arc::new(HttpDownstream::new(&config.client)?),
        sink: call_log.sink(),
        identity: Arc::new(identity),
        metrics: Arc::new(ProxyMetrics::new(config.metrics.enabled)?),
    };

    let app = build_router(&config, deps)?;

    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(
        addr = %config.server.addr,
        services = config.services.len(),
        client_version = %config.client.version,
        "Hermes is ready, serving traffic"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router and its pipelines are gone; flush what the call log still holds.
    call_log.close().await;

    info!("Hermes stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, stopping...");
}
