use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use appmon::app::AppContext;
use appmon::{config, http, metrics, state};

#[derive(Debug, Parser)]
#[command(author, version, about = "appmon — live app-server dashboard core")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env APPMON_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let metrics = metrics::AppMetrics::new()?;
    let hub = state::MonitorHub::new(config.presenter_settings());
    let ctx = AppContext::new(config, metrics, hub);

    // The configured instance is monitored from startup; further instances
    // can be started over the ingest API.
    let instance = ctx.config.monitor.instance.clone();
    ctx.hub.start(&instance).await;
    info!(
        instance = %instance,
        location = %ctx.config.monitor.location,
        interval = ?ctx.config.monitor.interval,
        "awaiting samples for monitored instance"
    );

    let router = http::create_router(ctx.clone());

    info!("appmon listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    // Cascade disposal so no listener or pool bundle survives shutdown.
    for id in ctx.hub.list().await {
        ctx.hub.dispose(&id).await;
    }

    Ok(())
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("appmon=info,axum::rejection=trace"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
