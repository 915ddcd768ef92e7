mod cli;

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tickproxy_server::{build_router, default_upstream, AllowedOrigins, AppState, ProxyConfig};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "tickproxy failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.apply(ProxyConfig::from_env()?);
    let addr = SocketAddr::new(config.bind, config.port);

    tracing::info!(
        auth = config.auth_enabled(),
        cache_dir = %config.cache_dir.display(),
        ttl_secs = config.cache_ttl.as_secs(),
        rate_limit = config.rate_limit_max,
        window_secs = config.rate_limit_window.as_secs(),
        any_origin = matches!(config.allowed_origins, AllowedOrigins::Any),
        "starting tickproxy"
    );
    if !config.auth_enabled() {
        tracing::warn!("basic auth disabled; every caller is anonymous");
    }

    let upstream = default_upstream(&config);
    let app = build_router(AppState::new(config, upstream));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tickproxy listening on http://{addr}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, stopping");
}
