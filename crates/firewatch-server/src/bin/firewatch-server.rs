use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use firewatch::config::{Config, DEFAULT_CONFIG_FILE};
use firewatch::ForecastService;
use firewatch_server::{AppState, router, run_scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Never)
        .init();

    let config_path = std::env::var("FIREWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = Arc::new(
        Config::load_from_path(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?,
    );

    let service = ForecastService::from_config(config.clone())
        .context("Failed to create feed scraper")?;
    let state = Arc::new(AppState::new(service));

    let ct = tokio_util::sync::CancellationToken::new();

    if config.server.scheduler_enabled {
        tokio::spawn(run_scheduler(
            state.clone(),
            config.update_frequency.interval(),
            ct.child_token(),
        ));
    }

    let address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| config.server.bind_address.clone());
    let tcp_listener = tokio::net::TcpListener::bind(&address).await?;

    log::info!("Starting firewatch server on address: {}", address);

    axum::serve(tcp_listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
            }
            ct.cancel();
        })
        .await?;

    Ok(())
}
