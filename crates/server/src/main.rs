use anyhow::Context;
use db::DBService;
use server::{AppState, routes, runners::BackgroundRunners};
use services::services::config::{load_config_from_file, save_config_to_file};
use tracing_subscriber::{EnvFilter, prelude::*};
use utils::assets::config_path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from `.env` if present
    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils={level},tower_http={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).context("Failed to create tracing filter")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let mut config = load_config_from_file(&config_path()).await;
    // Always save config (fills in defaults for fields added since last run)
    save_config_to_file(&config, &config_path()).await?;

    if let Ok(host) = std::env::var("HOST") {
        config.server.host = host;
    }
    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
    {
        config.server.port = port;
    }
    let address = format!("{}:{}", config.server.host, config.server.port);

    if config.localization.translation_endpoint.is_none() {
        tracing::warn!("No translation endpoint configured - localization jobs will be refused");
    }

    let db = DBService::new().await.context("Failed to open database")?;
    let state = AppState::new(db, config);

    match state.localization().recover_orphaned().await {
        Ok(0) => {}
        Ok(settled) => tracing::warn!("Settled {} localization jobs interrupted by the last shutdown", settled),
        Err(e) => tracing::error!("Failed to settle interrupted localization jobs: {}", e),
    }

    let runners = BackgroundRunners::new(state.clone());
    runners.start().await;

    let app_router = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    tracing::info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app_router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    runners.stop().await;
    tracing::info!("Server stopped");
    Ok(())
}
