use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use promptpilot::api;
use promptpilot::config::Config;
use promptpilot::scanner::Bot;
use promptpilot::state::{AppState, AppStateInner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        "promptpilot starting, strategy: {:?}, device: {}, listen: {}",
        config.resolver.strategy,
        config.device_serial.as_deref().unwrap_or("default"),
        config.listen_addr,
    );

    let bot = Bot::from_config(config.clone()).context("failed to set up bot")?;

    let state: AppState = Arc::new(Mutex::new(AppStateInner::new(config.clone())));

    let app = api::router(state, Arc::new(bot)).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
