use std::sync::Arc;

use anyhow::Result;
use axum::{routing::post, Router};
use tower_http::cors::CorsLayer;

mod chat;
mod config;

use chat::RelayState;
use config::RelayConfig;

fn app(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from_env()?;
    if config.api_key.is_none() {
        log::warn!("no RELAY_API_KEY or GROQ_API_KEY set; every request will fail");
    }
    log::info!(
        "relaying to {} with model {}",
        config.upstream_url,
        config.model
    );

    let addr = config.addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on http://{}", addr);

    axum::serve(listener, app(Arc::new(RelayState::new(config)))).await?;
    Ok(())
}
