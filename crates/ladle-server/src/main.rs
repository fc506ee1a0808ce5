//! Ladle — RAG chat relay between a retrieval service and an LLM upstream.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // All settings are compiled in; constructed once and injected.
    let settings = ladle_core::Settings::default();
    let port = settings.server.port;

    let state = Arc::new(AppState::new(settings));
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("ladle server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
