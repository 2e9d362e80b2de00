use std::{net::SocketAddr, str::FromStr, sync::Arc};

use axum::{Extension, Router, routing::get};
use tracing::info;

use crate::{Res, api, service::StreamService};

/// Routes of the HTTP glue, with the service shared through an extension.
pub fn router(service: Arc<StreamService>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/cache", get(api::cache_index))
        .route("/api/stream", get(api::stream))
        .route("/api/stream/{isrc}", get(api::stream_by_isrc))
        .layer(Extension(service))
}

/// Binds `addr` and serves until the process is stopped.
pub async fn start_api_server(service: Arc<StreamService>, addr: &str) -> Res<()> {
    let addr = SocketAddr::from_str(addr)
        .map_err(|e| format!("Failed to parse server address '{}': {}", addr, e))?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "server: listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}
