use std::sync::Arc;

use crate::{config::Settings, error, info, server};

pub async fn serve(settings: &Settings) {
    let service = Arc::new(super::open_service(settings).await);
    let sweeper = service.cache().spawn_sweeper(settings.cache.sweep_interval);

    info!(
        "Serving on {} (cache {}, budget {})",
        settings.server_addr,
        settings.cache.dir.display(),
        super::format_bytes(settings.cache.max_bytes)
    );

    let result = server::start_api_server(Arc::clone(&service), &settings.server_addr).await;
    sweeper.abort();
    if let Err(e) = result {
        error!("Server stopped. Err: {}", e);
    }
}
