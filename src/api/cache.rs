use std::sync::Arc;

use axum::{Extension, response::Json};
use serde_json::{Value, json};

use crate::service::StreamService;

pub async fn cache_index(Extension(service): Extension<Arc<StreamService>>) -> Json<Value> {
    let cache = service.cache();
    Json(json!({
        "budget": cache.settings().max_bytes,
        "ready_bytes": cache.ready_bytes(),
        "entries": cache.snapshot(),
    }))
}
