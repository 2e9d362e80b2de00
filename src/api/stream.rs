use std::sync::Arc;

use axum::{
    Extension,
    body::Body,
    extract::{Path, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{error::StreamError, service::StreamService, types::TrackQuery};

/// Query string accepted by both stream routes.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub isrc: Option<String>,
    pub title: Option<String>,
    /// Comma-separated artist names.
    pub artists: Option<String>,
    /// Duration hint in seconds.
    pub duration: Option<u32>,
    /// Free-text hint, used as the title when none is given.
    pub q: Option<String>,
    /// Upstream catalog id.
    pub id: Option<String>,
}

impl StreamParams {
    pub fn into_query(self) -> TrackQuery {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .or(self.q)
            .unwrap_or_default();
        let artists = self
            .artists
            .map(|list| {
                list.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        TrackQuery {
            title: title.trim().to_string(),
            artists,
            duration_hint: self.duration,
            external_id: self.isrc.filter(|i| !i.trim().is_empty()),
            fallback_id: self.id.filter(|i| !i.trim().is_empty()),
        }
    }
}

pub async fn stream_by_isrc(
    Path(isrc): Path<String>,
    Query(mut params): Query<StreamParams>,
    Extension(service): Extension<Arc<StreamService>>,
) -> Response {
    params.isrc = Some(isrc);
    respond(&service, params.into_query()).await
}

pub async fn stream(
    Query(params): Query<StreamParams>,
    Extension(service): Extension<Arc<StreamService>>,
) -> Response {
    respond(&service, params.into_query()).await
}

async fn respond(service: &StreamService, query: TrackQuery) -> Response {
    let title = query.title.clone();
    let stream = match service.request_stream(query).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(title = %title, error = %e, "api: stream request failed");
            return error_response(&e);
        }
    };
    info!(key = %stream.key, length = ?stream.content_length, "api: streaming");

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream.content_type)
        .header(header::ACCEPT_RANGES, "none")
        .header(header::CACHE_CONTROL, "public, max-age=86400");
    if let Some(length) = stream.content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    match response.body(Body::from_stream(stream.into_stream())) {
        Ok(response) => response,
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// HTTP status a failed stream request is reported with.
pub fn status_for(err: &StreamError) -> StatusCode {
    match err {
        StreamError::NoSourceFound(_) => StatusCode::NOT_FOUND,
        StreamError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        StreamError::Busy(_) => StatusCode::CONFLICT,
        StreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: &StreamError) -> Response {
    (
        status_for(err),
        Json(json!({
            "status": "error",
            "message": err.to_string(),
        })),
    )
        .into_response()
}
