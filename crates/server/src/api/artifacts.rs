//! Artifact downloads through the gateway.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::error::ApiError;
use crate::state::AppState;

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "json" => "application/json",
        "log" | "err" | "out" | "failed" | "tsv" | "txt" | "md" => "text/plain; charset=utf-8",
        "png" => "image/png",
        _ if path == "list" || path == "README" || path == "CHANGES" => {
            "text/plain; charset=utf-8"
        }
        _ => "application/octet-stream",
    }
}

/// Download one file from a session working directory
pub async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.gateway().read(&id, &path).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type(&path))],
        bytes,
    ))
}
