//! Session lifecycle endpoints: creation, uploads and stage requests.

use axum::{
    body::Bytes,
    extract::{multipart::Multipart, rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use ezbids_core::{DefaceRequest, LedgerMerge, Session, SessionStatus, StoredFile};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing sessions
#[derive(Debug, Deserialize)]
pub struct ListSessionsParams {
    /// Only sessions in this status
    pub status: Option<String>,
}

/// Response for listing sessions
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
    pub total: usize,
}

/// Response for a multipart upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<StoredFile>,
}

/// Per-image deface state
#[derive(Debug, Serialize)]
pub struct DefaceStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub complete: bool,
    #[serde(flatten)]
    pub merge: LedgerMerge,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new session
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = state.requests().create_session().await?;
    info!("Created session {}", session.id);
    Ok((StatusCode::CREATED, Json(session)))
}

/// List sessions, oldest first
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListSessionsParams>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let statuses = match params.status.as_deref() {
        Some(raw) => vec![raw
            .parse::<SessionStatus>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?],
        None => SessionStatus::ALL.to_vec(),
    };

    let mut sessions = Vec::new();
    for status in statuses {
        sessions.extend(state.store().list_by_status(status)?);
    }
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

/// Get a session record
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.store().get(&id)?))
}

/// Delete a session and its working directory
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state.requests().delete_session(&id).await?;
    info!("Deleted session {}", id);
    Ok(Json(session))
}

/// Store uploaded files in the session working directory.
///
/// Each part is written to its file name (or field name when no file name is
/// given), which may contain subdirectories.
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(ApiError::bad_request(format!("Invalid multipart body: {}", e))),
        };

        let relative = field
            .file_name()
            .or_else(|| field.name())
            .unwrap_or("")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read {}: {}", relative, e)))?;

        files.push(state.uploads().store_file(&id, &relative, &data).await?);
    }

    if files.is_empty() {
        return Err(ApiError::bad_request("No files in request"));
    }

    info!("Stored {} files for session {}", files.len(), id);
    Ok(Json(UploadResponse { files }))
}

/// Mark the upload complete, queueing the session for preprocessing
pub async fn upload_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.uploads().mark_complete(&id).await?))
}

/// Request defacing of anatomical images
pub async fn request_deface(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<DefaceRequest>, JsonRejection>,
) -> Result<Json<Session>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let session = state.requests().request_deface(&id, request).await?;
    info!("Deface requested for session {}", id);
    Ok(Json(session))
}

/// Per-image deface state merged from the ledgers
pub async fn get_deface_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DefaceStatusResponse>, ApiError> {
    let merge = state.gateway().deface_status(&id).await?;
    let session = state.store().get(&id)?;
    Ok(Json(DefaceStatusResponse {
        session_id: session.id,
        status: session.status,
        complete: merge.is_complete(),
        merge,
    }))
}

/// Submit the finalize payload, queueing BIDS generation
pub async fn request_finalize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Session>, ApiError> {
    let session = state.requests().request_finalize(&id, &body).await?;
    info!("Finalize requested for session {}", id);
    Ok(Json(session))
}
