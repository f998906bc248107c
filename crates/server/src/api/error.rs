//! Mapping of core errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use ezbids_core::{ArtifactError, RequestError, SessionError};

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn session_status(e: &SessionError) -> StatusCode {
    match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::ClaimConflict { .. } | SessionError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        SessionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::new(session_status(&e), e.to_string())
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        let status = match &e {
            ArtifactError::PathTraversal { .. } => StatusCode::BAD_REQUEST,
            ArtifactError::NotReady { .. } => StatusCode::CONFLICT,
            ArtifactError::NotFound { .. } => StatusCode::NOT_FOUND,
            ArtifactError::Session(inner) => session_status(inner),
            ArtifactError::Malformed { .. } | ArtifactError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        let status = match &e {
            RequestError::InvalidState { .. } => StatusCode::CONFLICT,
            RequestError::InvalidRequest(_)
            | RequestError::PathTraversal { .. }
            | RequestError::ReservedPath { .. } => StatusCode::BAD_REQUEST,
            RequestError::Session(inner) => session_status(inner),
            RequestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezbids_core::SessionStatus;

    #[test]
    fn test_session_errors() {
        assert_eq!(
            ApiError::from(SessionError::NotFound("x".into())).status,
            StatusCode::NOT_FOUND
        );
        let conflict = SessionError::ClaimConflict {
            session_id: "x".into(),
            expected: SessionStatus::Uploaded,
            actual: SessionStatus::Preprocessing,
        };
        assert_eq!(ApiError::from(conflict).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(SessionError::Database("boom".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_artifact_errors() {
        assert_eq!(
            ApiError::from(ArtifactError::path_traversal("../x")).status,
            StatusCode::BAD_REQUEST
        );
        let not_ready = ArtifactError::NotReady {
            path: "ezBIDS_core.json".into(),
            status: SessionStatus::Preprocessing,
            required: SessionStatus::Analyzed,
        };
        assert_eq!(ApiError::from(not_ready).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ArtifactError::Session(SessionError::NotFound("x".into()))).status,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_request_errors() {
        let invalid = RequestError::invalid_state("x", SessionStatus::Created, "analyzed");
        let api = ApiError::from(invalid);
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert!(api.message.contains("expected analyzed"));
        assert_eq!(
            ApiError::from(RequestError::InvalidRequest("no images".into())).status,
            StatusCode::BAD_REQUEST
        );
    }
}
