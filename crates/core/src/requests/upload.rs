//! Upload intake for sessions in the `created` status.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::RequestError;
use crate::artifact::names;
use crate::session::{Session, SessionPatch, SessionStatus, SessionStore};
use crate::workdir::{safe_relative_path, WorkdirLayout};

/// A file written into a session working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    /// Normalized path relative to the working directory.
    pub path: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the contents.
    pub sha256: String,
}

/// Accepts uploaded files and marks uploads complete.
pub struct UploadTracker {
    store: Arc<dyn SessionStore>,
    layout: WorkdirLayout,
}

impl UploadTracker {
    pub fn new(store: Arc<dyn SessionStore>, layout: WorkdirLayout) -> Self {
        Self { store, layout }
    }

    /// Write one uploaded file. Only allowed while the session is `created`.
    pub async fn store_file(
        &self,
        session_id: &str,
        relative: &str,
        data: &[u8],
    ) -> Result<StoredFile, RequestError> {
        let rel = safe_relative_path(relative).ok_or_else(|| RequestError::PathTraversal {
            path: relative.to_string(),
        })?;
        if names::is_pipeline_artifact(&rel) {
            return Err(RequestError::ReservedPath { path: rel });
        }

        let session = self.store.get(session_id)?;
        if session.status != SessionStatus::Created {
            return Err(RequestError::invalid_state(
                session_id,
                session.status,
                SessionStatus::Created.as_str(),
            ));
        }

        let target = self.layout.session_dir(session_id).join(&rel);
        let sha256 = write_file(&target, data).await?;

        // The upload may have been completed while the file was being written.
        let current = self.store.get(session_id)?;
        if current.status != SessionStatus::Created {
            if let Err(e) = tokio::fs::remove_file(&target).await {
                warn!("Failed to remove late upload {}: {}", target.display(), e);
            }
            return Err(RequestError::invalid_state(
                session_id,
                current.status,
                SessionStatus::Created.as_str(),
            ));
        }
        let stored = StoredFile {
            path: rel.to_string_lossy().into_owned(),
            size: data.len() as u64,
            sha256,
        };
        debug!(
            "Stored {} ({} bytes) for session {}",
            stored.path, stored.size, session_id
        );
        Ok(stored)
    }

    /// Move the session from `created` to `uploaded`.
    pub async fn mark_complete(&self, session_id: &str) -> Result<Session, RequestError> {
        let session = self.store.get(session_id)?;
        if session.status != SessionStatus::Created {
            return Err(RequestError::invalid_state(
                session_id,
                session.status,
                SessionStatus::Created.as_str(),
            ));
        }

        let patch = SessionPatch::status(SessionStatus::Uploaded).with_upload_finished_at(Utc::now());
        let session = self
            .store
            .update(session_id, patch, SessionStatus::Created)?;
        info!("Upload complete for session {}", session_id);
        Ok(session)
    }
}

async fn write_file(target: &Path, data: &[u8]) -> Result<String, RequestError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut hasher = Sha256::new();
    hasher.update(data);

    let mut file = tokio::fs::File::create(target).await?;
    file.write_all(data).await?;
    file.flush().await?;

    Ok(format!("{:x}", hasher.finalize()))
}
