//! Guarded read access to files in a session working directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::deface::{DefaceRequest, LedgerMerge};
use super::error::ArtifactError;
use super::names;
use crate::session::{Session, SessionStatus, SessionStore};
use crate::workdir::{safe_relative_path, WorkdirLayout};

/// Read-only access to session artifacts.
///
/// Paths must resolve strictly inside the session's working directory, and
/// stage outputs stay hidden until the session reaches the status that
/// produced them. A `failed` session is terminal, so whatever it left
/// behind is readable.
pub struct ArtifactGateway {
    store: Arc<dyn SessionStore>,
    layout: WorkdirLayout,
}

impl ArtifactGateway {
    pub fn new(store: Arc<dyn SessionStore>, layout: WorkdirLayout) -> Self {
        Self { store, layout }
    }

    /// Resolve `relative` to an existing file, enforcing traversal and visibility rules.
    pub async fn locate(&self, session_id: &str, relative: &str) -> Result<PathBuf, ArtifactError> {
        let rel = safe_relative_path(relative).ok_or_else(|| ArtifactError::path_traversal(relative))?;

        let session = self.store.get(session_id)?;
        check_visibility(&session, &rel, relative)?;

        let dir = self.layout.session_dir(session_id);
        let canonical_dir = canonicalize(&dir, relative).await?;
        let canonical = canonicalize(&dir.join(&rel), relative).await?;

        // Symlinks inside the working directory must not lead out of it
        if !canonical.starts_with(&canonical_dir) {
            return Err(ArtifactError::path_traversal(relative));
        }

        let meta = tokio::fs::metadata(&canonical).await?;
        if !meta.is_file() {
            return Err(ArtifactError::NotFound {
                path: relative.to_string(),
            });
        }

        Ok(canonical)
    }

    /// Read an artifact's bytes.
    pub async fn read(&self, session_id: &str, relative: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.locate(session_id, relative).await?;
        debug!("Serving artifact {} for session {}", relative, session_id);
        Ok(tokio::fs::read(path).await?)
    }

    /// Per-image deface state, merged from the request and both ledgers.
    pub async fn deface_status(&self, session_id: &str) -> Result<LedgerMerge, ArtifactError> {
        self.store.get(session_id)?;
        let dir = self.layout.session_dir(session_id);

        let request_bytes = match tokio::fs::read(dir.join(names::DEFACE_REQUEST)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    path: names::DEFACE_REQUEST.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let request: DefaceRequest =
            serde_json::from_slice(&request_bytes).map_err(|e| ArtifactError::Malformed {
                path: names::DEFACE_REQUEST.to_string(),
                reason: e.to_string(),
            })?;

        let success = read_to_string_or_empty(&dir.join(names::DEFACE_SUCCESS_LEDGER)).await?;
        let failure = read_to_string_or_empty(&dir.join(names::DEFACE_FAILURE_LEDGER)).await?;

        Ok(LedgerMerge::merge(&request.images, &success, &failure))
    }
}

fn check_visibility(session: &Session, rel: &Path, raw: &str) -> Result<(), ArtifactError> {
    let Some(required) = names::required_status(rel) else {
        return Ok(());
    };
    if session.status == SessionStatus::Failed || session.status.has_reached(required) {
        return Ok(());
    }
    Err(ArtifactError::NotReady {
        path: raw.to_string(),
        status: session.status,
        required,
    })
}

async fn canonicalize(path: &Path, raw: &str) -> Result<PathBuf, ArtifactError> {
    tokio::fs::canonicalize(path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ArtifactError::NotFound {
                path: raw.to_string(),
            }
        } else {
            ArtifactError::Io(e)
        }
    })
}

/// Read a text file, treating a missing file as empty.
pub(crate) async fn read_to_string_or_empty(path: &Path) -> io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}
