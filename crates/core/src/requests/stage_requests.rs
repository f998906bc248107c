//! Client requests that create sessions or move them into a trigger status.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use super::error::RequestError;
use crate::artifact::{names, DefaceRequest, FinalizePayload};
use crate::session::{Session, SessionError, SessionPatch, SessionStatus, SessionStore};
use crate::workdir::{safe_relative_path, WorkdirLayout};

/// Writes the request files a stage reads and flips the session into the
/// stage's trigger status.
pub struct StageRequests {
    store: Arc<dyn SessionStore>,
    layout: WorkdirLayout,
}

impl StageRequests {
    pub fn new(store: Arc<dyn SessionStore>, layout: WorkdirLayout) -> Self {
        Self { store, layout }
    }

    /// Create a session record together with its working directory.
    pub async fn create_session(&self) -> Result<Session, RequestError> {
        let session = self.store.create()?;
        if let Err(e) = self.layout.create(&session.id).await {
            if let Err(cleanup) = self.store.delete(&session.id) {
                warn!(
                    "Failed to remove session {} after directory error: {}",
                    session.id, cleanup
                );
            }
            return Err(e.into());
        }
        info!("Created session {}", session.id);
        Ok(session)
    }

    /// Record which images to deface and trigger the deface stage.
    pub async fn request_deface(
        &self,
        session_id: &str,
        request: DefaceRequest,
    ) -> Result<Session, RequestError> {
        let session = self.store.get(session_id)?;
        if session.status != SessionStatus::Analyzed {
            return Err(RequestError::invalid_state(
                session_id,
                session.status,
                SessionStatus::Analyzed.as_str(),
            ));
        }

        if request.images.is_empty() {
            return Err(RequestError::InvalidRequest(
                "at least one image is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut images = Vec::with_capacity(request.images.len());
        for image in &request.images {
            let rel = safe_relative_path(image).ok_or_else(|| RequestError::PathTraversal {
                path: image.clone(),
            })?;
            let normalized = rel.to_string_lossy().into_owned();
            if seen.insert(normalized.clone()) {
                images.push(normalized);
            }
        }

        let request = DefaceRequest {
            images,
            method: request.method,
        };
        let bytes = serde_json::to_vec_pretty(&request)
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        let dir = self.layout.session_dir(session_id);
        let staged = StagedFile::write(&dir, names::DEFACE_REQUEST, &bytes).await?;

        let result = self.store.update(
            session_id,
            SessionPatch::status(SessionStatus::Deface).clear_message(),
            SessionStatus::Analyzed,
        );
        let session = staged.settle(result).await?;
        info!(
            "Deface requested for {} images in session {}",
            request.images.len(),
            session_id
        );
        Ok(session)
    }

    /// Persist the finalize payload verbatim and trigger the finalize stage.
    pub async fn request_finalize(
        &self,
        session_id: &str,
        payload: &[u8],
    ) -> Result<Session, RequestError> {
        let session = self.store.get(session_id)?;
        if !matches!(
            session.status,
            SessionStatus::Analyzed | SessionStatus::Defaced
        ) {
            return Err(RequestError::invalid_state(
                session_id,
                session.status,
                "analyzed or defaced",
            ));
        }

        let parsed = FinalizePayload::parse(payload).map_err(RequestError::InvalidRequest)?;

        let dir = self.layout.session_dir(session_id);
        let staged = StagedFile::write(&dir, names::FINALIZE_SNAPSHOT, payload).await?;

        let result = self.store.update(
            session_id,
            SessionPatch::status(SessionStatus::Finalized).clear_message(),
            session.status,
        );
        let session = staged.settle(result).await?;
        info!(
            "Finalize requested for session {} ({} objects)",
            session_id,
            parsed.objects.len()
        );
        Ok(session)
    }

    /// Remove a session and its working directory.
    pub async fn delete_session(&self, session_id: &str) -> Result<Session, RequestError> {
        let session = self.store.get(session_id)?;
        if session.status.is_in_progress() {
            return Err(RequestError::invalid_state(
                session_id,
                session.status,
                "a status with no running stage",
            ));
        }

        let deleted = self
            .store
            .delete_in_status(session_id, session.status)
            .map_err(|e| match e {
                SessionError::ClaimConflict { actual, .. } => RequestError::invalid_state(
                    session_id,
                    actual,
                    "a status with no running stage",
                ),
                other => other.into(),
            })?;
        self.layout.remove(session_id).await?;
        info!("Deleted session {}", session_id);
        Ok(deleted)
    }
}

/// A request file written under a per-request temporary name.
///
/// It only takes its real name once the status change that owns it has
/// won, so a request that loses the race never touches the visible file.
struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    async fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(Self {
            tmp,
            target: dir.join(name),
        })
    }

    /// Publish the file if the status change succeeded, discard it otherwise.
    async fn settle(self, result: Result<Session, SessionError>) -> Result<Session, RequestError> {
        match result {
            Ok(session) => {
                if let Err(e) = tokio::fs::rename(&self.tmp, &self.target).await {
                    error!(
                        "Failed to publish {} for session {}: {}",
                        self.target.display(),
                        session.id,
                        e
                    );
                    let _ = tokio::fs::remove_file(&self.tmp).await;
                    return Err(e.into());
                }
                Ok(session)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&self.tmp).await {
                    warn!("Failed to remove {}: {}", self.tmp.display(), cleanup);
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::DefaceMethod;
    use crate::testing::AdvanceAfterRead;
    use crate::session::SqliteSessionStore;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        store: Arc<SqliteSessionStore>,
        requests: StageRequests,
        temp: TempDir,
    }

    fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let requests = StageRequests::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            WorkdirLayout::new(temp.path()),
        );
        Harness {
            store,
            requests,
            temp,
        }
    }

    async fn analyzed_session(h: &Harness) -> Session {
        let session = h.requests.create_session().await.unwrap();
        for (next, expected) in [
            (SessionStatus::Uploaded, SessionStatus::Created),
            (SessionStatus::Preprocessing, SessionStatus::Uploaded),
            (SessionStatus::Analyzed, SessionStatus::Preprocessing),
        ] {
            h.store
                .update(&session.id, SessionPatch::status(next), expected)
                .unwrap();
        }
        session
    }

    fn finalize_body() -> Vec<u8> {
        // Key order and spacing must survive untouched
        br#"{"readme": "r",  "datasetDescription": {"Name": "S"}, "participantsColumn": {}, "subjects": [], "objects": [], "entityMappings": {}, "extra": 1}"#.to_vec()
    }

    #[tokio::test]
    async fn test_create_session_makes_directory() {
        let h = harness();
        let session = h.requests.create_session().await.unwrap();
        assert_eq!(session.status, SessionStatus::Created);
        assert!(h.temp.path().join(&session.id).is_dir());
    }

    #[tokio::test]
    async fn test_request_deface_writes_request() {
        let h = harness();
        let session = analyzed_session(&h).await;

        let request = DefaceRequest {
            images: vec!["sub-01/T1w".into(), "./sub-01/T1w".into(), "sub-02/T1w".into()],
            method: DefaceMethod::Pydeface,
        };
        let updated = h.requests.request_deface(&session.id, request).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Deface);

        let written = std::fs::read(h.temp.path().join(&session.id).join("deface.json")).unwrap();
        let written: DefaceRequest = serde_json::from_slice(&written).unwrap();
        assert_eq!(written.images, vec!["sub-01/T1w", "sub-02/T1w"]);
        assert_eq!(written.method, DefaceMethod::Pydeface);
    }

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deface_requests_keep_winner_file() {
        let h = harness();
        let requests = Arc::new(h.requests);

        for _ in 0..25 {
            let session = requests.create_session().await.unwrap();
            for (next, expected) in [
                (SessionStatus::Uploaded, SessionStatus::Created),
                (SessionStatus::Preprocessing, SessionStatus::Uploaded),
                (SessionStatus::Analyzed, SessionStatus::Preprocessing),
            ] {
                h.store
                    .update(&session.id, SessionPatch::status(next), expected)
                    .unwrap();
            }

            let spawn_request = |image: &str| {
                let requests = Arc::clone(&requests);
                let id = session.id.clone();
                let request = DefaceRequest {
                    images: vec![image.to_string()],
                    method: DefaceMethod::Quickshear,
                };
                tokio::spawn(async move { requests.request_deface(&id, request).await })
            };
            let a = spawn_request("A");
            let b = spawn_request("B");
            let (a, b) = (a.await.unwrap(), b.await.unwrap());

            let winner = match (a.is_ok(), b.is_ok()) {
                (true, false) => "A",
                (false, true) => "B",
                other => panic!("expected exactly one winner, got {:?}", other),
            };

            let dir = h.temp.path().join(&session.id);
            let written: DefaceRequest =
                serde_json::from_slice(&std::fs::read(dir.join("deface.json")).unwrap()).unwrap();
            assert_eq!(written.images, vec![winner]);
            assert!(leftover_temp_files(&dir).is_empty());
            assert_eq!(h.store.get(&session.id).unwrap().status, SessionStatus::Deface);
        }
    }

    #[tokio::test]
    async fn test_losing_deface_request_leaves_no_file() {
        let h = harness();
        let session = analyzed_session(&h).await;
        // Another request wins between the status check and the commit
        let racing = StageRequests::new(
            Arc::new(AdvanceAfterRead::new(Arc::clone(&h.store), SessionStatus::Deface)),
            WorkdirLayout::new(h.temp.path()),
        );

        let request = DefaceRequest {
            images: vec!["A".into()],
            method: DefaceMethod::Quickshear,
        };
        let err = racing.request_deface(&session.id, request).await.unwrap_err();
        assert!(matches!(
            err,
            RequestError::Session(SessionError::ClaimConflict { .. })
        ));

        let dir = h.temp.path().join(&session.id);
        assert!(!dir.join("deface.json").exists());
        assert!(leftover_temp_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_request_deface_validation() {
        let h = harness();
        let session = analyzed_session(&h).await;

        let empty = DefaceRequest {
            images: vec![],
            method: DefaceMethod::Quickshear,
        };
        assert!(matches!(
            h.requests.request_deface(&session.id, empty).await.unwrap_err(),
            RequestError::InvalidRequest(_)
        ));

        let traversal = DefaceRequest {
            images: vec!["../../etc/shadow".into()],
            method: DefaceMethod::Quickshear,
        };
        assert!(matches!(
            h.requests.request_deface(&session.id, traversal).await.unwrap_err(),
            RequestError::PathTraversal { .. }
        ));

        // Nothing changed
        assert_eq!(h.store.get(&session.id).unwrap().status, SessionStatus::Analyzed);
    }

    #[tokio::test]
    async fn test_request_deface_wrong_status() {
        let h = harness();
        let session = h.requests.create_session().await.unwrap();
        let request = DefaceRequest {
            images: vec!["A".into()],
            method: DefaceMethod::Quickshear,
        };
        assert!(matches!(
            h.requests.request_deface(&session.id, request).await.unwrap_err(),
            RequestError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn test_request_finalize_persists_verbatim() {
        let h = harness();
        let session = analyzed_session(&h).await;

        let updated = h
            .requests
            .request_finalize(&session.id, &finalize_body())
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Finalized);

        let written = std::fs::read(h.temp.path().join(&session.id).join("finalized.json")).unwrap();
        assert_eq!(written, finalize_body());
    }

    #[tokio::test]
    async fn test_request_finalize_rejects_incomplete_payload() {
        let h = harness();
        let session = analyzed_session(&h).await;

        let body = serde_json::to_vec(&json!({"readme": "r"})).unwrap();
        let err = h.requests.request_finalize(&session.id, &body).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidRequest(_)));
        assert!(!h.temp.path().join(&session.id).join("finalized.json").exists());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let h = harness();
        let session = analyzed_session(&h).await;

        h.requests.delete_session(&session.id).await.unwrap();
        assert!(!h.temp.path().join(&session.id).exists());
        assert!(h.store.get(&session.id).is_err());
    }

    #[tokio::test]
    async fn test_delete_refused_when_claimed_after_check() {
        let h = harness();
        let session = analyzed_session(&h).await;
        // A deface request lands between the status check and the delete
        let racing = StageRequests::new(
            Arc::new(AdvanceAfterRead::new(Arc::clone(&h.store), SessionStatus::Deface)),
            WorkdirLayout::new(h.temp.path()),
        );

        let err = racing.delete_session(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidState {
                status: SessionStatus::Deface,
                ..
            }
        ));
        assert_eq!(h.store.get(&session.id).unwrap().status, SessionStatus::Deface);
        assert!(h.temp.path().join(&session.id).is_dir());
    }

    #[tokio::test]
    async fn test_delete_refused_while_in_progress() {
        let h = harness();
        let session = h.requests.create_session().await.unwrap();
        h.store
            .update(&session.id, SessionPatch::status(SessionStatus::Uploaded), SessionStatus::Created)
            .unwrap();
        h.store
            .update(
                &session.id,
                SessionPatch::status(SessionStatus::Preprocessing),
                SessionStatus::Uploaded,
            )
            .unwrap();

        assert!(matches!(
            h.requests.delete_session(&session.id).await.unwrap_err(),
            RequestError::InvalidState { .. }
        ));
    }
}
