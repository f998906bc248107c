//! Poller lifecycle integration tests.
//!
//! These tests drive sessions through the full pipeline with `sh` scripts
//! standing in for the stage programs:
//! created -> uploaded -> preprocessing -> analyzed -> deface -> defacing
//! -> defaced -> finalized -> bidsing -> finished
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::assert_ok;

use ezbids_core::{
    process_handlers,
    testing::fixtures::{self, sh_command},
    ArtifactGateway, ImageDefaceState, PollerConfig, SessionStatus, SessionStore,
    SqliteSessionStore, StagePoller, StageRequests, StagesConfig, UploadTracker, WorkdirLayout,
};

const PREPROCESS: &str = r#"
find . -name '*.dcm' | sort > list
echo '{"readme": "", "datasetDescription": {}, "subjects": [], "participantsColumn": {}, "series": [{"n": 1}], "objects": [{"idx": 0}]}' > ezBIDS_core.json
"#;

const DEFACE: &str = r#"
echo "{'id': 'sub-01/anat/T1w', 'defaced': 'T1w_defaced.nii.gz'}" >> deface.out
echo "sub-02/anat/T1w" >> deface.failed
"#;

const FINALIZE: &str = r#"
mkdir -p bids/study
cp finalized.json bids/study/dataset_description.json
"#;

/// Test helper wiring a store, working directories, and a poller.
struct TestHarness {
    store: Arc<SqliteSessionStore>,
    uploads: UploadTracker,
    requests: StageRequests,
    gateway: ArtifactGateway,
    layout: WorkdirLayout,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteSessionStore::new(&temp_dir.path().join("sessions.db"))
                .expect("Failed to create session store"),
        );
        let layout = WorkdirLayout::new(temp_dir.path().join("workdir"));
        let dyn_store = Arc::clone(&store) as Arc<dyn SessionStore>;

        Self {
            uploads: UploadTracker::new(Arc::clone(&dyn_store), layout.clone()),
            requests: StageRequests::new(Arc::clone(&dyn_store), layout.clone()),
            gateway: ArtifactGateway::new(dyn_store, layout.clone()),
            store,
            layout,
            _temp_dir: temp_dir,
        }
    }

    fn create_poller(&self, stages: StagesConfig) -> StagePoller {
        let config = PollerConfig {
            poll_interval_ms: 20,
            max_concurrent_handlers: 2,
            shutdown_grace_ms: 2000,
            ..Default::default()
        };
        StagePoller::new(
            config,
            Arc::clone(&self.store) as Arc<dyn SessionStore>,
            self.layout.clone(),
            process_handlers(&stages),
        )
    }

    async fn uploaded_session(&self) -> String {
        let session = assert_ok!(self.requests.create_session().await);
        assert_ok!(
            self.uploads
                .store_file(&session.id, "dicom/sub-01/img0001.dcm", b"DICM")
                .await
        );
        assert_ok!(self.uploads.mark_complete(&session.id).await);
        session.id
    }

    async fn wait_for_status(
        &self,
        session_id: &str,
        expected: SessionStatus,
        timeout: Duration,
    ) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let status = self.store.get(session_id).unwrap().status;
            if status == expected {
                return true;
            }
            // Stop if we hit a terminal state
            if status.is_terminal() {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

fn stages(preprocess: &str, deface: &str, finalize: &str) -> StagesConfig {
    StagesConfig {
        preprocess: sh_command(preprocess),
        deface: sh_command(deface),
        finalize: sh_command(finalize),
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_full_pipeline_reaches_finished() {
    let harness = TestHarness::new();
    let session_id = harness.uploaded_session().await;
    let poller = harness.create_poller(stages(PREPROCESS, DEFACE, FINALIZE));
    poller.start().await;

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Analyzed, Duration::from_secs(10))
            .await
    );
    let session = harness.store.get(&session_id).unwrap();
    assert!(session.preprocess_started_at.is_some());
    assert!(session.preprocess_finished_at.is_some());

    // The analysis download returns exactly what the stage wrote
    let on_disk = std::fs::read(harness.layout.session_dir(&session_id).join("ezBIDS_core.json")).unwrap();
    let served = harness.gateway.read(&session_id, "ezBIDS_core.json").await.unwrap();
    assert_eq!(served, on_disk);
    let manifest = harness.gateway.read(&session_id, "list").await.unwrap();
    assert_eq!(String::from_utf8(manifest).unwrap().trim(), "./dicom/sub-01/img0001.dcm");

    harness
        .requests
        .request_deface(
            &session_id,
            fixtures::deface_request(&["sub-01/anat/T1w", "sub-02/anat/T1w"]),
        )
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Defaced, Duration::from_secs(10))
            .await
    );
    let session = harness.store.get(&session_id).unwrap();
    assert_eq!(session.status_msg.as_deref(), Some("1 defaced, 1 failed"));

    let merge = harness.gateway.deface_status(&session_id).await.unwrap();
    assert_eq!(merge.images[0].state, ImageDefaceState::Defaced);
    assert_eq!(merge.images[1].state, ImageDefaceState::Failed);

    let payload = serde_json::to_vec(&fixtures::finalize_payload()).unwrap();
    harness
        .requests
        .request_finalize(&session_id, &payload)
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Finished, Duration::from_secs(10))
            .await
    );

    let snapshot = harness.gateway.read(&session_id, "finalized.json").await.unwrap();
    assert_eq!(snapshot, payload);
    let description = harness
        .gateway
        .read(&session_id, "bids/study/dataset_description.json")
        .await
        .unwrap();
    assert_eq!(description, payload);

    poller.stop().await;
}

#[tokio::test]
async fn test_missing_artifact_fails_with_timeout() {
    let harness = TestHarness::new();
    let session_id = harness.uploaded_session().await;

    let mut config = stages("echo a.dcm > list", DEFACE, FINALIZE);
    config.preprocess = config.preprocess.with_timeout(1);
    let poller = harness.create_poller(config);
    poller.start().await;

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Failed, Duration::from_secs(5))
            .await
    );
    let session = harness.store.get(&session_id).unwrap();
    let message = session.status_msg.unwrap();
    assert!(message.contains("timed out"), "{message}");

    poller.stop().await;
}

#[tokio::test]
async fn test_incomplete_deface_fails_naming_missing_image() {
    let harness = TestHarness::new();
    let session_id = harness.uploaded_session().await;

    let mut config = stages(PREPROCESS, "echo A >> deface.out", FINALIZE);
    config.deface = config.deface.with_timeout(1);
    let poller = harness.create_poller(config);
    poller.start().await;

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Analyzed, Duration::from_secs(10))
            .await
    );
    harness
        .requests
        .request_deface(&session_id, fixtures::deface_request(&["A", "B"]))
        .await
        .unwrap();

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Failed, Duration::from_secs(5))
            .await
    );
    let message = harness.store.get(&session_id).unwrap().status_msg.unwrap();
    assert!(message.contains("timed out"), "{message}");
    assert!(message.contains('B'), "{message}");

    // Failed sessions keep their partial ledgers readable
    let ledger = harness.gateway.read(&session_id, "deface.out").await.unwrap();
    assert_eq!(ledger, b"A\n");

    poller.stop().await;
}

#[tokio::test]
async fn test_process_failure_records_stderr() {
    let harness = TestHarness::new();
    let session_id = harness.uploaded_session().await;

    let poller = harness.create_poller(stages(
        "echo 'no DICOM series found' >&2; exit 4",
        DEFACE,
        FINALIZE,
    ));
    poller.start().await;

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Failed, Duration::from_secs(5))
            .await
    );
    let message = harness.store.get(&session_id).unwrap().status_msg.unwrap();
    assert!(message.contains("no DICOM series found"), "{message}");

    let err_log = harness.gateway.read(&session_id, "preprocess.err").await.unwrap();
    assert_eq!(String::from_utf8(err_log).unwrap().trim(), "no DICOM series found");

    poller.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_running_handler() {
    let harness = TestHarness::new();
    let session_id = harness.uploaded_session().await;

    let slow = format!("sleep 0.3\n{}", PREPROCESS);
    let poller = harness.create_poller(stages(&slow, DEFACE, FINALIZE));
    poller.start().await;

    assert!(
        harness
            .wait_for_status(&session_id, SessionStatus::Preprocessing, Duration::from_secs(5))
            .await
    );
    assert_eq!(poller.active_stages().await.len(), 1);

    poller.stop().await;
    assert_eq!(
        harness.store.get(&session_id).unwrap().status,
        SessionStatus::Analyzed
    );
    assert!(!poller.status().await.running);
}
