//! Well-known artifact names inside a session working directory.

use std::path::Path;

use crate::session::SessionStatus;

/// Manifest of convertible inputs, one path per line.
pub const MANIFEST: &str = "list";

/// Structured analysis result written by preprocessing.
pub const ANALYSIS_RESULT: &str = "ezBIDS_core.json";

/// Deface request, written before the deface stage is triggered.
pub const DEFACE_REQUEST: &str = "deface.json";

/// Ledger of successfully defaced images.
pub const DEFACE_SUCCESS_LEDGER: &str = "deface.out";

/// Ledger of images that failed to deface.
pub const DEFACE_FAILURE_LEDGER: &str = "deface.failed";

/// Finalize payload snapshot, written before the finalize stage is triggered.
pub const FINALIZE_SNAPSHOT: &str = "finalized.json";

/// Root of the generated BIDS tree.
pub const BIDS_ROOT: &str = "bids";

/// File marking a complete dataset inside the BIDS tree.
pub const DATASET_DESCRIPTION: &str = "dataset_description.json";

/// Status a session must reach before `relative` may be read.
///
/// `None` means the artifact is always visible.
pub fn required_status(relative: &Path) -> Option<SessionStatus> {
    let mut components = relative.components();
    let first = components.next()?.as_os_str().to_str()?;
    let is_top_level = components.next().is_none();

    if first == BIDS_ROOT {
        return Some(SessionStatus::Finished);
    }
    if !is_top_level {
        return None;
    }
    match first {
        ANALYSIS_RESULT => Some(SessionStatus::Analyzed),
        DEFACE_SUCCESS_LEDGER | DEFACE_FAILURE_LEDGER => Some(SessionStatus::Defaced),
        _ => None,
    }
}

/// Whether `relative` names a file the pipeline writes itself.
///
/// Uploads may not overwrite these.
pub fn is_pipeline_artifact(relative: &Path) -> bool {
    let mut components = relative.components();
    let Some(first) = components.next().and_then(|c| c.as_os_str().to_str()) else {
        return false;
    };
    if first == BIDS_ROOT {
        return true;
    }
    components.next().is_none()
        && (matches!(
            first,
            MANIFEST
                | ANALYSIS_RESULT
                | DEFACE_REQUEST
                | DEFACE_SUCCESS_LEDGER
                | DEFACE_FAILURE_LEDGER
                | FINALIZE_SNAPSHOT
        ) || first.ends_with(".log")
            || first.ends_with(".err"))
}
