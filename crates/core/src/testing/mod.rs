//! Testing utilities: a mock stage handler, store wrappers and fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use ezbids_core::testing::{fixtures, MockStageHandler};
//!
//! let preprocess = MockStageHandler::succeeding(Stage::Preprocess, "ok")
//!     .with_artifact("ezBIDS_core.json", fixtures::analysis_json());
//! ```

mod mock_stage_handler;
mod session_stores;

pub use mock_stage_handler::MockStageHandler;
pub use session_stores::{AdvanceAfterRead, BrokenStore};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;

    use crate::artifact::{DefaceMethod, DefaceRequest};
    use crate::stage::StageCommandConfig;

    /// A minimal analysis result with the given number of objects.
    pub fn analysis_json(objects: usize) -> Vec<u8> {
        let objects: Vec<_> = (0..objects)
            .map(|idx| json!({"idx": idx, "type": "anat/T1w", "paths": [format!("sub-01/anat{}.nii.gz", idx)]}))
            .collect();
        json!({
            "readme": "",
            "datasetDescription": {"Name": "Untitled"},
            "subjects": [{"subject": "01"}],
            "participantsColumn": {},
            "participantsInfo": {},
            "series": [{"SeriesDescription": "T1w", "type": "anat/T1w"}],
            "objects": objects,
        })
        .to_string()
        .into_bytes()
    }

    /// A finalize payload containing every required key.
    pub fn finalize_payload() -> serde_json::Value {
        json!({
            "datasetDescription": {"Name": "Test Study", "BIDSVersion": "1.8.0"},
            "readme": "Test dataset",
            "participantsColumn": {"age": {"Description": "age of the participant"}},
            "subjects": [{"subject": "01", "phenotype": {"age": 30}}],
            "objects": [{"idx": 0, "type": "anat/T1w", "_entities": {"subject": "01"}}],
            "entityMappings": {"subject": {"01": "01"}},
        })
    }

    /// A quickshear deface request for `images`.
    pub fn deface_request(images: &[&str]) -> DefaceRequest {
        DefaceRequest {
            images: images.iter().map(|s| s.to_string()).collect(),
            method: DefaceMethod::Quickshear,
        }
    }

    /// A stage command that runs `script` with `sh`.
    ///
    /// The working directory is `$1` and also the current directory.
    pub fn sh_command(script: &str) -> StageCommandConfig {
        StageCommandConfig::new("sh")
            .with_args(["-c", script, "sh"])
            .with_timeout(5)
            .with_artifact_poll_ms(20)
    }
}
