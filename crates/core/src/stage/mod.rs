//! Pipeline stages and the handlers that run them.
//!
//! Each stage launches a configured external program against a session's
//! working directory and decides success from the artifacts it leaves
//! behind. The poller owns all status changes; handlers only report an
//! outcome or a [`StageError`].

mod config;
mod deface;
mod error;
mod finalize;
mod preprocess;
mod process;
mod traits;
mod types;

use std::sync::Arc;

pub use config::{StageCommandConfig, StagesConfig};
pub use deface::DefaceHandler;
pub use error::StageError;
pub use finalize::FinalizeHandler;
pub use preprocess::{AnalysisSummary, PreprocessHandler};
pub use process::{Probe, StageProcess};
pub use traits::StageHandler;
pub use types::{Stage, StageJob, StageOutcome};

/// Handlers for every stage, backed by the configured programs.
pub fn process_handlers(config: &StagesConfig) -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(PreprocessHandler::new(config.preprocess.clone())),
        Arc::new(DefaceHandler::new(config.deface.clone())),
        Arc::new(FinalizeHandler::new(config.finalize.clone())),
    ]
}
