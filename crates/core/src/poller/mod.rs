//! Stage poller: claims sessions and drives them through the pipeline.
//!
//! One loop per stage looks for sessions in the stage's trigger status,
//! claims each with a compare-and-set update and hands it to the stage's
//! handler on a spawned task. Any number of workers may share one session
//! database; only the worker whose claim succeeds runs the stage.

mod config;
mod runner;
mod types;

pub use config::PollerConfig;
pub use runner::StagePoller;
pub use types::{ActiveStage, PollerError, PollerStatus};
