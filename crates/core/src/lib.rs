//! Session orchestration for the ezBIDS conversion pipeline.
//!
//! Sessions move through preprocess, deface and finalize stages, each run
//! by an external program against the session's working directory. The
//! [`poller::StagePoller`] claims work through compare-and-set updates on a
//! shared [`session::SessionStore`], so several workers can share one
//! database.

pub mod artifact;
pub mod config;
pub mod metrics;
pub mod poller;
pub mod requests;
pub mod session;
pub mod stage;
pub mod testing;
pub mod workdir;

pub use artifact::{
    ArtifactError, ArtifactGateway, DefaceMethod, DefaceRequest, FinalizePayload,
    ImageDefaceResult, ImageDefaceState, LedgerMerge,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    ServerConfig, WorkspaceConfig,
};
pub use poller::{ActiveStage, PollerConfig, PollerError, PollerStatus, StagePoller};
pub use requests::{RequestError, StageRequests, StoredFile, UploadTracker};
pub use session::{
    Session, SessionError, SessionPatch, SessionStatus, SessionStore, SqliteSessionStore,
};
pub use stage::{
    process_handlers, Stage, StageCommandConfig, StageError, StageHandler, StageJob, StageOutcome,
    StagesConfig,
};
pub use workdir::WorkdirLayout;
