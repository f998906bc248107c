//! Session artifacts: well-known names, deface ledgers, finalize payloads,
//! and guarded read access.

mod deface;
mod error;
mod finalize;
mod gateway;
pub mod names;

pub use deface::{
    parse_ledger_line, DefaceMethod, DefaceRequest, ImageDefaceResult, ImageDefaceState,
    LedgerMerge,
};
pub use error::ArtifactError;
pub use finalize::{FinalizePayload, REQUIRED_KEYS as FINALIZE_REQUIRED_KEYS};
pub use gateway::ArtifactGateway;
pub(crate) use gateway::read_to_string_or_empty;
