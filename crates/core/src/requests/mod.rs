//! Client-driven session changes: uploads and stage requests.

mod error;
mod stage_requests;
mod upload;

pub use error::RequestError;
pub use stage_requests::StageRequests;
pub use upload::{StoredFile, UploadTracker};
