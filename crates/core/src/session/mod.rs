//! Session records, the status state machine, and durable storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteSessionStore;
pub use store::{SessionError, SessionStore};
pub use types::{Session, SessionPatch, SessionStatus, UnknownStatus};
