//! Session store wrappers for exercising races and storage failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::session::{
    Session, SessionError, SessionPatch, SessionStatus, SessionStore, SqliteSessionStore,
};

/// Delegates to a SQLite store, but moves the session to `next` right
/// after the first `get` returns, as if a worker had claimed it in between.
pub struct AdvanceAfterRead {
    inner: Arc<SqliteSessionStore>,
    next: SessionStatus,
    fired: AtomicBool,
}

impl AdvanceAfterRead {
    pub fn new(inner: Arc<SqliteSessionStore>, next: SessionStatus) -> Self {
        Self {
            inner,
            next,
            fired: AtomicBool::new(false),
        }
    }
}

impl SessionStore for AdvanceAfterRead {
    fn create(&self) -> Result<Session, SessionError> {
        self.inner.create()
    }

    fn get(&self, id: &str) -> Result<Session, SessionError> {
        let session = self.inner.get(id)?;
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.inner
                .update(id, SessionPatch::status(self.next), session.status)?;
        }
        Ok(session)
    }

    fn update(
        &self,
        id: &str,
        patch: SessionPatch,
        expected: SessionStatus,
    ) -> Result<Session, SessionError> {
        self.inner.update(id, patch, expected)
    }

    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, SessionError> {
        self.inner.list_by_status(status)
    }

    fn count_by_status(&self, status: SessionStatus) -> Result<i64, SessionError> {
        self.inner.count_by_status(status)
    }

    fn delete(&self, id: &str) -> Result<Session, SessionError> {
        self.inner.delete(id)
    }

    fn delete_in_status(&self, id: &str, expected: SessionStatus) -> Result<Session, SessionError> {
        self.inner.delete_in_status(id, expected)
    }
}

/// A store whose every call fails with a database error.
pub struct BrokenStore;

impl SessionStore for BrokenStore {
    fn create(&self) -> Result<Session, SessionError> {
        Err(broken())
    }

    fn get(&self, _id: &str) -> Result<Session, SessionError> {
        Err(broken())
    }

    fn update(
        &self,
        _id: &str,
        _patch: SessionPatch,
        _expected: SessionStatus,
    ) -> Result<Session, SessionError> {
        Err(broken())
    }

    fn list_by_status(&self, _status: SessionStatus) -> Result<Vec<Session>, SessionError> {
        Err(broken())
    }

    fn count_by_status(&self, _status: SessionStatus) -> Result<i64, SessionError> {
        Err(broken())
    }

    fn delete(&self, _id: &str) -> Result<Session, SessionError> {
        Err(broken())
    }

    fn delete_in_status(&self, _id: &str, _expected: SessionStatus) -> Result<Session, SessionError> {
        Err(broken())
    }
}

fn broken() -> SessionError {
    SessionError::Database("disk I/O error".to_string())
}
