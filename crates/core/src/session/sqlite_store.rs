//! SQLite-backed session store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::store::check_transition;
use super::{Session, SessionError, SessionPatch, SessionStatus, SessionStore};

const SELECT_COLUMNS: &str = "SELECT id, created_at, upload_finished_at, preprocess_started_at, preprocess_finished_at, status, status_msg, updated_at FROM sessions";

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed session store.
///
/// Several processes may open the same database file; claims stay exclusive
/// because every conditional update runs inside an immediate transaction.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Create a new SQLite session store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, SessionError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite session store (useful for testing).
    pub fn in_memory() -> Result<Self, SessionError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SessionError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                upload_finished_at TEXT,
                preprocess_started_at TEXT,
                preprocess_finished_at TEXT,
                status TEXT NOT NULL,
                status_msg TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status_created
                ON sessions(status, created_at);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SessionError> {
        self.conn
            .lock()
            .map_err(|_| SessionError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let status_str: String = row.get(5)?;
        let status = status_str
            .parse::<SessionStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(Session {
            id: row.get(0)?,
            created_at: parse_timestamp(row, 1)?,
            upload_finished_at: parse_optional_timestamp(row, 2)?,
            preprocess_started_at: parse_optional_timestamp(row, 3)?,
            preprocess_finished_at: parse_optional_timestamp(row, 4)?,
            status,
            status_msg: row.get(6)?,
            updated_at: parse_timestamp(row, 7)?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Session>, SessionError> {
        conn.query_row(
            &format!("{} WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_session,
        )
        .optional()
        .map_err(db_err)
    }
}

impl SessionStore for SqliteSessionStore {
    fn create(&self) -> Result<Session, SessionError> {
        let conn = self.lock()?;

        let session = Session::new(uuid::Uuid::new_v4().to_string(), Utc::now());

        conn.execute(
            "INSERT INTO sessions (id, created_at, status, updated_at) VALUES (?, ?, ?, ?)",
            params![
                session.id,
                session.created_at.to_rfc3339(),
                session.status.as_str(),
                session.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(session)
    }

    fn get(&self, id: &str) -> Result<Session, SessionError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)?.ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn update(
        &self,
        id: &str,
        patch: SessionPatch,
        expected: SessionStatus,
    ) -> Result<Session, SessionError> {
        check_transition(id, &patch, expected)?;

        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the read-check-write
        // below is atomic against other connections to the same file.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let mut session =
            Self::fetch(&tx, id)?.ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.status != expected {
            return Err(SessionError::ClaimConflict {
                session_id: id.to_string(),
                expected,
                actual: session.status,
            });
        }

        patch.apply(&mut session, Utc::now());

        let changed = tx
            .execute(
                "UPDATE sessions SET upload_finished_at = ?, preprocess_started_at = ?, preprocess_finished_at = ?, status = ?, status_msg = ?, updated_at = ? WHERE id = ? AND status = ?",
                params![
                    session.upload_finished_at.map(|t| t.to_rfc3339()),
                    session.preprocess_started_at.map(|t| t.to_rfc3339()),
                    session.preprocess_finished_at.map(|t| t.to_rfc3339()),
                    session.status.as_str(),
                    session.status_msg,
                    session.updated_at.to_rfc3339(),
                    id,
                    expected.as_str(),
                ],
            )
            .map_err(db_err)?;

        if changed != 1 {
            return Err(SessionError::Database(format!(
                "conditional update of session {} touched {} rows",
                id, changed
            )));
        }

        tx.commit().map_err(db_err)?;

        Ok(session)
    }

    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, SessionError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE status = ? ORDER BY created_at ASC, id ASC",
                SELECT_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_session)
            .map_err(db_err)?;

        let mut sessions = Vec::new();
        for row_result in rows {
            sessions.push(row_result.map_err(db_err)?);
        }

        Ok(sessions)
    }

    fn count_by_status(&self, status: SessionStatus) -> Result<i64, SessionError> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn delete(&self, id: &str) -> Result<Session, SessionError> {
        let conn = self.lock()?;

        let session =
            Self::fetch(&conn, id)?.ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        conn.execute("DELETE FROM sessions WHERE id = ?", params![id])
            .map_err(db_err)?;

        Ok(session)
    }

    fn delete_in_status(&self, id: &str, expected: SessionStatus) -> Result<Session, SessionError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let session =
            Self::fetch(&tx, id)?.ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.status != expected {
            return Err(SessionError::ClaimConflict {
                session_id: id.to_string(),
                expected,
                actual: session.status,
            });
        }

        tx.execute(
            "DELETE FROM sessions WHERE id = ? AND status = ?",
            params![id, expected.as_str()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(session)
    }

    fn shutdown(&self) -> Result<(), SessionError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA optimize;").map_err(db_err)?;
        // In-memory databases report a checkpoint failure row; only file-backed
        // databases have a WAL to fold back.
        if conn.path().is_some_and(|p| !p.is_empty()) {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .map_err(db_err)?;
        }
        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> SessionError {
    SessionError::Database(e.to_string())
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
