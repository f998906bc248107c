//! Per-session working directory layout.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Maps session ids to their working directories under a shared root.
#[derive(Debug, Clone)]
pub struct WorkdirLayout {
    root: PathBuf,
}

impl WorkdirLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory of a session. Derived only from the id.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Create the working directory of a session.
    pub async fn create(&self, session_id: &str) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove the working directory of a session and everything under it.
    pub async fn remove(&self, session_id: &str) -> io::Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Parse a client-supplied path that must stay inside a working directory.
///
/// Returns `None` for empty or absolute paths and for any path with a `..`
/// component. `.` components are dropped.
pub fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() || raw.contains('\0') || raw.contains('\\') {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}
