//! Saving and restoring per-session pruning state.
//!
//! Only the durable part of a session is written: the pruned-ID set, the
//! cumulative stats and the session name. Tool metadata and numeric aliases
//! are rebuilt from the host transcript.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::session::{SessionState, SessionStats};
use crate::error::{Result, SnipError};

/// On-disk form of a session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub pruned_ids: Vec<String>,
    #[serde(default)]
    pub stats: SessionStats,
    /// RFC 3339 timestamp of the save.
    #[serde(default)]
    pub updated_at: String,
}

impl PersistedSession {
    /// Snapshot the durable part of a session.
    pub fn from_state(state: &SessionState) -> Self {
        let mut pruned_ids: Vec<String> = state.pruned_ids().iter().cloned().collect();
        pruned_ids.sort();
        Self {
            session_name: state.name.clone(),
            pruned_ids,
            stats: state.stats,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seed a fresh session from this snapshot.
    pub fn apply_to(self, state: &mut SessionState) {
        state.name = self.session_name;
        state.stats = self.stats;
        state.restore_pruned(self.pruned_ids);
    }
}

/// Storage backend for [`PersistedSession`]s.
pub trait Persistence: Send + Sync {
    fn save(&self, session_id: &str, session: &PersistedSession) -> Result<()>;

    /// Load a session. Returns `None` if nothing was saved for it.
    fn load(&self, session_id: &str) -> Result<Option<PersistedSession>>;
}

// ── FilePersistence ────────────────────────────────────────────────

/// One JSON document per session under a state directory.
///
/// Directory layout:
/// ```text
/// state_dir/
///   ses_abc123.json
///   ses_def456.json
/// ```
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Create a backend rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default location: `$HOME/.local/share/snip/sessions`.
    pub fn default_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local/share/snip/sessions")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }
}

impl Persistence for FilePersistence {
    /// Atomic write: serialize to a uniquely named temp file in the same
    /// directory, then rename it into place.
    fn save(&self, session_id: &str, session: &PersistedSession) -> Result<()> {
        let final_path = self.path_for(session_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| SnipError::Persistence(format!("failed to create temp state: {e}")))?;
        serde_json::to_writer_pretty(&mut tmp, session)?;
        tmp.persist(&final_path).map_err(|e| {
            SnipError::Persistence(format!("failed to rename state file: {}", e.error))
        })?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<PersistedSession>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        let session = serde_json::from_str(&json).map_err(|e| {
            SnipError::Persistence(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(session))
    }
}

/// File name for a session ID. Bytes outside `[A-Za-z0-9_-]` are written as
/// `%XX`, so distinct IDs never share a file and none can leave the state
/// directory.
fn file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for b in session_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            stem.push(char::from(b));
        } else {
            let _ = write!(stem, "%{b:02X}");
        }
    }
    stem
}

// ── MemoryPersistence ──────────────────────────────────────────────

/// In-process backend for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    sessions: Mutex<HashMap<String, PersistedSession>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn save(&self, session_id: &str, session: &PersistedSession) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), session.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<PersistedSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned())
    }
}
