//! Process-wide map of session states.
//!
//! [`SessionStore`] is the single owner of every [`SessionState`]. Sessions
//! are created on first reference, seeded from [`Persistence`] and, when the
//! host can provide one, from the session transcript (which rebuilds tool
//! metadata and numeric aliases in their original order). Writes back to
//! persistence are fire-and-forget, ordered per session: a snapshot older
//! than the last one written is dropped instead of overwriting it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use super::persist::{PersistedSession, Persistence};
use super::session::{SessionState, ToolCallRecord};
use crate::error::Result;
use crate::host::{ParsedTranscript, SessionAccessor, TranscriptMessage};

/// Default number of transcript messages fetched when restoring a session.
pub const DEFAULT_TRANSCRIPT_LIMIT: usize = 100;

/// Owner of all per-session pruning state.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    persistence: Arc<dyn Persistence>,
    writer: Arc<SnapshotWriter>,
    transcript_limit: usize,
}

/// Serializes snapshot writes and keeps them in snapshot order.
struct SnapshotWriter {
    persistence: Arc<dyn Persistence>,
    next_seq: AtomicU64,
    /// Sequence number of the newest snapshot written, per session. Held
    /// for the duration of a write.
    written: Mutex<HashMap<String, u64>>,
}

impl SnapshotWriter {
    fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            next_seq: AtomicU64::new(0),
            written: Mutex::new(HashMap::new()),
        }
    }

    /// Number the next snapshot. Must be called while the snapshot is taken
    /// under the session lock, so numbering follows state order.
    fn next(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Save `snapshot` unless a newer one for the same session already
    /// landed. Returns whether it was written.
    fn write(&self, session_id: &str, seq: u64, snapshot: &PersistedSession) -> Result<bool> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if written.get(session_id).is_some_and(|&last| last > seq) {
            trace!("Dropping stale snapshot {seq} of session {session_id}");
            return Ok(false);
        }
        self.persistence.save(session_id, snapshot)?;
        written.insert(session_id.to_string(), seq);
        Ok(true)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.lock().len())
            .field("transcript_limit", &self.transcript_limit)
            .finish()
    }
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            writer: Arc::new(SnapshotWriter::new(Arc::clone(&persistence))),
            persistence,
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
        }
    }

    /// Override how many transcript messages are replayed on restore.
    pub fn with_transcript_limit(mut self, limit: usize) -> Self {
        self.transcript_limit = limit;
        self
    }

    pub fn transcript_limit(&self) -> usize {
        self.transcript_limit
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// IDs of every session held in memory.
    pub fn session_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Make sure `session_id` is loaded, restoring it from persistence and
    /// replaying the host transcript if this is its first reference.
    pub async fn ensure(&self, session_id: &str, accessor: &dyn SessionAccessor) {
        if self.contains(session_id) {
            return;
        }
        let mut state = self.restore(session_id);
        match accessor.messages(session_id, self.transcript_limit).await {
            Ok(transcript) => replay_transcript(&mut state, &transcript),
            Err(e) => debug!("No transcript for session {session_id}: {e}"),
        }
        self.lock()
            .entry(session_id.to_string())
            .or_insert(state);
    }

    /// Fresh state seeded from persistence. Load failures are logged and
    /// yield an empty session.
    fn restore(&self, session_id: &str) -> SessionState {
        let mut state = SessionState::new();
        match self.persistence.load(session_id) {
            Ok(Some(saved)) => {
                debug!(
                    "Restored session {session_id}: {} pruned id(s)",
                    saved.pruned_ids.len()
                );
                saved.apply_to(&mut state);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to restore session {session_id}: {e}"),
        }
        state
    }

    /// Run `f` against a session's state, creating it (from persistence
    /// only) if it was never referenced.
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.lock();
        let state = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.restore(session_id));
        f(state)
    }

    /// Read a session without creating it.
    pub fn read<R>(&self, session_id: &str, f: impl FnOnce(&SessionState) -> R) -> Option<R> {
        self.lock().get(session_id).map(f)
    }

    /// Snapshot of a session's pruned IDs (empty if unknown).
    pub fn pruned_ids(&self, session_id: &str) -> HashSet<String> {
        self.read(session_id, |s| s.pruned_ids().clone())
            .unwrap_or_default()
    }

    /// Tool name for a call ID, searching every loaded session.
    pub fn find_tool_name(&self, call_id: &str) -> Option<String> {
        self.lock()
            .values()
            .find_map(|s| s.tools.tool_name(call_id).map(str::to_string))
    }

    /// Numbered snapshot of a session's durable state.
    fn snapshot(&self, session_id: &str) -> Option<(u64, PersistedSession)> {
        self.read(session_id, |state| {
            (self.writer.next(), PersistedSession::from_state(state))
        })
    }

    /// Write a session to persistence synchronously.
    pub fn persist_now(&self, session_id: &str) -> Result<()> {
        let Some((seq, snapshot)) = self.snapshot(session_id) else {
            return Ok(());
        };
        self.writer.write(session_id, seq, &snapshot).map(|_| ())
    }

    /// Write a session to persistence without waiting. Failures are logged
    /// and never roll back the in-memory state.
    pub fn persist(&self, session_id: &str) {
        let Some((seq, snapshot)) = self.snapshot(session_id) else {
            return;
        };
        let writer = Arc::clone(&self.writer);
        let id = session_id.to_string();
        let write = move || {
            if let Err(e) = writer.write(&id, seq, &snapshot) {
                warn!("Failed to persist session {id}: {e}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }
}

/// Cache every tool call of a transcript in order, which also re-mints the
/// numeric aliases in their original order.
pub fn replay_transcript(state: &mut SessionState, transcript: &[TranscriptMessage]) {
    let parsed = ParsedTranscript::parse(transcript);
    for (id, name, input) in parsed.calls {
        state.cache_tool(ToolCallRecord::new(&id, name, input));
    }
}
