//! A [`SessionAccessor`] fed by the requests flowing through the proxy.
//!
//! Each request body already carries the session's full history, so the most
//! recent body is the transcript. Parent links come from the
//! `x-snip-parent-session` header.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use snip_rs::SnipError;
use snip_rs::host::{HostFuture, SessionAccessor, SessionInfo, Transcript};

#[derive(Debug, Default)]
struct Recorded {
    parent_id: Option<String>,
    transcript: Transcript,
}

/// Sessions observed by the proxy.
#[derive(Debug, Default)]
pub struct RecordingAccessor {
    sessions: Mutex<HashMap<String, Recorded>>,
}

impl RecordingAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Recorded>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remember a session's parent. A request without the header never
    /// clears a parent seen earlier.
    pub fn set_parent(&self, session_id: &str, parent_id: Option<String>) {
        let mut sessions = self.lock();
        let entry = sessions.entry(session_id.to_string()).or_default();
        if parent_id.is_some() {
            entry.parent_id = parent_id;
        }
    }

    /// Replace a session's transcript with the latest one.
    pub fn record(&self, session_id: &str, transcript: Transcript) {
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .transcript = transcript;
    }

    pub fn is_subagent(&self, session_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|r| r.parent_id.as_deref().is_some_and(|p| !p.is_empty()))
    }

    fn info(session_id: &str, recorded: &Recorded) -> SessionInfo {
        SessionInfo {
            id: session_id.to_string(),
            parent_id: recorded.parent_id.clone(),
            title: None,
        }
    }
}

impl SessionAccessor for RecordingAccessor {
    fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
        let found = self
            .lock()
            .get(session_id)
            .map(|r| Self::info(session_id, r));
        Box::pin(async move {
            found.ok_or_else(|| SnipError::Host(format!("session {session_id} not seen yet")))
        })
    }

    fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
        let infos = self
            .lock()
            .iter()
            .map(|(id, r)| Self::info(id, r))
            .collect();
        Box::pin(async move { Ok(infos) })
    }

    fn messages<'a>(&'a self, session_id: &'a str, limit: usize) -> HostFuture<'a, Transcript> {
        let found = self.lock().get(session_id).map(|r| {
            let skip = r.transcript.len().saturating_sub(limit);
            r.transcript.iter().skip(skip).cloned().collect::<Transcript>()
        });
        Box::pin(async move {
            found.ok_or_else(|| SnipError::Host(format!("no transcript for session {session_id}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_rs::host::{Role, TranscriptMessage};

    #[tokio::test]
    async fn unknown_session_fails() {
        let recorder = RecordingAccessor::new();
        assert!(recorder.get("nope").await.is_err());
        assert!(recorder.messages("nope", 10).await.is_err());
    }

    #[tokio::test]
    async fn parent_survives_requests_without_header() {
        let recorder = RecordingAccessor::new();
        recorder.set_parent("child", Some("root".into()));
        recorder.set_parent("child", None);
        assert!(recorder.is_subagent("child"));
        let info = recorder.get("child").await.unwrap();
        assert_eq!(info.parent_id.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn messages_returns_tail() {
        let recorder = RecordingAccessor::new();
        recorder.record(
            "s",
            vec![
                TranscriptMessage::text(Role::User, "one"),
                TranscriptMessage::text(Role::Assistant, "two"),
                TranscriptMessage::text(Role::User, "three"),
            ],
        );
        let tail = recorder.messages("s", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0], TranscriptMessage::text(Role::Assistant, "two"));
    }

    #[tokio::test]
    async fn list_reports_every_session() {
        let recorder = RecordingAccessor::new();
        recorder.record("a", Vec::new());
        recorder.set_parent("b", Some("a".into()));
        let mut infos = recorder.list().await.unwrap();
        infos.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(infos.len(), 2);
        assert!(!infos[0].is_subagent());
        assert!(infos[1].is_subagent());
    }
}
