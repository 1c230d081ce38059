//! Interfaces to the host that owns sessions and transcripts.
//!
//! snip never owns a conversation. It asks the host who a session's parent
//! is and what was said, through a [`SessionAccessor`]. Every call may fail;
//! callers treat failure as "no extra information" and carry on.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SnipError};

/// Boxed future returned by host collaborator traits.
///
/// Keeps the traits dyn-compatible so they can be shared as `Arc<dyn ...>`.
pub type HostFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Metadata about a host session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    /// Present for subagent sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SessionInfo {
    /// Subagent sessions have a non-empty parent reference.
    pub fn is_subagent(&self) -> bool {
        self.parent_id.as_deref().is_some_and(|p| !p.is_empty())
    }
}

// ── Transcript ─────────────────────────────────────────────────────

/// Author of a transcript message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a transcript message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        id: String,
        output: String,
    },
}

/// A provider-neutral conversation turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptMessage {
    pub role: Role,
    pub parts: Vec<TranscriptPart>,
}

impl TranscriptMessage {
    pub fn new(role: Role, parts: Vec<TranscriptPart>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![TranscriptPart::Text { text: text.into() }])
    }
}

/// Ordered session history, oldest first.
pub type Transcript = Vec<TranscriptMessage>;

// ── SessionAccessor ────────────────────────────────────────────────

/// Read-only view of host sessions.
pub trait SessionAccessor: Send + Sync {
    fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo>;

    fn list(&self) -> HostFuture<'_, Vec<SessionInfo>>;

    /// The most recent `limit` messages of a session, oldest first.
    fn messages<'a>(&'a self, session_id: &'a str, limit: usize) -> HostFuture<'a, Transcript>;
}

/// Accessor for hosts that expose nothing. Every call fails, which callers
/// treat as "not a subagent, no transcript".
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

impl SessionAccessor for NoSessions {
    fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
        Box::pin(async move {
            Err(SnipError::Host(format!(
                "no session accessor configured (asked for {session_id})"
            )))
        })
    }

    fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
        Box::pin(async { Err(SnipError::Host("no session accessor configured".into())) })
    }

    fn messages<'a>(&'a self, session_id: &'a str, _limit: usize) -> HostFuture<'a, Transcript> {
        Box::pin(async move {
            Err(SnipError::Host(format!(
                "no session accessor configured (asked for {session_id})"
            )))
        })
    }
}

/// Tool calls and outputs pulled out of a transcript.
#[derive(Debug, Clone, Default)]
pub struct ParsedTranscript {
    /// Call IDs in the order the calls appear.
    pub call_ids: Vec<String>,
    /// `(id, tool name, input)` for each call, same order as `call_ids`.
    pub calls: Vec<(String, String, Value)>,
    /// Output text keyed by normalized call ID.
    pub outputs: std::collections::HashMap<String, String>,
}

impl ParsedTranscript {
    pub fn parse(transcript: &[TranscriptMessage]) -> Self {
        let mut parsed = Self::default();
        for part in transcript.iter().flat_map(|m| m.parts.iter()) {
            match part {
                TranscriptPart::ToolCall { id, name, input } => {
                    parsed.call_ids.push(id.clone());
                    parsed.calls.push((id.clone(), name.clone(), input.clone()));
                }
                TranscriptPart::ToolResult { id, output } => {
                    parsed
                        .outputs
                        .insert(crate::state::normalize_id(id), output.clone());
                }
                TranscriptPart::Text { .. } => {}
            }
        }
        parsed
    }
}
