//! The request-rewrite pipeline.
//!
//! Called once per outbound provider request. Linear, no loops back:
//!
//! 1. detect the wire format (pass through if none)
//! 2. register positional call IDs (Gemini) and cache tool parameters into
//!    the session
//! 3. if on-tool strategies are configured: append the synthetic
//!    instruction, count new tool results, inject the prunable listing
//!    (with the nudge when due)
//! 4. stop if the request carries no tool outputs
//! 5. resolve the pruned-ID set (the session's own, or the union over every
//!    non-subagent session when the request names none)
//! 6. stop if that set is empty
//! 7. replace every pruned, unprotected output with the placeholder
//! 8. log what changed
//!
//! Nothing here fails a request: any error degrades to forwarding the body
//! unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::config::SnipConfig;
use crate::format::{Format, PRUNED_PLACEHOLDER};
use crate::host::SessionAccessor;
use crate::inject::{NUDGE_TEXT, SYNTHETIC_INSTRUCTION, build_injection, prunable_lines, should_nudge};
use crate::state::{SessionState, SessionStore, is_protected};

/// What a rewrite did to a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Instruction or listing text was added.
    pub injected: bool,
    /// Tool outputs replaced by the placeholder.
    pub replaced: usize,
}

impl RewriteOutcome {
    pub fn is_modified(&self) -> bool {
        self.injected || self.replaced > 0
    }
}

/// Rewrites outbound request bodies for one process.
#[derive(Clone)]
pub struct RequestHandler {
    store: Arc<SessionStore>,
    config: Arc<SnipConfig>,
    accessor: Arc<dyn SessionAccessor>,
}

impl RequestHandler {
    pub fn new(
        store: Arc<SessionStore>,
        config: Arc<SnipConfig>,
        accessor: Arc<dyn SessionAccessor>,
    ) -> Self {
        Self {
            store,
            config,
            accessor,
        }
    }

    /// Rewrite a raw JSON body. Returns `None` when the body should be sent
    /// as-is (unparsable, unknown format, or nothing to change).
    pub async fn rewrite(&self, session_id: Option<&str>, body: &[u8]) -> Option<Vec<u8>> {
        let mut value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                trace!("Request body is not JSON, passing through: {e}");
                return None;
            }
        };
        if !self.rewrite_value(session_id, &mut value).await.is_modified() {
            return None;
        }
        match serde_json::to_vec(&value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Failed to serialize rewritten body, passing through: {e}");
                None
            }
        }
    }

    /// Rewrite a parsed body in place.
    pub async fn rewrite_value(&self, session_id: Option<&str>, body: &mut Value) -> RewriteOutcome {
        let mut outcome = RewriteOutcome::default();
        if !self.config.enabled {
            return outcome;
        }
        let Some(format) = Format::detect(body) else {
            trace!("No known format, passing through");
            return outcome;
        };

        if let Some(id) = session_id {
            if self.is_subagent(id).await {
                debug!("Session {id} is a subagent, not pruning");
                return outcome;
            }
            self.store.ensure(id, self.accessor.as_ref()).await;
        }

        let Some(data) = format.data_array(body) else {
            return outcome;
        };

        // Steps 2-3.
        let protected = &self.config.protected_tools;
        let mut scratch = SessionState::new();
        match session_id {
            Some(id) => {
                outcome.injected = self
                    .store
                    .with_session(id, |state| self.prepare(format, &mut *data, state));
            }
            None => {
                format.register_call_positions(data, &mut scratch);
                format.cache_tool_parameters(data, &mut scratch);
            }
        }

        // Step 4.
        if !format.has_tool_outputs(data) {
            return outcome;
        }

        // Steps 5-6.
        let pruned = match session_id {
            Some(id) => self.store.pruned_ids(id),
            None => self.aggregate_pruned().await,
        };
        if pruned.is_empty() {
            return outcome;
        }

        // Step 7.
        let replace = |data: &mut Vec<Value>, state: &SessionState| {
            let mut replaced = 0;
            for output in format.extract_tool_outputs(data, state) {
                if !pruned.contains(&output.id) {
                    continue;
                }
                let name = output
                    .tool_name
                    .clone()
                    .or_else(|| self.store.find_tool_name(&output.id));
                if name.as_deref().is_some_and(|n| is_protected(n, protected)) {
                    continue;
                }
                if format.replace_tool_output(data, &output.id, PRUNED_PLACEHOLDER, state) {
                    replaced += 1;
                }
            }
            replaced
        };
        outcome.replaced = match session_id {
            Some(id) => self
                .store
                .with_session(id, |state| replace(&mut *data, &*state)),
            None => replace(&mut *data, &scratch),
        };

        // Step 8.
        if outcome.replaced > 0 {
            let meta = format.log_metadata(data);
            let session = session_id.unwrap_or("-");
            if self.config.debug {
                info!(
                    session,
                    format = meta.format,
                    items = meta.items,
                    tool_outputs = meta.tool_outputs,
                    "Replaced {} pruned tool output(s)",
                    outcome.replaced
                );
            } else {
                debug!(
                    session,
                    format = meta.format,
                    items = meta.items,
                    tool_outputs = meta.tool_outputs,
                    "Replaced {} pruned tool output(s)",
                    outcome.replaced
                );
            }
        }
        outcome
    }

    /// Cache parameters and, when on-tool strategies are configured, add the
    /// instruction and listing. Returns whether text was injected.
    fn prepare(&self, format: Format, data: &mut Vec<Value>, state: &mut SessionState) -> bool {
        let minted = format.register_call_positions(data, state);
        if minted > 0 {
            debug!("Registered {minted} call position(s)");
        }
        format.cache_tool_parameters(data, state);
        if !self.config.injects() {
            return false;
        }
        let protected = &self.config.protected_tools;

        let mut injected = format.inject_synth(data, SYNTHETIC_INSTRUCTION, NUDGE_TEXT);
        let counted = format.track_new_tool_results(data, state, protected);
        if counted > 0 {
            trace!("Counted {counted} new tool result(s)");
        }

        let candidates = state.unpruned_candidates();
        let lines = prunable_lines(state, &candidates, protected);
        let nudge = should_nudge(state.tracker.since_last_prune, self.config.nudge_frequency);
        if format.inject_prunable_list(data, &build_injection(&lines, nudge)) {
            debug!(
                "Injected prunable list: {} tool(s), nudge={nudge}",
                lines.len()
            );
            injected = true;
        }
        injected
    }

    /// Subagent check. Fails open: an accessor error means "not a subagent".
    async fn is_subagent(&self, session_id: &str) -> bool {
        match self.accessor.get(session_id).await {
            Ok(info) => info.is_subagent(),
            Err(e) => {
                trace!("Subagent check for {session_id} failed, assuming not: {e}");
                false
            }
        }
    }

    /// Union of pruned sets over every non-subagent session.
    async fn aggregate_pruned(&self) -> HashSet<String> {
        let session_ids: Vec<String> = match self.accessor.list().await {
            Ok(sessions) => sessions
                .into_iter()
                .filter(|s| !s.is_subagent())
                .map(|s| s.id)
                .collect(),
            Err(e) => {
                trace!("Session list unavailable, using loaded sessions: {e}");
                self.store.session_ids()
            }
        };
        let mut pruned = HashSet::new();
        for id in session_ids {
            pruned.extend(self.store.pruned_ids(&id));
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostFuture, SessionInfo, Transcript};
    use crate::state::MemoryPersistence;
    use crate::strategy::StrategyKind;
    use serde_json::json;

    /// Accessor with fixed session metadata and no transcripts.
    struct Sessions(Vec<SessionInfo>);

    impl SessionAccessor for Sessions {
        fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
            let found = self.0.iter().find(|s| s.id == session_id).cloned();
            Box::pin(async move {
                found.ok_or_else(|| crate::error::SnipError::Host("unknown session".into()))
            })
        }

        fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
            let all = self.0.clone();
            Box::pin(async move { Ok(all) })
        }

        fn messages<'a>(&'a self, _id: &'a str, _limit: usize) -> HostFuture<'a, Transcript> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn session(id: &str, parent: Option<&str>) -> SessionInfo {
        SessionInfo {
            id: id.into(),
            parent_id: parent.map(str::to_string),
            title: None,
        }
    }

    fn handler_with(config: SnipConfig, sessions: Vec<SessionInfo>) -> RequestHandler {
        let store = Arc::new(SessionStore::new(Arc::new(MemoryPersistence::new())));
        RequestHandler::new(store, Arc::new(config), Arc::new(Sessions(sessions)))
    }

    fn body() -> Value {
        json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "look at a.rs twice"},
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "read", "arguments": "{\"filePath\":\"a.rs\"}"}},
                    {"id": "c2", "type": "function", "function": {"name": "task", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "old contents"},
                {"role": "tool", "tool_call_id": "c2", "content": "subagent result"}
            ]
        })
    }

    fn no_injection() -> SnipConfig {
        SnipConfig::default().with_strategies(vec![StrategyKind::Deduplication], vec![])
    }

    #[tokio::test]
    async fn unknown_format_passes_through() {
        let handler = handler_with(SnipConfig::default(), vec![]);
        let mut value = json!({"prompt": "hi"});
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;
        assert!(!outcome.is_modified());
        assert_eq!(handler.rewrite(Some("s"), b"not json").await, None);
    }

    #[tokio::test]
    async fn replaces_pruned_outputs_and_keeps_protected() {
        let handler = handler_with(no_injection(), vec![session("s", None)]);
        handler.store.with_session("s", |s| {
            s.prune("c1", &[]);
            s.prune("c2", &[]);
        });

        let mut value = body();
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;

        assert_eq!(outcome.replaced, 1);
        assert!(!outcome.injected);
        assert_eq!(value["messages"][2]["content"], PRUNED_PLACEHOLDER);
        assert_eq!(value["messages"][3]["content"], "subagent result");
        assert_eq!(value["messages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn subagents_are_left_alone() {
        let handler = handler_with(SnipConfig::default(), vec![session("child", Some("root"))]);
        handler.store.with_session("child", |s| s.prune("c1", &[]));

        let mut value = body();
        let original = value.clone();
        assert!(!handler.rewrite_value(Some("child"), &mut value).await.is_modified());
        assert_eq!(value, original);
    }

    #[tokio::test]
    async fn accessor_failure_fails_open() {
        // "s" is unknown to the accessor, so the subagent check errors.
        let handler = handler_with(no_injection(), vec![]);
        handler.store.with_session("s", |s| s.prune("c1", &[]));
        let mut value = body();
        assert_eq!(handler.rewrite_value(Some("s"), &mut value).await.replaced, 1);
    }

    #[tokio::test]
    async fn injection_lists_unpruned_unprotected_tools() {
        let handler = handler_with(SnipConfig::default(), vec![session("s", None)]);
        let mut value = body();
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;

        assert!(outcome.injected);
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        let first = messages[0]["content"].as_str().unwrap();
        assert!(first.ends_with(SYNTHETIC_INSTRUCTION));
        let listing = messages[4]["content"].as_str().unwrap();
        assert!(listing.contains("1: read, a.rs"));
        assert!(!listing.contains("task"));
        assert!(!listing.contains(NUDGE_TEXT));
    }

    #[tokio::test]
    async fn rewrite_is_idempotent_for_the_same_input() {
        let handler = handler_with(SnipConfig::default(), vec![session("s", None)]);
        handler.store.with_session("s", |s| s.prune("c1", &[]));

        let mut once = body();
        handler.rewrite_value(Some("s"), &mut once).await;
        let mut twice = body();
        handler.rewrite_value(Some("s"), &mut twice).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn rewriting_an_already_rewritten_body_changes_nothing() {
        let handler = handler_with(SnipConfig::default(), vec![session("s", None)]);

        let mut value = body();
        let first = handler.rewrite_value(Some("s"), &mut value).await;
        assert!(first.injected);
        let after_first = value.clone();

        let second = handler.rewrite_value(Some("s"), &mut value).await;
        assert!(!second.injected);
        assert_eq!(value, after_first);

        let text = value.to_string();
        assert_eq!(text.matches("<instruction name=context_management>").count(), 1);
        assert_eq!(text.matches("<prunable-tools>").count(), 1);
    }

    #[tokio::test]
    async fn nudge_appears_past_frequency() {
        let config = SnipConfig::default().with_nudge_frequency(1);
        let handler = handler_with(config, vec![session("s", None)]);
        let mut value = body();
        handler.rewrite_value(Some("s"), &mut value).await;
        // Two tool results, one protected: count is 1, not past 1.
        let listing = value["messages"][4]["content"].as_str().unwrap().to_string();
        assert!(!listing.contains(NUDGE_TEXT));

        let mut value = body();
        value["messages"].as_array_mut().unwrap().insert(
            2,
            json!({"role": "assistant", "tool_calls": [
                {"id": "c3", "type": "function", "function": {"name": "bash", "arguments": "{\"command\":\"ls\"}"}}
            ]}),
        );
        value["messages"]
            .as_array_mut()
            .unwrap()
            .push(json!({"role": "tool", "tool_call_id": "c3", "content": "a.rs"}));
        handler.rewrite_value(Some("s"), &mut value).await;
        let messages = value["messages"].as_array().unwrap();
        let listing = messages.last().unwrap()["content"].as_str().unwrap();
        assert!(listing.contains(NUDGE_TEXT));
    }

    #[tokio::test]
    async fn no_session_uses_non_subagent_union() {
        let handler = handler_with(
            no_injection(),
            vec![session("main", None), session("child", Some("main"))],
        );
        handler.store.with_session("child", |s| s.prune("c1", &[]));

        let mut value = body();
        assert_eq!(handler.rewrite_value(None, &mut value).await.replaced, 0);

        handler.store.with_session("main", |s| s.prune("c1", &[]));
        let mut value = body();
        assert_eq!(handler.rewrite_value(None, &mut value).await.replaced, 1);
    }

    // ── Other wire formats ─────────────────────────────────────────

    fn gemini_body() -> Value {
        json!({
            "contents": [
                {"role": "user", "parts": [{"text": "find the todos"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "grep", "args": {"pattern": "TODO"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "grep", "response": {"content": "src/a.rs:1"}}}
                ]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "grep", "args": {"pattern": "FIXME"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "grep", "response": {"content": "src/b.rs:2"}}}
                ]}
            ]
        })
    }

    fn gemini_output(value: &Value, idx: usize) -> &Value {
        &value["contents"][idx]["parts"][0]["functionResponse"]["response"]["content"]
    }

    fn responses_body() -> Value {
        json!({
            "model": "o3",
            "input": [
                {"type": "message", "role": "user", "content": [
                    {"type": "input_text", "text": "what's in Cargo.toml?"}
                ]},
                {"type": "function_call", "call_id": "call_x", "name": "read",
                 "arguments": "{\"filePath\":\"Cargo.toml\"}"},
                {"type": "function_call_output", "call_id": "call_x", "output": "[package]"}
            ]
        })
    }

    #[tokio::test]
    async fn gemini_calls_are_listed_and_pruned_by_position() {
        let handler = handler_with(SnipConfig::default(), vec![session("s", None)]);

        let mut value = gemini_body();
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;
        assert!(outcome.injected);
        let contents = value["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 6);
        let listing = contents[5]["parts"][0]["text"].as_str().unwrap();
        assert!(listing.contains("1: grep"));
        assert!(listing.contains("2: grep"));

        handler.store.with_session("s", |s| s.prune("gemini_grep_0", &[]));
        let mut value = gemini_body();
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;
        assert_eq!(outcome.replaced, 1);
        assert_eq!(gemini_output(&value, 2), PRUNED_PLACEHOLDER);
        assert_eq!(gemini_output(&value, 4), "src/b.rs:2");
    }

    #[tokio::test]
    async fn gemini_without_session_registers_positions() {
        let handler = handler_with(no_injection(), vec![session("main", None)]);
        handler.store.with_session("main", |s| s.prune("gemini_grep_1", &[]));

        let mut value = gemini_body();
        assert_eq!(handler.rewrite_value(None, &mut value).await.replaced, 1);
        assert_eq!(gemini_output(&value, 2), "src/a.rs:1");
        assert_eq!(gemini_output(&value, 4), PRUNED_PLACEHOLDER);
    }

    #[tokio::test]
    async fn responses_outputs_are_listed_and_pruned() {
        let handler = handler_with(SnipConfig::default(), vec![session("s", None)]);

        let mut value = responses_body();
        assert!(handler.rewrite_value(Some("s"), &mut value).await.injected);
        let input = value["input"].as_array().unwrap();
        assert_eq!(input.len(), 4);
        assert!(input[0]["content"][1]["text"]
            .as_str()
            .unwrap()
            .starts_with("<instruction name=context_management>"));
        let listing = input[3]["content"][0]["text"].as_str().unwrap();
        assert!(listing.contains("1: read, Cargo.toml"));

        handler.store.with_session("s", |s| s.prune("call_x", &[]));
        let mut value = responses_body();
        let outcome = handler.rewrite_value(Some("s"), &mut value).await;
        assert_eq!(outcome.replaced, 1);
        assert_eq!(value["input"][2]["output"], PRUNED_PLACEHOLDER);
        assert_eq!(value["input"][2]["call_id"], "call_x");
    }

    #[tokio::test]
    async fn disabled_config_does_nothing() {
        let handler = handler_with(SnipConfig::default().with_enabled(false), vec![]);
        let mut value = body();
        assert!(!handler.rewrite_value(Some("s"), &mut value).await.is_modified());
    }
}
