//! The `prune` tool: lets the agent remove tool outputs by numeric ID.
//!
//! The agent sees numeric IDs in the `<prunable-tools>` listing and passes
//! them back here. Each ID is resolved through the session's
//! [`IdRegistry`](crate::state::IdRegistry); IDs that do not resolve (for
//! example because they predate the transcript window replayed after a
//! restart) are reported back rather than failing the call.
//!
//! A successful prune resets the nudge counter and asks the next idle pass
//! to stand down. The `onTool` strategies then run over what is left, and
//! whatever they remove is reported with the next idle notification.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::SnipConfig;
use crate::error::{Result, SnipError};
use crate::host::{ParsedTranscript, SessionAccessor};
use crate::janitor::describe;
use crate::notify::{Notifier, PruneSource, PruneSummary, PrunedTool, deliver};
use crate::state::store::replay_transcript;
use crate::state::{SessionStore, is_protected};
use crate::strategy::{Strategy, StrategyInput, run_strategies};
use crate::tokens::{TokenEstimator, estimate_outputs};

/// Tool name as exposed to the agent.
pub const TOOL_NAME: &str = "prune";

const DESCRIPTION: &str = "Remove tool outputs you no longer need from the conversation to \
free context. Pass the numeric IDs shown in the <prunable-tools> list. Pruned outputs are \
replaced by a short placeholder in every later request; the call itself stays visible.";

/// Arguments of the `prune` tool.
#[derive(Deserialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct PruneArgs {
    /// Numeric IDs from the <prunable-tools> list.
    pub ids: Vec<u64>,
    /// Why these outputs are no longer needed.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result returned to the agent.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PruneResult {
    pub pruned: Vec<PrunedTool>,
    pub tokens_saved: usize,
    /// Numeric IDs that map to no known tool call.
    pub unresolved: Vec<u64>,
    /// Numeric IDs whose tool may not be pruned.
    pub protected: Vec<u64>,
    /// Numeric IDs that were pruned before.
    pub already_pruned: Vec<u64>,
}

impl PruneResult {
    /// Text handed back to the agent as the tool output.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Pruned {} tool output(s), ~{} tokens saved.",
            self.pruned.len(),
            self.tokens_saved
        );
        let list = |ids: &[u64]| ids.iter().map(u64::to_string).collect::<Vec<_>>().join(", ");
        if !self.unresolved.is_empty() {
            let _ = write!(out, "\nUnknown IDs (ignored): {}", list(&self.unresolved));
        }
        if !self.protected.is_empty() {
            let _ = write!(out, "\nProtected, not pruned: {}", list(&self.protected));
        }
        if !self.already_pruned.is_empty() {
            let _ = write!(out, "\nAlready pruned: {}", list(&self.already_pruned));
        }
        out
    }
}

/// The manual prune entry point.
pub struct PruneTool {
    store: Arc<SessionStore>,
    config: Arc<SnipConfig>,
    accessor: Arc<dyn SessionAccessor>,
    notifier: Arc<dyn Notifier>,
    estimator: Arc<dyn TokenEstimator>,
    on_tool: Vec<Arc<dyn Strategy>>,
}

impl PruneTool {
    pub fn new(
        store: Arc<SessionStore>,
        config: Arc<SnipConfig>,
        accessor: Arc<dyn SessionAccessor>,
        notifier: Arc<dyn Notifier>,
        estimator: Arc<dyn TokenEstimator>,
        on_tool: Vec<Arc<dyn Strategy>>,
    ) -> Self {
        Self {
            store,
            config,
            accessor,
            notifier,
            estimator,
            on_tool,
        }
    }

    /// Function-calling definition (`name`, `description`, `parameters`).
    pub fn definition() -> Value {
        json!({
            "name": TOOL_NAME,
            "description": DESCRIPTION,
            "parameters": parameters_schema(),
        })
    }

    /// Validate raw JSON arguments and prune.
    pub async fn execute(&self, session_id: &str, arguments: &str) -> Result<PruneResult> {
        let args = parse_arguments(arguments)?;
        self.prune(session_id, args).await
    }

    /// Prune the outputs behind `args.ids`.
    pub async fn prune(&self, session_id: &str, args: PruneArgs) -> Result<PruneResult> {
        if let Ok(info) = self.accessor.get(session_id).await
            && info.is_subagent()
        {
            debug!("Manual prune ignored for subagent session {session_id}");
            return Ok(PruneResult::default());
        }
        self.store.ensure(session_id, self.accessor.as_ref()).await;

        let outputs = match self
            .accessor
            .messages(session_id, self.store.transcript_limit())
            .await
        {
            Ok(transcript) => {
                self.store
                    .with_session(session_id, |state| replay_transcript(state, &transcript));
                ParsedTranscript::parse(&transcript).outputs
            }
            Err(e) => {
                debug!("No transcript for {session_id}, token estimate will be empty: {e}");
                HashMap::new()
            }
        };

        let protected_tools = &self.config.protected_tools;
        let mut result = PruneResult::default();
        let (tools, candidates) = self.store.with_session(session_id, |state| {
            let mut newly = Vec::new();
            for numeric in &args.ids {
                let Some(actual) = state.registry.actual_id(*numeric).map(str::to_string) else {
                    result.unresolved.push(*numeric);
                    continue;
                };
                if state
                    .tools
                    .tool_name(&actual)
                    .is_some_and(|n| is_protected(n, protected_tools))
                {
                    result.protected.push(*numeric);
                } else if state.prune(&actual, protected_tools) {
                    newly.push(actual);
                } else {
                    result.already_pruned.push(*numeric);
                }
            }

            result.tokens_saved = estimate_outputs(self.estimator.as_ref(), &outputs, &newly);
            result.pruned = newly.iter().map(|id| describe(state, id)).collect();
            if !newly.is_empty() {
                state.stats.total_pruned += newly.len();
                state.stats.tokens_saved += result.tokens_saved;
                state.tracker.reset();
                state.tracker.skip_next_idle = true;
            }
            (state.tools.clone(), state.unpruned_candidates())
        });

        if !result.unresolved.is_empty() {
            warn!(
                "Manual prune in {session_id}: unresolved numeric id(s) {:?}",
                result.unresolved
            );
        }
        if result.pruned.is_empty() {
            return Ok(result);
        }
        info!(
            "Manual prune in {session_id}: {} output(s), ~{} tokens",
            result.pruned.len(),
            result.tokens_saved
        );

        self.collect_garbage(session_id, &tools, &candidates, &outputs).await;

        let mut summary = PruneSummary::new(session_id, PruneSource::Manual);
        summary.pruned = result.pruned.clone();
        summary.tokens_saved = result.tokens_saved;
        summary.reason = args.reason;
        deliver(self.notifier.as_ref(), &summary).await;

        self.store.persist(session_id);
        Ok(result)
    }

    /// Run the on-tool strategies over what is left and park their savings
    /// in the session's pending garbage.
    async fn collect_garbage(
        &self,
        session_id: &str,
        tools: &crate::state::ToolCache,
        candidates: &[String],
        outputs: &HashMap<String, String>,
    ) {
        if self.on_tool.is_empty() || candidates.is_empty() {
            return;
        }
        let input = StrategyInput {
            tools,
            candidates,
            protected_tools: &self.config.protected_tools,
            outputs,
        };
        let selected = match run_strategies(&self.on_tool, input).await {
            Ok(outcome) => outcome.pruned,
            Err(e) => {
                warn!("On-tool strategies for {session_id} failed: {e}");
                return;
            }
        };
        let protected = &self.config.protected_tools;
        self.store.with_session(session_id, |state| {
            let newly: Vec<String> = selected
                .into_iter()
                .filter(|id| state.prune(id, protected))
                .collect();
            if newly.is_empty() {
                return;
            }
            let tokens = estimate_outputs(self.estimator.as_ref(), outputs, &newly);
            state.stats.total_pruned += newly.len();
            state.stats.tokens_saved += tokens;
            state.pending.add(tokens, newly.len());
            debug!("Deduplicated {} more output(s) in {session_id}", newly.len());
        });
    }
}

/// JSON Schema of [`PruneArgs`].
pub fn parameters_schema() -> Value {
    let schema = schemars::schema_for!(PruneArgs);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| json!({"type": "object", "properties": {"ids": {"type": "array"}}}))
}

/// Check raw arguments against the schema, then decode them.
pub fn parse_arguments(arguments: &str) -> Result<PruneArgs> {
    let value: Value = serde_json::from_str(arguments)
        .map_err(|e| SnipError::InvalidArguments(format!("arguments are not JSON: {e}")))?;

    validate_against(&parameters_schema(), &value)?;
    serde_json::from_value(value).map_err(|e| SnipError::InvalidArguments(e.to_string()))
}

/// Schema check. A schema that does not compile is logged and skipped;
/// decoding into [`PruneArgs`] still rejects malformed arguments.
fn validate_against(schema: &Value, value: &Value) -> Result<()> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => {
            warn!("Failed to compile prune argument schema, skipping validation: {e}");
            return Ok(());
        }
    };
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SnipError::InvalidArguments(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostFuture, Role, SessionInfo, Transcript, TranscriptMessage, TranscriptPart};
    use crate::notify::NoopNotifier;
    use crate::state::MemoryPersistence;
    use crate::strategy::DeduplicationStrategy;
    use crate::tokens::CharRatioEstimator;

    struct Host(Transcript);

    impl SessionAccessor for Host {
        fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
            let info = SessionInfo {
                id: session_id.into(),
                ..Default::default()
            };
            Box::pin(async move { Ok(info) })
        }

        fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn messages<'a>(&'a self, _id: &'a str, _limit: usize) -> HostFuture<'a, Transcript> {
            let transcript = self.0.clone();
            Box::pin(async move { Ok(transcript) })
        }
    }

    fn exchange(id: &str, tool: &str, path: &str) -> [TranscriptMessage; 2] {
        [
            TranscriptMessage::new(
                Role::Assistant,
                vec![TranscriptPart::ToolCall {
                    id: id.into(),
                    name: tool.into(),
                    input: json!({"filePath": path}),
                }],
            ),
            TranscriptMessage::new(
                Role::Tool,
                vec![TranscriptPart::ToolResult {
                    id: id.into(),
                    output: "y".repeat(35),
                }],
            ),
        ]
    }

    /// c1 read(a), c2 task, c3 read(b), c4 read(b)
    fn tool(on_tool: Vec<Arc<dyn Strategy>>) -> PruneTool {
        let transcript: Transcript = [
            exchange("c1", "read", "a"),
            exchange("c2", "task", "t"),
            exchange("c3", "read", "b"),
            exchange("c4", "read", "b"),
        ]
        .into_iter()
        .flatten()
        .collect();
        PruneTool::new(
            Arc::new(SessionStore::new(Arc::new(MemoryPersistence::new()))),
            Arc::new(SnipConfig::default()),
            Arc::new(Host(transcript)),
            Arc::new(NoopNotifier),
            Arc::new(CharRatioEstimator::new(3.5)),
            on_tool,
        )
    }

    #[tokio::test]
    async fn resolves_numeric_ids_and_reports_the_rest() {
        let tool = tool(vec![]);
        let result = tool
            .prune("s", PruneArgs { ids: vec![1, 2, 99], reason: None })
            .await
            .unwrap();

        assert_eq!(result.pruned.len(), 1);
        assert_eq!(result.pruned[0].id, "c1");
        assert_eq!(result.tokens_saved, 10);
        assert_eq!(result.protected, vec![2]);
        assert_eq!(result.unresolved, vec![99]);

        let (skip, count) = tool
            .store
            .read("s", |s| (s.tracker.skip_next_idle, s.tracker.since_last_prune))
            .unwrap();
        assert!(skip);
        assert_eq!(count, 0);

        let again = tool
            .prune("s", PruneArgs { ids: vec![1], reason: None })
            .await
            .unwrap();
        assert_eq!(again.already_pruned, vec![1]);
    }

    #[tokio::test]
    async fn on_tool_strategies_feed_pending_garbage() {
        let tool = tool(vec![Arc::new(DeduplicationStrategy)]);
        tool.prune("s", PruneArgs { ids: vec![1], reason: Some("done".into()) })
            .await
            .unwrap();

        let (c3_pruned, pending) = tool
            .store
            .read("s", |s| (s.is_pruned("c3"), s.pending))
            .unwrap();
        assert!(c3_pruned);
        assert_eq!(pending.tools_deduped, 1);
        assert_eq!(pending.tokens_collected, 10);
    }

    #[tokio::test]
    async fn execute_validates_arguments() {
        let tool = tool(vec![]);
        let err = tool.execute("s", r#"{"ids": "one"}"#).await.unwrap_err();
        assert!(matches!(err, SnipError::InvalidArguments(_)));
        let err = tool.execute("s", "not json").await.unwrap_err();
        assert!(matches!(err, SnipError::InvalidArguments(_)));

        let result = tool.execute("s", r#"{"ids": [3]}"#).await.unwrap();
        assert_eq!(result.pruned[0].id, "c3");
    }

    #[test]
    fn uncompilable_schema_skips_validation() {
        let broken = json!({"type": 12});
        assert!(validate_against(&broken, &json!({"ids": "one"})).is_ok());

        let schema = parameters_schema();
        assert!(validate_against(&schema, &json!({"ids": [1]})).is_ok());
        assert!(matches!(
            validate_against(&schema, &json!({"ids": "one"})),
            Err(SnipError::InvalidArguments(_))
        ));
    }

    #[test]
    fn definition_exposes_schema() {
        let def = PruneTool::definition();
        assert_eq!(def["name"], "prune");
        assert_eq!(def["parameters"]["type"], "object");
        let required = def["parameters"]["required"].as_array().unwrap();
        assert!(required.contains(&json!("ids")));
    }

    #[test]
    fn render_mentions_unknown_ids() {
        let result = PruneResult {
            unresolved: vec![7, 8],
            ..Default::default()
        };
        let text = result.render();
        assert!(text.starts_with("Pruned 0 tool output(s)"));
        assert!(text.contains("Unknown IDs (ignored): 7, 8"));
    }
}
