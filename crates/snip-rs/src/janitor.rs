//! The idle pass: prune a session in the background when it goes quiet.
//!
//! The janitor reads the session's recent transcript from the host, runs the
//! `onIdle` strategies over every unpruned tool call, records the result and
//! tells the user what happened (together with any savings earlier
//! background passes left pending). Persistence is fire-and-forget.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SnipConfig;
use crate::host::{ParsedTranscript, SessionAccessor};
use crate::inject::{SUMMARY_MAX_CHARS, summarize_parameters};
use crate::notify::{Notifier, PruneSource, PruneSummary, PrunedTool, deliver};
use crate::state::store::replay_transcript;
use crate::state::{SessionState, SessionStore};
use crate::strategy::{Strategy, StrategyInput, run_strategies};
use crate::tokens::{TokenEstimator, estimate_outputs};

/// Transcripts shorter than this carry too little context to judge.
pub const MIN_TRANSCRIPT_MESSAGES: usize = 3;

/// Why an idle pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Subagent,
    /// A manual prune asked for the next idle pass to be skipped.
    SkipFlag,
    NoTranscript,
    TooFewMessages(usize),
    StrategyFailed,
}

/// Result of one idle pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleOutcome {
    Skipped(SkipReason),
    /// Strategies ran; nothing new to prune and nothing pending to report.
    Nothing,
    Pruned(PruneSummary),
}

/// Runs idle passes.
pub struct Janitor {
    store: Arc<SessionStore>,
    config: Arc<SnipConfig>,
    accessor: Arc<dyn SessionAccessor>,
    notifier: Arc<dyn Notifier>,
    estimator: Arc<dyn TokenEstimator>,
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Janitor {
    pub fn new(
        store: Arc<SessionStore>,
        config: Arc<SnipConfig>,
        accessor: Arc<dyn SessionAccessor>,
        notifier: Arc<dyn Notifier>,
        estimator: Arc<dyn TokenEstimator>,
        strategies: Vec<Arc<dyn Strategy>>,
    ) -> Self {
        Self {
            store,
            config,
            accessor,
            notifier,
            estimator,
            strategies,
        }
    }

    /// Run the pass on a background task and return immediately.
    pub fn spawn(self: &Arc<Self>, session_id: impl Into<String>) -> tokio::task::JoinHandle<IdleOutcome> {
        let janitor = Arc::clone(self);
        let session_id = session_id.into();
        tokio::spawn(async move { janitor.run(&session_id).await })
    }

    /// One idle pass over `session_id`.
    pub async fn run(&self, session_id: &str) -> IdleOutcome {
        if !self.config.enabled {
            return IdleOutcome::Skipped(SkipReason::Disabled);
        }

        let title = match self.accessor.get(session_id).await {
            Ok(info) if info.is_subagent() => {
                debug!("Idle: session {session_id} is a subagent, skipping");
                return IdleOutcome::Skipped(SkipReason::Subagent);
            }
            Ok(info) => info.title,
            Err(e) => {
                debug!("Idle: session lookup for {session_id} failed, continuing: {e}");
                None
            }
        };

        self.store.ensure(session_id, self.accessor.as_ref()).await;
        let skip = self.store.with_session(session_id, |state| {
            std::mem::take(&mut state.tracker.skip_next_idle)
        });
        if skip {
            debug!("Idle: skipping session {session_id} after a manual prune");
            return IdleOutcome::Skipped(SkipReason::SkipFlag);
        }

        let transcript = match self
            .accessor
            .messages(session_id, self.store.transcript_limit())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!("Idle: failed to load transcript for {session_id}: {e}");
                return IdleOutcome::Skipped(SkipReason::NoTranscript);
            }
        };
        if transcript.len() < MIN_TRANSCRIPT_MESSAGES {
            return IdleOutcome::Skipped(SkipReason::TooFewMessages(transcript.len()));
        }
        let parsed = ParsedTranscript::parse(&transcript);

        let (tools, candidates) = self.store.with_session(session_id, |state| {
            if title.is_some() {
                state.name = title;
            }
            replay_transcript(state, &transcript);
            (state.tools.clone(), state.unpruned_candidates())
        });
        if candidates.is_empty() {
            return self.finish(session_id, Vec::new(), &parsed.outputs).await;
        }

        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &self.config.protected_tools,
            outputs: &parsed.outputs,
        };
        let selected = match run_strategies(&self.strategies, input).await {
            Ok(outcome) => outcome.pruned,
            Err(e) => {
                warn!("Idle: pruning pass for {session_id} abandoned: {e}");
                return IdleOutcome::Skipped(SkipReason::StrategyFailed);
            }
        };
        self.finish(session_id, selected, &parsed.outputs).await
    }

    /// Apply `selected`, report, persist.
    async fn finish(
        &self,
        session_id: &str,
        selected: Vec<String>,
        outputs: &HashMap<String, String>,
    ) -> IdleOutcome {
        let protected = &self.config.protected_tools;
        let summary = self.store.with_session(session_id, |state| {
            let newly: Vec<String> = selected
                .into_iter()
                .filter(|id| state.prune(id, protected))
                .collect();
            let tokens = estimate_outputs(self.estimator.as_ref(), outputs, &newly);
            if !newly.is_empty() {
                state.stats.total_pruned += newly.len();
                state.stats.tokens_saved += tokens;
                state.tracker.reset();
            }

            let mut summary = PruneSummary::new(session_id, PruneSource::Idle);
            summary.pruned = newly.iter().map(|id| describe(state, id)).collect();
            summary.tokens_saved = tokens;
            summary.garbage = state.pending.take();
            summary
        });

        if summary.is_empty() {
            debug!("Idle: nothing to prune in {session_id}");
            return IdleOutcome::Nothing;
        }
        info!(
            "Idle: pruned {} output(s) in {session_id}, ~{} tokens",
            summary.pruned.len(),
            summary.tokens_saved
        );
        deliver(self.notifier.as_ref(), &summary).await;
        if !summary.pruned.is_empty() {
            self.store.persist(session_id);
        }
        IdleOutcome::Pruned(summary)
    }
}

/// Notification entry for a pruned ID.
pub(crate) fn describe(state: &SessionState, id: &str) -> PrunedTool {
    let record = state.tools.get(id);
    PrunedTool {
        id: id.to_string(),
        numeric_id: state.registry.numeric_id(id),
        tool_name: record
            .map(|r| r.tool_name.clone())
            .unwrap_or_else(|| "unknown".into()),
        summary: record
            .map(|r| summarize_parameters(&r.parameters, SUMMARY_MAX_CHARS))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnipError;
    use crate::host::{HostFuture, Role, SessionInfo, Transcript, TranscriptMessage, TranscriptPart};
    use crate::notify::NoopNotifier;
    use crate::state::MemoryPersistence;
    use crate::strategy::{DeduplicationStrategy, StrategyKind};
    use crate::tokens::CharRatioEstimator;
    use futures::future::BoxFuture;
    use serde_json::json;

    struct Host {
        parent: Option<String>,
        transcript: Transcript,
    }

    impl SessionAccessor for Host {
        fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
            let info = SessionInfo {
                id: session_id.to_string(),
                parent_id: self.parent.clone(),
                title: Some("refactor".into()),
            };
            Box::pin(async move { Ok(info) })
        }

        fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn messages<'a>(&'a self, _id: &'a str, _limit: usize) -> HostFuture<'a, Transcript> {
            let transcript = self.transcript.clone();
            Box::pin(async move { Ok(transcript) })
        }
    }

    fn read_twice() -> Transcript {
        let call = |id: &str| {
            TranscriptMessage::new(
                Role::Assistant,
                vec![TranscriptPart::ToolCall {
                    id: id.into(),
                    name: "read".into(),
                    input: json!({"filePath": "a.rs"}),
                }],
            )
        };
        let result = |id: &str| {
            TranscriptMessage::new(
                Role::Tool,
                vec![TranscriptPart::ToolResult {
                    id: id.into(),
                    output: "x".repeat(70),
                }],
            )
        };
        vec![
            TranscriptMessage::text(Role::User, "read a.rs"),
            call("c1"),
            result("c1"),
            call("c2"),
            result("c2"),
        ]
    }

    fn janitor(host: Host, strategies: Vec<Arc<dyn Strategy>>) -> Janitor {
        let config = SnipConfig::default()
            .with_strategies(vec![StrategyKind::Deduplication], vec![StrategyKind::Deduplication]);
        Janitor::new(
            Arc::new(SessionStore::new(Arc::new(MemoryPersistence::new()))),
            Arc::new(config),
            Arc::new(host),
            Arc::new(NoopNotifier),
            Arc::new(CharRatioEstimator::new(7.0)),
            strategies,
        )
    }

    fn host(parent: Option<&str>, transcript: Transcript) -> Host {
        Host {
            parent: parent.map(str::to_string),
            transcript,
        }
    }

    #[tokio::test]
    async fn prunes_earlier_duplicate() {
        let janitor = janitor(host(None, read_twice()), vec![Arc::new(DeduplicationStrategy)]);
        janitor.store.with_session("s", |s| s.tracker.since_last_prune = 4);

        let IdleOutcome::Pruned(summary) = janitor.run("s").await else {
            panic!("expected a prune");
        };
        assert_eq!(summary.pruned.len(), 1);
        assert_eq!(summary.pruned[0].id, "c1");
        assert_eq!(summary.pruned[0].numeric_id, Some(1));
        assert_eq!(summary.tokens_saved, 10);

        let (pruned, stats, count, name) = janitor
            .store
            .read("s", |s| {
                (
                    s.is_pruned("c1") && !s.is_pruned("c2"),
                    s.stats,
                    s.tracker.since_last_prune,
                    s.name.clone(),
                )
            })
            .unwrap();
        assert!(pruned);
        assert_eq!(stats.total_pruned, 1);
        assert_eq!(stats.tokens_saved, 10);
        assert_eq!(count, 0);
        assert_eq!(name.as_deref(), Some("refactor"));

        assert_eq!(janitor.run("s").await, IdleOutcome::Nothing);
    }

    #[tokio::test]
    async fn subagent_sessions_are_skipped() {
        let janitor = janitor(host(Some("root"), read_twice()), vec![Arc::new(DeduplicationStrategy)]);
        assert_eq!(janitor.run("s").await, IdleOutcome::Skipped(SkipReason::Subagent));
    }

    #[tokio::test]
    async fn short_transcripts_are_skipped() {
        let short = read_twice().into_iter().take(2).collect();
        let janitor = janitor(host(None, short), vec![Arc::new(DeduplicationStrategy)]);
        assert_eq!(
            janitor.run("s").await,
            IdleOutcome::Skipped(SkipReason::TooFewMessages(2))
        );
    }

    #[tokio::test]
    async fn skip_flag_is_consumed() {
        let janitor = janitor(host(None, read_twice()), vec![Arc::new(DeduplicationStrategy)]);
        janitor.store.with_session("s", |s| s.tracker.skip_next_idle = true);
        assert_eq!(janitor.run("s").await, IdleOutcome::Skipped(SkipReason::SkipFlag));
        assert!(matches!(janitor.run("s").await, IdleOutcome::Pruned(_)));
    }

    struct Exploding;

    impl Strategy for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn select<'a>(&'a self, _input: StrategyInput<'a>) -> BoxFuture<'a, crate::error::Result<Vec<String>>> {
            Box::pin(async {
                Err(SnipError::Strategy {
                    strategy: "exploding".into(),
                    reason: "no".into(),
                })
            })
        }
    }

    #[tokio::test]
    async fn strategy_failure_prunes_nothing() {
        let janitor = janitor(
            host(None, read_twice()),
            vec![Arc::new(DeduplicationStrategy), Arc::new(Exploding)],
        );
        assert_eq!(
            janitor.run("s").await,
            IdleOutcome::Skipped(SkipReason::StrategyFailed)
        );
        assert!(janitor.store.pruned_ids("s").is_empty());
    }

    #[tokio::test]
    async fn pending_garbage_is_reported_once() {
        let janitor = janitor(host(None, read_twice()), vec![]);
        janitor.store.with_session("s", |s| s.pending.add(120, 2));

        let IdleOutcome::Pruned(summary) = janitor.run("s").await else {
            panic!("expected garbage report");
        };
        assert!(summary.pruned.is_empty());
        assert_eq!(summary.garbage.tools_deduped, 2);
        assert_eq!(janitor.run("s").await, IdleOutcome::Nothing);
    }
}
