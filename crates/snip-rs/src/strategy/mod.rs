//! Pruning strategies: decide which tool outputs are no longer worth sending.
//!
//! Strategies run as a pipeline. Each one sees only the candidates no earlier
//! strategy claimed, so the remaining set shrinks monotonically and no ID is
//! decided twice. A failing strategy fails the whole run; callers treat that
//! as "nothing pruned".

pub mod analysis;
pub mod dedup;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::Completion;
use crate::error::Result;
use crate::state::{ToolCache, normalize_id};

pub use analysis::AnalysisStrategy;
pub use dedup::{DeduplicationStrategy, deduplicate};

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInput<'a> {
    pub tools: &'a ToolCache,
    /// Unpruned candidate IDs, oldest first.
    pub candidates: &'a [String],
    pub protected_tools: &'a [String],
    /// Output text keyed by normalized call ID, where known.
    pub outputs: &'a HashMap<String, String>,
}

/// A pruning decision procedure.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// IDs from `input.candidates` to prune.
    fn select<'a>(&'a self, input: StrategyInput<'a>) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Strategy names as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Deduplication,
    AiAnalysis,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Deduplication => "deduplication",
            StrategyKind::AiAnalysis => "ai-analysis",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instantiate configured strategies. `ai-analysis` is skipped (with a debug
/// log) when no completion client is available.
pub fn build(kinds: &[StrategyKind], completion: Option<Arc<dyn Completion>>) -> Vec<Arc<dyn Strategy>> {
    kinds
        .iter()
        .filter_map(|kind| -> Option<Arc<dyn Strategy>> {
            match kind {
                StrategyKind::Deduplication => Some(Arc::new(DeduplicationStrategy)),
                StrategyKind::AiAnalysis => match &completion {
                    Some(client) => Some(Arc::new(AnalysisStrategy::new(Arc::clone(client)))),
                    None => {
                        debug!("ai-analysis configured without a completion client; skipping");
                        None
                    }
                },
            }
        })
        .collect()
}

/// What a strategy pipeline decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyOutcome {
    /// Every ID to prune, in the order strategies claimed them.
    pub pruned: Vec<String>,
    /// `(strategy name, IDs it claimed)` for each strategy that ran.
    pub by_strategy: Vec<(String, Vec<String>)>,
}

impl StrategyOutcome {
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty()
    }
}

/// Run `strategies` in order over the candidates of `input`.
///
/// Each strategy receives only what is left; IDs a strategy returns that are
/// not among the remaining candidates are ignored.
pub async fn run_strategies(
    strategies: &[Arc<dyn Strategy>],
    input: StrategyInput<'_>,
) -> Result<StrategyOutcome> {
    let mut remaining: Vec<String> = input.candidates.iter().map(|c| normalize_id(c)).collect();
    let mut outcome = StrategyOutcome::default();

    for strategy in strategies {
        if remaining.is_empty() {
            break;
        }
        let step = StrategyInput {
            candidates: &remaining,
            ..input
        };
        let selected = strategy.select(step).await?;
        let remaining_set: HashSet<&str> = remaining.iter().map(String::as_str).collect();
        let mut claimed: Vec<String> = Vec::new();
        for id in selected.iter().map(|id| normalize_id(id)) {
            if remaining_set.contains(id.as_str()) && !claimed.contains(&id) {
                claimed.push(id);
            }
        }
        debug!("Strategy {} claimed {} id(s)", strategy.name(), claimed.len());

        remaining.retain(|id| !claimed.contains(id));
        outcome.pruned.extend(claimed.iter().cloned());
        outcome
            .by_strategy
            .push((strategy.name().to_string(), claimed));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnipError;
    use crate::state::ToolCallRecord;
    use serde_json::json;

    struct Fixed(&'static str, Vec<&'static str>);

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn select<'a>(&'a self, input: StrategyInput<'a>) -> BoxFuture<'a, Result<Vec<String>>> {
            let picked = self
                .1
                .iter()
                .filter(|id| input.candidates.iter().any(|c| c.as_str() == **id))
                .map(|id| id.to_string())
                .collect();
            Box::pin(async move { Ok(picked) })
        }
    }

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn select<'a>(&'a self, _input: StrategyInput<'a>) -> BoxFuture<'a, Result<Vec<String>>> {
            Box::pin(async {
                Err(SnipError::Strategy {
                    strategy: "failing".into(),
                    reason: "boom".into(),
                })
            })
        }
    }

    fn cache(ids: &[&str]) -> ToolCache {
        let mut tools = ToolCache::default();
        for id in ids {
            tools.insert(ToolCallRecord::new(id, "read", json!({"filePath": id})));
        }
        tools
    }

    #[tokio::test]
    async fn remaining_set_shrinks_between_strategies() {
        let tools = cache(&["a", "b", "c"]);
        let candidates = vec!["a".to_string(), "b".into(), "c".into()];
        let outputs = HashMap::new();
        let strategies: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(Fixed("first", vec!["a", "b"])),
            Arc::new(Fixed("second", vec!["a", "c", "zzz"])),
        ];
        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &[],
            outputs: &outputs,
        };

        let outcome = run_strategies(&strategies, input).await.unwrap();
        assert_eq!(outcome.pruned, vec!["a", "b", "c"]);
        assert_eq!(outcome.by_strategy[1], ("second".to_string(), vec!["c".to_string()]));
    }

    #[tokio::test]
    async fn failure_aborts_the_run() {
        let tools = cache(&["a"]);
        let candidates = vec!["a".to_string()];
        let outputs = HashMap::new();
        let strategies: Vec<Arc<dyn Strategy>> =
            vec![Arc::new(Fixed("first", vec![])), Arc::new(Failing)];
        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &[],
            outputs: &outputs,
        };
        assert!(run_strategies(&strategies, input).await.is_err());
    }

    #[test]
    fn kind_serde_names() {
        let kinds: Vec<StrategyKind> =
            serde_json::from_value(json!(["deduplication", "ai-analysis"])).unwrap();
        assert_eq!(kinds, vec![StrategyKind::Deduplication, StrategyKind::AiAnalysis]);
        assert_eq!(StrategyKind::AiAnalysis.to_string(), "ai-analysis");
    }

    #[test]
    fn build_skips_analysis_without_client() {
        let built = build(&[StrategyKind::Deduplication, StrategyKind::AiAnalysis], None);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name(), "deduplication");
    }
}
