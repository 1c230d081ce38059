//! LLM-assisted pruning: ask a model which tool outputs the conversation no
//! longer needs.
//!
//! Best effort by nature. The reply is trusted only as far as it names real,
//! unprotected candidates; any transport or parse failure is a strategy
//! error, which abandons the whole idle pass.

use std::fmt::Write as _;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Strategy, StrategyInput};
use crate::client::Completion;
use crate::error::{Result, SnipError};
use crate::inject::{summarize_parameters, truncate_chars};
use crate::state::{is_protected, normalize_id};

const NAME: &str = "ai-analysis";

/// Characters of each output shown to the model.
const OUTPUT_EXCERPT_CHARS: usize = 400;

const SYSTEM_PROMPT: &str = "You review tool outputs in a coding agent's conversation and decide \
which are obsolete: superseded by a later call, irrelevant to the current task, or already \
acted upon. Reply with a JSON array of the obsolete IDs and nothing else. Reply [] when \
everything is still needed.";

pub struct AnalysisStrategy {
    completion: Arc<dyn Completion>,
}

impl AnalysisStrategy {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }

    async fn run(&self, prompt: String, allowed: Vec<String>) -> Result<Vec<String>> {
        let reply = self
            .completion
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| SnipError::Strategy {
                strategy: NAME.into(),
                reason: e.to_string(),
            })?;
        let named = parse_id_list(&reply).ok_or_else(|| SnipError::Strategy {
            strategy: NAME.into(),
            reason: format!("reply is not a JSON array of IDs: {}", truncate_chars(&reply, 200)),
        })?;

        let mut selected = Vec::new();
        for id in named.iter().map(|id| normalize_id(id)) {
            if allowed.contains(&id) {
                if !selected.contains(&id) {
                    selected.push(id);
                }
            } else {
                debug!("Ignoring unknown id from analysis reply: {id}");
            }
        }
        Ok(selected)
    }
}

impl Strategy for AnalysisStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn select<'a>(&'a self, input: StrategyInput<'a>) -> BoxFuture<'a, Result<Vec<String>>> {
        let allowed: Vec<String> = input
            .candidates
            .iter()
            .filter(|id| {
                input
                    .tools
                    .get(id)
                    .is_some_and(|r| !is_protected(&r.tool_name, input.protected_tools))
            })
            .map(|id| normalize_id(id))
            .collect();
        let prompt = build_prompt(&input, &allowed);
        Box::pin(async move {
            if allowed.is_empty() {
                return Ok(Vec::new());
            }
            self.run(prompt, allowed).await
        })
    }
}

fn build_prompt(input: &StrategyInput<'_>, allowed: &[String]) -> String {
    let mut prompt = String::from("Tool calls, oldest first:\n\n");
    for id in allowed {
        let Some(record) = input.tools.get(id) else {
            continue;
        };
        let _ = writeln!(
            prompt,
            "ID {id}: {}({})",
            record.tool_name,
            summarize_parameters(&record.parameters, 120)
        );
        match input.outputs.get(id) {
            Some(output) => {
                let _ = writeln!(prompt, "{}\n", truncate_chars(output, OUTPUT_EXCERPT_CHARS));
            }
            None => prompt.push_str("(output not available)\n\n"),
        }
    }
    prompt.push_str("Which IDs are obsolete?");
    prompt
}

/// First JSON array in `reply`, read as IDs (strings or numbers).
fn parse_id_list(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    let body = reply.get(start..=end)?;
    let items: Vec<Value> = match serde_json::from_str(body) {
        Ok(items) => items,
        Err(e) => {
            warn!("Failed to parse analysis reply: {e}");
            return None;
        }
    };
    Some(
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostFuture;
    use crate::state::{ToolCache, ToolCallRecord};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl Completion for Canned {
        fn complete<'a>(&'a self, _system: &'a str, user: &'a str) -> HostFuture<'a, String> {
            self.prompts.lock().unwrap().push(user.to_string());
            let reply = match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(SnipError::Http(e.to_string())),
            };
            Box::pin(async move { reply })
        }
    }

    fn fixture() -> (ToolCache, Vec<String>, HashMap<String, String>) {
        let mut tools = ToolCache::default();
        tools.insert(ToolCallRecord::new("c1", "read", json!({"filePath": "a.rs"})));
        tools.insert(ToolCallRecord::new("c2", "task", json!({"prompt": "x"})));
        tools.insert(ToolCallRecord::new("c3", "bash", json!({"command": "ls"})));
        let candidates = vec!["c1".into(), "c2".into(), "c3".into()];
        let outputs = HashMap::from([("c1".to_string(), "fn main() {}".to_string())]);
        (tools, candidates, outputs)
    }

    #[tokio::test]
    async fn keeps_only_real_unprotected_candidates() {
        let (tools, candidates, outputs) = fixture();
        let protected = vec!["task".to_string()];
        let canned = Arc::new(Canned::ok("Sure: [\"C1\", \"c2\", \"nope\"]"));
        let strategy = AnalysisStrategy::new(canned.clone());
        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &protected,
            outputs: &outputs,
        };

        let picked = strategy.select(input).await.unwrap();
        assert_eq!(picked, vec!["c1"]);

        let prompt = canned.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("ID c1: read("));
        assert!(prompt.contains("fn main() {}"));
        assert!(!prompt.contains("ID c2"));
    }

    #[tokio::test]
    async fn garbage_reply_is_a_strategy_error() {
        let (tools, candidates, outputs) = fixture();
        let strategy = AnalysisStrategy::new(Arc::new(Canned::ok("I think c1")));
        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &[],
            outputs: &outputs,
        };
        let err = strategy.select(input).await.unwrap_err();
        assert!(matches!(err, SnipError::Strategy { .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_a_strategy_error() {
        let (tools, candidates, outputs) = fixture();
        let failing = Canned {
            reply: Err(SnipError::Http("down".into())),
            prompts: Mutex::new(Vec::new()),
        };
        let strategy = AnalysisStrategy::new(Arc::new(failing));
        let input = StrategyInput {
            tools: &tools,
            candidates: &candidates,
            protected_tools: &[],
            outputs: &outputs,
        };
        assert!(strategy.select(input).await.is_err());
    }

    #[test]
    fn parse_id_list_accepts_numbers() {
        assert_eq!(parse_id_list("[1, \"b\"]"), Some(vec!["1".into(), "b".into()]));
        assert_eq!(parse_id_list("nothing"), None);
    }
}
