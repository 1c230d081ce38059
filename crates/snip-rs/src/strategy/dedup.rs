//! Duplicate tool calls: when the same tool ran with the same parameters more
//! than once, only the most recent output is worth keeping.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use super::{Strategy, StrategyInput};
use crate::error::Result;
use crate::state::{ToolCache, is_protected, normalize_id};

/// Stateless deduplication strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeduplicationStrategy;

impl Strategy for DeduplicationStrategy {
    fn name(&self) -> &str {
        "deduplication"
    }

    fn select<'a>(&'a self, input: StrategyInput<'a>) -> BoxFuture<'a, Result<Vec<String>>> {
        let pruned = deduplicate(input.tools, input.candidates, input.protected_tools);
        Box::pin(async move { Ok(pruned) })
    }
}

/// Every candidate that has a later identical call, oldest first.
///
/// Candidates are grouped by tool name plus canonical parameters. Within a
/// group all but the last ID are returned. Protected tools and candidates
/// without cached metadata are never returned.
pub fn deduplicate(tools: &ToolCache, candidates: &[String], protected_tools: &[String]) -> Vec<String> {
    let mut last_by_signature: HashMap<String, usize> = HashMap::new();
    let mut signatures: Vec<Option<String>> = Vec::with_capacity(candidates.len());

    for (idx, id) in candidates.iter().enumerate() {
        let signature = tools
            .get(id)
            .filter(|r| !is_protected(&r.tool_name, protected_tools))
            .map(|r| signature(&r.tool_name, &r.parameters));
        if let Some(sig) = &signature {
            last_by_signature.insert(sig.clone(), idx);
        }
        signatures.push(signature);
    }

    candidates
        .iter()
        .zip(signatures)
        .enumerate()
        .filter_map(|(idx, (id, sig))| {
            let sig = sig?;
            (last_by_signature.get(&sig) != Some(&idx)).then(|| normalize_id(id))
        })
        .collect()
}

fn signature(tool_name: &str, parameters: &Value) -> String {
    let mut out = tool_name.to_lowercase();
    out.push('\u{0}');
    canonicalize(parameters, &mut out);
    out
}

/// Compact JSON with object keys sorted at every level, so structurally
/// equal parameters produce the same string regardless of key order.
fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                canonicalize(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ToolCallRecord;
    use serde_json::json;

    fn tools(records: &[(&str, &str, Value)]) -> ToolCache {
        let mut cache = ToolCache::default();
        for (id, name, params) in records {
            cache.insert(ToolCallRecord::new(id, *name, params.clone()));
        }
        cache
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_last_of_each_group() {
        let cache = tools(&[
            ("a", "read", json!({"filePath": "x"})),
            ("b", "read", json!({"filePath": "y"})),
            ("c", "read", json!({"filePath": "x"})),
        ]);
        assert_eq!(deduplicate(&cache, &ids(&["a", "b", "c"]), &[]), vec!["a"]);
    }

    #[test]
    fn key_order_does_not_matter() {
        let cache = tools(&[
            ("a", "grep", json!({"pattern": "fn", "path": {"dir": "src", "deep": true}})),
            ("b", "grep", json!({"path": {"deep": true, "dir": "src"}, "pattern": "fn"})),
        ]);
        assert_eq!(deduplicate(&cache, &ids(&["a", "b"]), &[]), vec!["a"]);
    }

    #[test]
    fn protected_duplicates_are_never_returned() {
        let cache = tools(&[
            ("t1", "task", json!({"prompt": "p"})),
            ("t2", "task", json!({"prompt": "p"})),
            ("r1", "read", json!({"filePath": "x"})),
            ("r2", "read", json!({"filePath": "x"})),
        ]);
        let protected = vec!["Task".to_string()];
        assert_eq!(
            deduplicate(&cache, &ids(&["t1", "t2", "r1", "r2"]), &protected),
            vec!["r1"]
        );
    }

    #[test]
    fn different_tools_same_params_are_distinct() {
        let cache = tools(&[
            ("a", "read", json!({"path": "x"})),
            ("b", "write", json!({"path": "x"})),
        ]);
        assert!(deduplicate(&cache, &ids(&["a", "b"]), &[]).is_empty());
    }

    #[test]
    fn candidates_without_metadata_are_skipped() {
        let cache = tools(&[("a", "read", json!({}))]);
        assert!(deduplicate(&cache, &ids(&["ghost", "a"]), &[]).is_empty());
    }
}
