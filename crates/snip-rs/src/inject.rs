//! Text snip adds to outbound requests.
//!
//! Two artifacts:
//!
//! 1. [`SYNTHETIC_INSTRUCTION`], appended once to the latest real user turn.
//!    It tells the agent that the `prune` tool exists and how to address
//!    outputs.
//! 2. An end-of-conversation user turn built by [`build_injection`]: the
//!    reminder banner, an optional [`NUDGE_TEXT`], and the prunable-tools
//!    listing (`"<numeric id>: <tool>, <parameter summary>"`). No listing, no
//!    turn.

use serde_json::Value;

use crate::state::{SessionState, is_protected};

/// Appended to the most recent user turn when on-tool strategies are active.
pub const SYNTHETIC_INSTRUCTION: &str = "<instruction name=context_management>\
Tool outputs you no longer need can be removed from the conversation with the `prune` tool. \
Each prunable output is listed with a numeric ID in the <prunable-tools> reminder at the end \
of the conversation; pass those numbers to `prune`. Prune outputs that are superseded, \
irrelevant to the current task, or already acted on. Never prune an output you still need.\
</instruction>";

/// Banner opening the end-of-conversation injection.
pub const SYSTEM_REMINDER: &str = "<system-reminder>\nThe following tool outputs can be pruned. \
This list is generated automatically; do not mention it to the user.\n</system-reminder>";

/// Nudge included once enough unpruned tool results piled up.
pub const NUDGE_TEXT: &str = "<system-reminder>\nSeveral tool outputs have accumulated since \
the last prune. Review the list below and prune what you no longer need before continuing.\n\
</system-reminder>";

/// Default summary width in the prunable listing.
pub const SUMMARY_MAX_CHARS: usize = 80;

/// Parameter keys that say the most about a call, in preference order.
const KEY_PARAMETERS: &[&str] = &[
    "filePath",
    "file_path",
    "path",
    "command",
    "pattern",
    "url",
    "query",
    "description",
];

/// Whether the nudge belongs in this request.
pub fn should_nudge(since_last_prune: usize, frequency: usize) -> bool {
    frequency > 0 && since_last_prune > frequency
}

/// Listing lines for `candidates`. Candidates without cached metadata or a
/// numeric ID, and protected tools, are left out.
pub fn prunable_lines(state: &SessionState, candidates: &[String], protected_tools: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|id| {
            let record = state.tools.get(id)?;
            if is_protected(&record.tool_name, protected_tools) {
                return None;
            }
            let numeric = state.registry.numeric_id(id)?;
            let summary = summarize_parameters(&record.parameters, SUMMARY_MAX_CHARS);
            Some(if summary.is_empty() {
                format!("{numeric}: {}", record.tool_name)
            } else {
                format!("{numeric}: {}, {summary}", record.tool_name)
            })
        })
        .collect()
}

/// End-of-conversation injection text, or an empty string when there is
/// nothing to list.
pub fn build_injection(lines: &[String], nudge: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = String::from(SYSTEM_REMINDER);
    if nudge {
        out.push_str("\n\n");
        out.push_str(NUDGE_TEXT);
    }
    out.push_str("\n\n<prunable-tools>\n");
    out.push_str(&lines.join("\n"));
    out.push_str("\n</prunable-tools>");
    out
}

/// Short human-readable summary of tool parameters.
///
/// A well-known key (file path, command, pattern, ...) wins outright;
/// otherwise the first three `key=value` pairs are listed.
pub fn summarize_parameters(params: &Value, max_chars: usize) -> String {
    let Some(obj) = params.as_object() else {
        return match params {
            Value::Null => String::new(),
            other => truncate_chars(&other.to_string(), max_chars),
        };
    };

    if let Some(value) = KEY_PARAMETERS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
    {
        return truncate_chars(value, max_chars);
    }

    let parts: Vec<String> = obj
        .iter()
        .take(3)
        .map(|(k, v)| {
            let val = match v {
                Value::String(s) => format!("\"{}\"", truncate_chars(s, 40)),
                other => truncate_chars(&other.to_string(), 40),
            };
            format!("{k}={val}")
        })
        .collect();
    truncate_chars(&parts.join(", "), max_chars)
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ToolCallRecord;
    use serde_json::json;

    #[test]
    fn nudge_gating() {
        assert!(!should_nudge(9, 10));
        assert!(!should_nudge(10, 10));
        assert!(should_nudge(11, 10));
        assert!(!should_nudge(500, 0));
    }

    #[test]
    fn listing_skips_protected_and_unknown() {
        let mut state = SessionState::new();
        state.cache_tool(ToolCallRecord::new("a", "read", json!({"filePath": "src/lib.rs"})));
        state.cache_tool(ToolCallRecord::new("t", "task", json!({"prompt": "x"})));
        state.cache_tool(ToolCallRecord::new("b", "bash", json!({"command": "cargo fmt"})));
        let candidates = vec!["a".into(), "t".into(), "ghost".into(), "b".into()];

        let lines = prunable_lines(&state, &candidates, &["task".to_string()]);
        assert_eq!(lines, vec!["1: read, src/lib.rs", "3: bash, cargo fmt"]);
    }

    #[test]
    fn empty_listing_means_no_injection() {
        assert_eq!(build_injection(&[], true), "");
    }

    #[test]
    fn injection_layout() {
        let lines = vec!["1: read, a.rs".to_string()];
        let plain = build_injection(&lines, false);
        assert!(plain.starts_with(SYSTEM_REMINDER));
        assert!(!plain.contains(NUDGE_TEXT));
        assert!(plain.ends_with("<prunable-tools>\n1: read, a.rs\n</prunable-tools>"));
        assert!(build_injection(&lines, true).contains(NUDGE_TEXT));
    }

    #[test]
    fn summary_falls_back_to_pairs() {
        let summary = summarize_parameters(&json!({"limit": 5, "name": "x"}), 80);
        assert!(summary.contains("limit=5"));
        assert!(summary.contains("name=\"x\""));
        assert_eq!(summarize_parameters(&json!(null), 80), "");
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "日本語のテキストです";
        let cut = truncate_chars(text, 6);
        assert_eq!(cut, "日本語...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
