//! Per-session mutable pruning state.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::IdRegistry;
use super::normalize_id;

// ── Tool metadata ──────────────────────────────────────────────────

/// A tool invocation observed in an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Normalized (lowercase) call ID.
    pub id: String,
    pub tool_name: String,
    /// Parsed call arguments.
    pub parameters: Value,
}

impl ToolCallRecord {
    pub fn new(id: &str, tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: normalize_id(id),
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// Insertion-ordered cache of [`ToolCallRecord`]s keyed by normalized ID.
///
/// Records are immutable once cached: a second sighting of the same ID is
/// ignored. Iteration order is first-seen order, which is the chronological
/// order candidates are handed to strategies in.
#[derive(Debug, Clone, Default)]
pub struct ToolCache {
    order: Vec<String>,
    records: HashMap<String, ToolCallRecord>,
}

impl ToolCache {
    /// Insert a record unless its ID is already cached. Returns `true` when
    /// the record was new.
    pub fn insert(&mut self, record: ToolCallRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    pub fn get(&self, id: &str) -> Option<&ToolCallRecord> {
        self.records.get(&normalize_id(id))
    }

    pub fn tool_name(&self, id: &str) -> Option<&str> {
        self.get(id).map(|r| r.tool_name.as_str())
    }

    /// All cached IDs in first-seen order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ── Counters ───────────────────────────────────────────────────────

/// Tool-result counters driving the nudge and idle throttling.
#[derive(Debug, Clone, Default)]
pub struct ToolTracker {
    /// Unprotected tool results observed since the last successful prune.
    pub since_last_prune: usize,
    /// Skip the next idle pass (set after a manual prune).
    pub skip_next_idle: bool,
    seen: HashSet<String>,
}

impl ToolTracker {
    /// Count a tool result unless its ID was counted before. Returns whether
    /// the counter moved.
    pub fn observe(&mut self, id: &str) -> bool {
        if self.seen.insert(normalize_id(id)) {
            self.since_last_prune += 1;
            true
        } else {
            false
        }
    }

    /// Reset the counter after a successful prune. Seen IDs are kept so the
    /// same results are not counted again.
    pub fn reset(&mut self) {
        self.since_last_prune = 0;
    }
}

/// Savings accumulated by background passes, reported with the next
/// user-visible notification instead of on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGarbage {
    pub tokens_collected: usize,
    pub tools_deduped: usize,
}

impl PendingGarbage {
    pub fn is_empty(&self) -> bool {
        self.tokens_collected == 0 && self.tools_deduped == 0
    }

    pub fn add(&mut self, tokens: usize, tools: usize) {
        self.tokens_collected += tokens;
        self.tools_deduped += tools;
    }

    /// Take the accumulated totals, leaving zeroes behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// Cumulative per-session savings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_pruned: usize,
    pub tokens_saved: usize,
}

// ── SessionState ───────────────────────────────────────────────────

/// Everything snip tracks for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Human-readable session name, persisted alongside the pruned set.
    pub name: Option<String>,
    pruned: HashSet<String>,
    pub tools: ToolCache,
    pub stats: SessionStats,
    pub tracker: ToolTracker,
    pub registry: IdRegistry,
    /// `"<lowercased tool name>:<occurrence>"` → actual call ID.
    pub gemini_positions: HashMap<String, String>,
    pub pending: PendingGarbage,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a tool call and mint its numeric alias on first sight.
    pub fn cache_tool(&mut self, record: ToolCallRecord) -> bool {
        let id = record.id.clone();
        let inserted = self.tools.insert(record);
        if inserted {
            self.registry.get_or_create(&id);
        }
        inserted
    }

    pub fn is_pruned(&self, id: &str) -> bool {
        self.pruned.contains(&normalize_id(id))
    }

    /// Mark an ID as pruned. Refuses IDs whose cached tool is protected.
    /// Returns `true` when the set grew.
    pub fn prune(&mut self, id: &str, protected_tools: &[String]) -> bool {
        if let Some(name) = self.tools.tool_name(id)
            && is_protected(name, protected_tools)
        {
            return false;
        }
        self.pruned.insert(normalize_id(id))
    }

    /// Restore previously persisted IDs (bypasses the protected check; they
    /// were checked when first pruned).
    pub fn restore_pruned(&mut self, ids: impl IntoIterator<Item = String>) {
        self.pruned
            .extend(ids.into_iter().map(|id| normalize_id(&id)));
    }

    pub fn pruned_ids(&self) -> &HashSet<String> {
        &self.pruned
    }

    /// Cached IDs that are not yet pruned, in chronological order.
    pub fn unpruned_candidates(&self) -> Vec<String> {
        self.tools
            .ids()
            .iter()
            .filter(|id| !self.pruned.contains(*id))
            .cloned()
            .collect()
    }
}

/// Whether `tool_name` is on the protected list (case-insensitive).
pub fn is_protected(tool_name: &str, protected_tools: &[String]) -> bool {
    protected_tools
        .iter()
        .any(|p| p.eq_ignore_ascii_case(tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, name: &str) -> ToolCallRecord {
        ToolCallRecord::new(id, name, json!({"path": id}))
    }

    #[test]
    fn cache_keeps_first_record_and_order() {
        let mut state = SessionState::new();
        assert!(state.cache_tool(record("A", "read")));
        assert!(state.cache_tool(record("b", "grep")));
        assert!(!state.cache_tool(ToolCallRecord::new("a", "bash", json!({}))));

        assert_eq!(state.tools.ids(), ["a", "b"]);
        assert_eq!(state.tools.tool_name("A"), Some("read"));
        assert_eq!(state.registry.numeric_id("a"), Some(1));
        assert_eq!(state.registry.numeric_id("b"), Some(2));
    }

    #[test]
    fn prune_is_monotonic_and_skips_protected() {
        let mut state = SessionState::new();
        state.cache_tool(record("a", "read"));
        state.cache_tool(record("t", "task"));
        let protected = vec!["Task".to_string()];

        assert!(state.prune("A", &protected));
        assert!(!state.prune("a", &protected));
        assert!(!state.prune("t", &protected));
        assert!(state.is_pruned("a"));
        assert!(!state.is_pruned("t"));
        assert_eq!(state.unpruned_candidates(), vec!["t".to_string()]);
    }

    #[test]
    fn tracker_counts_each_id_once() {
        let mut tracker = ToolTracker::default();
        assert!(tracker.observe("x"));
        assert!(!tracker.observe("X"));
        assert!(tracker.observe("y"));
        assert_eq!(tracker.since_last_prune, 2);
        tracker.reset();
        assert_eq!(tracker.since_last_prune, 0);
        assert!(!tracker.observe("x"));
    }

    #[test]
    fn pending_garbage_take_resets() {
        let mut garbage = PendingGarbage::default();
        garbage.add(120, 2);
        garbage.add(30, 1);
        let taken = garbage.take();
        assert_eq!(taken.tokens_collected, 150);
        assert_eq!(taken.tools_deduped, 3);
        assert!(garbage.is_empty());
    }
}
