//! Notifications: tell the user what a pruning pass removed.
//!
//! The [`Notifier`] is a sink. Delivery failures are logged by [`deliver`]
//! and otherwise ignored; a lost notification never affects pruning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConfigIssue;
use crate::host::HostFuture;
use crate::state::PendingGarbage;

/// How much a summary says.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Off,
    Minimal,
    #[default]
    Detailed,
}

/// What triggered a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneSource {
    Idle,
    Manual,
}

/// One pruned output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedTool {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_id: Option<u64>,
    pub tool_name: String,
    /// Parameter summary, e.g. the file path.
    #[serde(default)]
    pub summary: String,
}

/// Structured description of one pruning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneSummary {
    pub session_id: String,
    pub source: PruneSource,
    pub pruned: Vec<PrunedTool>,
    pub tokens_saved: usize,
    /// Savings from earlier background passes, reported here for the first time.
    #[serde(default)]
    pub garbage: PendingGarbage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PruneSummary {
    pub fn new(session_id: impl Into<String>, source: PruneSource) -> Self {
        Self {
            session_id: session_id.into(),
            source,
            pruned: Vec::new(),
            tokens_saved: 0,
            garbage: PendingGarbage::default(),
            reason: None,
        }
    }

    /// Nothing pruned now and nothing pending.
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty() && self.garbage.is_empty()
    }

    /// Pruned count per tool name, alphabetical.
    pub fn by_tool(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for tool in &self.pruned {
            *counts.entry(tool.tool_name.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Text for the user, or `None` at [`Verbosity::Off`] or when empty.
    pub fn render(&self, verbosity: Verbosity) -> Option<String> {
        if verbosity == Verbosity::Off || self.is_empty() {
            return None;
        }

        let mut text = format!(
            "Pruned {} tool output(s), ~{} tokens saved",
            self.pruned.len(),
            format_tokens(self.tokens_saved)
        );
        if !self.garbage.is_empty() {
            text.push_str(&format!(
                " (+{} deduplicated earlier, ~{} tokens)",
                self.garbage.tools_deduped,
                format_tokens(self.garbage.tokens_collected)
            ));
        }
        if let Some(reason) = &self.reason {
            text.push_str(&format!(" [{reason}]"));
        }

        if verbosity == Verbosity::Detailed {
            let breakdown: Vec<String> = self
                .by_tool()
                .into_iter()
                .map(|(name, n)| format!("{name} x{n}"))
                .collect();
            if !breakdown.is_empty() {
                text.push_str(&format!("\n  {}", breakdown.join(", ")));
            }
            for tool in &self.pruned {
                let label = match tool.numeric_id {
                    Some(n) => format!("#{n}"),
                    None => tool.id.clone(),
                };
                if tool.summary.is_empty() {
                    text.push_str(&format!("\n  {label} {}", tool.tool_name));
                } else {
                    text.push_str(&format!("\n  {label} {}: {}", tool.tool_name, tool.summary));
                }
            }
        }
        Some(text)
    }
}

fn format_tokens(tokens: usize) -> String {
    if tokens >= 1000 {
        format!("{:.1}K", tokens as f64 / 1000.0)
    } else {
        tokens.to_string()
    }
}

// ── Sinks ──────────────────────────────────────────────────────────

/// Receiver of pruning summaries and configuration warnings.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, summary: &'a PruneSummary) -> HostFuture<'a, ()>;

    /// Report configuration problems. Called once per load.
    fn config_issues(&self, issues: &[ConfigIssue]) {
        for issue in issues {
            warn!("Config: {issue}");
        }
    }
}

/// Send a summary, logging (and dropping) any delivery error.
pub async fn deliver(notifier: &dyn Notifier, summary: &PruneSummary) {
    if let Err(e) = notifier.notify(summary).await {
        warn!(
            "Failed to deliver prune notification for session {}: {e}",
            summary.session_id
        );
    }
}

/// Renders summaries through `tracing` at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier {
    verbosity: Verbosity,
}

impl LoggingNotifier {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl Notifier for LoggingNotifier {
    fn notify<'a>(&'a self, summary: &'a PruneSummary) -> HostFuture<'a, ()> {
        Box::pin(async move {
            if let Some(text) = summary.render(self.verbosity) {
                info!(session = %summary.session_id, "{text}");
            }
            Ok(())
        })
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify<'a>(&'a self, _summary: &'a PruneSummary) -> HostFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn config_issues(&self, _issues: &[ConfigIssue]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnipError;

    fn summary() -> PruneSummary {
        let mut s = PruneSummary::new("s1", PruneSource::Idle);
        s.pruned = vec![
            PrunedTool {
                id: "c1".into(),
                numeric_id: Some(1),
                tool_name: "read".into(),
                summary: "src/lib.rs".into(),
            },
            PrunedTool {
                id: "c2".into(),
                numeric_id: None,
                tool_name: "read".into(),
                summary: String::new(),
            },
        ];
        s.tokens_saved = 1530;
        s
    }

    #[test]
    fn minimal_is_one_line() {
        let text = summary().render(Verbosity::Minimal).unwrap();
        assert_eq!(text, "Pruned 2 tool output(s), ~1.5K tokens saved");
    }

    #[test]
    fn detailed_lists_each_tool() {
        let text = summary().render(Verbosity::Detailed).unwrap();
        assert!(text.contains("read x2"));
        assert!(text.contains("#1 read: src/lib.rs"));
        assert!(text.contains("c2 read"));
    }

    #[test]
    fn garbage_only_summary_still_renders() {
        let mut s = PruneSummary::new("s1", PruneSource::Idle);
        assert!(s.render(Verbosity::Detailed).is_none());
        s.garbage.add(300, 2);
        let text = s.render(Verbosity::Minimal).unwrap();
        assert!(text.contains("+2 deduplicated earlier, ~300 tokens"));
    }

    #[test]
    fn off_renders_nothing() {
        assert!(summary().render(Verbosity::Off).is_none());
    }

    struct Broken;

    impl Notifier for Broken {
        fn notify<'a>(&'a self, _summary: &'a PruneSummary) -> HostFuture<'a, ()> {
            Box::pin(async { Err(SnipError::Host("sink closed".into())) })
        }
    }

    #[tokio::test]
    async fn delivery_errors_are_swallowed() {
        deliver(&Broken, &summary()).await;
        deliver(&LoggingNotifier::new(Verbosity::Detailed), &summary()).await;
    }
}
