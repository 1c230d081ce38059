//! Configuration for snip.
//!
//! Loaded once per process with precedence, lowest first:
//!
//! 1. built-in defaults ([`SnipConfig::default`])
//! 2. `~/.config/snip/snip.json` (user-global)
//! 3. `{project}/.snip/snip.json`
//!
//! Files are JSON with optional `//` line comments. Every key is validated on
//! its own: an unknown key or a value of the wrong type becomes a
//! [`ConfigIssue`] and is skipped, the rest of the file still applies. A file
//! that does not parse at all skips only its own layer.
//!
//! ```ignore
//! let loaded = SnipConfig::load(Some(Path::new(".")));
//! notifier.config_issues(&loaded.issues);
//! let config = loaded.config.with_nudge_frequency(5);
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::{ChatClient, DEFAULT_BASE_URL};
use crate::error::{Result, SnipError};
use crate::notify::Verbosity;
use crate::state::store::DEFAULT_TRANSCRIPT_LIMIT;
use crate::strategy::StrategyKind;

/// Tools never pruned, whatever the configuration adds.
pub const DEFAULT_PROTECTED_TOOLS: &[&str] = &["task", "todowrite", "todoread", "prune", "batch"];

pub const DEFAULT_NUDGE_FREQUENCY: usize = 10;

/// Which strategies run on which trigger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StrategiesConfig {
    /// Run by the janitor when a session goes idle.
    pub on_idle: Vec<StrategyKind>,
    /// Run after a manual prune. Non-empty also turns on the prunable-tools
    /// injection.
    pub on_tool: Vec<StrategyKind>,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            on_idle: vec![StrategyKind::Deduplication],
            on_tool: vec![StrategyKind::Deduplication],
        }
    }
}

/// Model endpoint for the `ai-analysis` strategy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalysisConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl AnalysisConfig {
    /// Build the completion client. A named but unset key variable is an error.
    pub fn client(&self) -> Result<ChatClient> {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = ChatClient::new(base, &self.model)?;
        match &self.api_key_env {
            Some(var) => {
                let key = std::env::var(var)
                    .map_err(|_| SnipError::Config(format!("{var} is not set")))?;
                Ok(client.with_api_key(key))
            }
            None => Ok(client),
        }
    }
}

/// Effective configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnipConfig {
    pub enabled: bool,
    /// Log every rewrite decision at `debug` level regardless of the filter.
    pub debug: bool,
    pub protected_tools: Vec<String>,
    /// Nudge once more than this many unpruned results piled up. 0 disables.
    pub nudge_frequency: usize,
    pub pruning_summary: Verbosity,
    pub strategies: StrategiesConfig,
    /// Transcript messages replayed when restoring a session.
    pub transcript_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisConfig>,
}

impl Default for SnipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            protected_tools: DEFAULT_PROTECTED_TOOLS.iter().map(|s| s.to_string()).collect(),
            nudge_frequency: DEFAULT_NUDGE_FREQUENCY,
            pruning_summary: Verbosity::Detailed,
            strategies: StrategiesConfig::default(),
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
            analysis: None,
        }
    }
}

/// A problem found while loading one configuration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub source: PathBuf,
    /// Offending key, `None` when the whole file was rejected.
    pub key: Option<String>,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: `{key}`: {}", self.source.display(), self.message),
            None => write!(f, "{}: {}", self.source.display(), self.message),
        }
    }
}

/// Result of [`SnipConfig::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: SnipConfig,
    pub issues: Vec<ConfigIssue>,
    /// Files that were read, in application order.
    pub sources: Vec<PathBuf>,
}

impl SnipConfig {
    /// Load from the standard locations.
    pub fn load(project_root: Option<&Path>) -> LoadedConfig {
        let global = dirs_path().map(|home| home.join(".config/snip/snip.json"));
        let project = project_root.map(|root| root.join(".snip/snip.json"));
        Self::load_from(global.as_deref(), project.as_deref())
    }

    /// Load from explicit layer paths. Missing files are skipped silently.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> LoadedConfig {
        let mut loaded = LoadedConfig::default();
        for path in [global, project].into_iter().flatten() {
            let Ok(contents) = fs::read_to_string(path) else {
                continue;
            };
            debug!("Applying config layer {}", path.display());
            loaded.sources.push(path.to_path_buf());
            let issues = loaded.config.apply_str(&contents, path);
            loaded.issues.extend(issues);
        }
        loaded
    }

    /// Apply one layer's text on top of `self`. Returns what was rejected.
    pub fn apply_str(&mut self, contents: &str, source: &Path) -> Vec<ConfigIssue> {
        let issue = |key: Option<&str>, message: String| ConfigIssue {
            source: source.to_path_buf(),
            key: key.map(str::to_string),
            message,
        };
        match serde_json::from_str::<Value>(&strip_line_comments(contents)) {
            Ok(Value::Object(map)) => {
                let mut issues = Vec::new();
                for (key, value) in map {
                    if let Err(message) = self.apply_key(&key, value) {
                        issues.push(issue(Some(&key), message));
                    }
                }
                issues
            }
            Ok(_) => vec![issue(None, "top level must be a JSON object".into())],
            Err(e) => vec![issue(None, format!("failed to parse: {e}"))],
        }
    }

    fn apply_key(&mut self, key: &str, value: Value) -> std::result::Result<(), String> {
        match key {
            "$schema" => {}
            "enabled" => self.enabled = typed(value)?,
            "debug" => self.debug = typed(value)?,
            "protectedTools" => {
                let extra: Vec<String> = typed(value)?;
                for tool in extra {
                    if !self.protected_tools.iter().any(|t| t.eq_ignore_ascii_case(&tool)) {
                        self.protected_tools.push(tool);
                    }
                }
            }
            "nudgeFrequency" => self.nudge_frequency = typed(value)?,
            "pruningSummary" => self.pruning_summary = typed(value)?,
            "transcriptLimit" => self.transcript_limit = typed(value)?,
            "analysis" => self.analysis = typed(value)?,
            "strategies" => {
                let Value::Object(map) = value else {
                    return Err("expected an object".into());
                };
                let mut bad = Vec::new();
                for (sub, value) in map {
                    let applied = match sub.as_str() {
                        "onIdle" => typed(value).map(|v| self.strategies.on_idle = v),
                        "onTool" => typed(value).map(|v| self.strategies.on_tool = v),
                        _ => Err("unknown key".into()),
                    };
                    if let Err(e) = applied {
                        bad.push(format!("{sub}: {e}"));
                    }
                }
                if !bad.is_empty() {
                    return Err(bad.join("; "));
                }
            }
            _ => return Err("unknown key".into()),
        }
        Ok(())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a protected tool name.
    pub fn protect_tool(mut self, name: impl Into<String>) -> Self {
        self.protected_tools.push(name.into());
        self
    }

    pub fn with_nudge_frequency(mut self, frequency: usize) -> Self {
        self.nudge_frequency = frequency;
        self
    }

    pub fn with_pruning_summary(mut self, verbosity: Verbosity) -> Self {
        self.pruning_summary = verbosity;
        self
    }

    pub fn with_strategies(mut self, on_idle: Vec<StrategyKind>, on_tool: Vec<StrategyKind>) -> Self {
        self.strategies = StrategiesConfig { on_idle, on_tool };
        self
    }

    pub fn with_transcript_limit(mut self, limit: usize) -> Self {
        self.transcript_limit = limit;
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Whether the prunable-tools injection is active.
    pub fn injects(&self) -> bool {
        !self.strategies.on_tool.is_empty()
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> std::result::Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Drop `//` comments that are outside string literals.
fn strip_line_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut prev_slash = false;
        let mut cut = None;
        for (idx, ch) in line.char_indices() {
            if in_string {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match ch {
                '"' => {
                    in_string = true;
                    prev_slash = false;
                }
                '/' if prev_slash => {
                    cut = Some(idx - 1);
                    break;
                }
                '/' => prev_slash = true,
                _ => prev_slash = false,
            }
        }
        match cut.and_then(|end| line.get(..end)) {
            Some(code) => out.push_str(code),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

/// Get the user's home directory.
fn dirs_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
