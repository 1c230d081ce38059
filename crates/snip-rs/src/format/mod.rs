//! Wire-format adapters: one extract / inject / replace contract over every
//! provider request shape snip understands.
//!
//! | Variant | Data array | Tool output correlation |
//! |---------|------------|-------------------------|
//! | [`Format::Chat`] | `messages` (OpenAI Chat Completions and Anthropic Messages) | explicit `tool_call_id` / `tool_use_id` |
//! | [`Format::Gemini`] | `contents` | positional, through the session's Gemini position map |
//! | [`Format::Responses`] | `input` (OpenAI Responses API) | explicit `call_id` on `function_call_output` items |
//!
//! Detection is a structural test on the top-level body and the predicates
//! are mutually exclusive, so at most one variant claims a body. Adding a
//! wire format means adding a variant and a module, never branching inside
//! an existing one.
//!
//! Every operation works on `serde_json::Value` so provider fields snip does
//! not know about pass through untouched.

pub mod chat;
pub mod gemini;
pub mod responses;

use serde::Serialize;
use serde_json::Value;

use crate::host::Transcript;
use crate::inject::SYSTEM_REMINDER;
use crate::state::{SessionState, normalize_id};

/// Text that replaces a pruned tool output. Identical across formats.
pub const PRUNED_PLACEHOLDER: &str =
    "[Output removed to save context - information superseded or no longer needed]";

/// A tool output present in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Normalized call ID.
    pub id: String,
    pub tool_name: Option<String>,
}

/// Descriptive record for logs. Has no behavioural effect.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogMetadata {
    pub format: &'static str,
    pub items: usize,
    pub tool_outputs: usize,
}

/// Known request body shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Chat,
    Gemini,
    Responses,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Chat, Format::Gemini, Format::Responses];

    /// The format that claims `body`, if any.
    pub fn detect(body: &Value) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.matches(body))
    }

    /// Structural test for this variant alone.
    pub fn matches(self, body: &Value) -> bool {
        let has_array = |key: &str| body.get(key).is_some_and(Value::is_array);
        match self {
            Format::Chat => has_array("messages"),
            Format::Gemini => has_array("contents") && !has_array("messages"),
            Format::Responses => {
                has_array("input") && !has_array("messages") && !has_array("contents")
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Chat => "chat",
            Format::Gemini => "gemini",
            Format::Responses => "responses",
        }
    }

    fn data_key(self) -> &'static str {
        match self {
            Format::Chat => "messages",
            Format::Gemini => "contents",
            Format::Responses => "input",
        }
    }

    /// The ordered turns/items this format operates on.
    pub fn data_array(self, body: &mut Value) -> Option<&mut Vec<Value>> {
        if !self.matches(body) {
            return None;
        }
        body.get_mut(self.data_key()).and_then(Value::as_array_mut)
    }

    /// Read-only counterpart of [`data_array`](Self::data_array).
    pub fn data(self, body: &Value) -> Option<&Vec<Value>> {
        if !self.matches(body) {
            return None;
        }
        body.get(self.data_key()).and_then(Value::as_array)
    }

    /// Give positionally correlated calls their synthetic IDs. Only Gemini
    /// needs this; minting is deterministic, so a fresh process assigns the
    /// same IDs to the same body. Returns how many positions were added.
    pub fn register_call_positions(self, data: &[Value], state: &mut SessionState) -> usize {
        match self {
            Format::Gemini => gemini::register_positions(data, &mut state.gemini_positions),
            Format::Chat | Format::Responses => 0,
        }
    }

    /// Record every assistant tool invocation in the session's tool cache.
    /// Calls with malformed arguments are skipped.
    pub fn cache_tool_parameters(self, data: &[Value], state: &mut SessionState) {
        match self {
            Format::Chat => chat::cache_tool_parameters(data, state),
            Format::Gemini => gemini::cache_tool_parameters(data, state),
            Format::Responses => responses::cache_tool_parameters(data, state),
        }
    }

    /// Append `instruction` to the most recent genuine user turn. Returns
    /// `false` if there is none or it already carries the instruction.
    pub fn inject_synth(self, data: &mut [Value], instruction: &str, nudge_text: &str) -> bool {
        match self {
            Format::Chat => chat::inject_synth(data, instruction, nudge_text),
            Format::Gemini => gemini::inject_synth(data, instruction, nudge_text),
            Format::Responses => responses::inject_synth(data, instruction, nudge_text),
        }
    }

    /// Count unprotected tool results not counted before. Returns how many
    /// were new.
    pub fn track_new_tool_results(
        self,
        data: &[Value],
        state: &mut SessionState,
        protected_tools: &[String],
    ) -> usize {
        let outputs = self.extract_tool_outputs(data, state);
        let mut counted = 0;
        for output in outputs {
            let name = output
                .tool_name
                .as_deref()
                .or_else(|| state.tools.tool_name(&output.id));
            if name.is_some_and(|n| crate::state::is_protected(n, protected_tools)) {
                continue;
            }
            if state.tracker.observe(&output.id) {
                counted += 1;
            }
        }
        counted
    }

    /// Append a trailing user turn carrying `injection`. No-op for an empty
    /// injection. A listing left by an earlier pass over the same body is
    /// replaced rather than duplicated; returns `false` if it was identical.
    pub fn inject_prunable_list(self, data: &mut Vec<Value>, injection: &str) -> bool {
        if injection.is_empty() {
            return false;
        }
        let turn = match self {
            Format::Chat => chat::user_turn(injection),
            Format::Gemini => gemini::user_turn(injection),
            Format::Responses => responses::user_turn(injection),
        };
        match data.last_mut() {
            Some(last) if *last == turn => false,
            Some(last) if is_injection_turn(last) => {
                *last = turn;
                true
            }
            _ => {
                data.push(turn);
                true
            }
        }
    }

    /// Tool outputs present in this request, in order.
    pub fn extract_tool_outputs(self, data: &[Value], state: &SessionState) -> Vec<ToolOutput> {
        match self {
            Format::Chat => chat::extract_tool_outputs(data, state),
            Format::Gemini => gemini::extract_tool_outputs(data, state),
            Format::Responses => responses::extract_tool_outputs(data, state),
        }
    }

    /// Overwrite the payload of every output belonging to `tool_id`, keeping
    /// the surrounding structure. Never changes the array length.
    pub fn replace_tool_output(
        self,
        data: &mut [Value],
        tool_id: &str,
        pruned_message: &str,
        state: &SessionState,
    ) -> bool {
        match self {
            Format::Chat => chat::replace_tool_output(data, tool_id, pruned_message),
            Format::Gemini => gemini::replace_tool_output(data, tool_id, pruned_message, state),
            Format::Responses => responses::replace_tool_output(data, tool_id, pruned_message),
        }
    }

    /// Cheap check for any tool output at all.
    pub fn has_tool_outputs(self, data: &[Value]) -> bool {
        match self {
            Format::Chat => chat::has_tool_outputs(data),
            Format::Gemini => gemini::has_tool_outputs(data),
            Format::Responses => responses::has_tool_outputs(data),
        }
    }

    pub fn log_metadata(self, data: &[Value]) -> LogMetadata {
        let tool_outputs = match self {
            Format::Chat => chat::count_tool_outputs(data),
            Format::Gemini => gemini::count_tool_outputs(data),
            Format::Responses => responses::count_tool_outputs(data),
        };
        LogMetadata {
            format: self.name(),
            items: data.len(),
            tool_outputs,
        }
    }

    /// Provider-neutral view of the data array.
    pub fn transcript(self, data: &[Value], state: &SessionState) -> Transcript {
        match self {
            Format::Chat => chat::transcript(data),
            Format::Gemini => gemini::transcript(data, state),
            Format::Responses => responses::transcript(data),
        }
    }
}

// ── Shared helpers ─────────────────────────────────────────────────

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn ids_match(a: &str, b: &str) -> bool {
    normalize_id(a) == normalize_id(b)
}

/// Parse tool-call arguments: JSON strings are decoded, objects are taken
/// as-is, a missing value is an empty object. Malformed strings yield `None`.
pub(crate) fn parse_arguments(raw: Option<&Value>) -> Option<Value> {
    match raw {
        None | Some(Value::Null) => Some(Value::Object(Default::default())),
        Some(Value::String(s)) if s.trim().is_empty() => Some(Value::Object(Default::default())),
        Some(Value::String(s)) => serde_json::from_str(s).ok(),
        Some(other) => Some(other.clone()),
    }
}

/// Text carried by content parts (`{"type":"text","text":..}` and friends).
pub(crate) fn text_parts(parts: &[Value]) -> Vec<&str> {
    parts
        .iter()
        .filter(|p| {
            matches!(
                str_field(p, "type"),
                None | Some("text") | Some("input_text") | Some("output_text")
            )
        })
        .filter_map(|p| str_field(p, "text"))
        .collect()
}

/// Flatten an output payload to text for token estimates and transcripts.
pub(crate) fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => text_parts(parts).join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether a user turn's text is the nudge and nothing else.
pub(crate) fn is_nudge_only(text: &str, nudge_text: &str) -> bool {
    !nudge_text.trim().is_empty() && text.trim() == nudge_text.trim()
}

/// Whether text is a prunable listing injected by an earlier rewrite.
pub(crate) fn is_injected(text: &str) -> bool {
    text.trim_start().starts_with(SYSTEM_REMINDER)
}

/// Turns snip itself added: never the target of the synthetic instruction.
pub(crate) fn is_synthetic(text: &str, nudge_text: &str) -> bool {
    is_nudge_only(text, nudge_text) || is_injected(text)
}

/// A user turn, in any format, whose whole text is an injected listing.
fn is_injection_turn(turn: &Value) -> bool {
    let text = match turn.get("content").or_else(|| turn.get("parts")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => text_parts(parts).join("\n"),
        _ => return false,
    };
    str_field(turn, "role") == Some("user") && is_injected(&text)
}
