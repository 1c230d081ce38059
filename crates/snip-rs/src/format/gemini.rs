//! Google Gemini `generateContent` bodies (`contents` array).
//!
//! Gemini function responses carry a tool name but no call ID, so outputs
//! are correlated by position: the n-th `functionResponse` for tool `grep`
//! (0-indexed, counted left to right over the whole array) is the call
//! stored under `"grep:n"` in the session's position map.
//!
//! Extraction and replacement both go through [`function_responses`], so the
//! counting can never drift between them. The scan is order-dependent and
//! must run on one request at a time; the session store's lock around each
//! request guarantees that.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::trace;

use super::{ToolOutput, flatten_text, ids_match, is_synthetic, parse_arguments, str_field, text_parts};
use crate::host::{Role, Transcript, TranscriptMessage, TranscriptPart};
use crate::state::{SessionState, ToolCallRecord, normalize_id};

/// Position map key for the `occurrence`-th use of `tool_name`.
pub fn position_key(tool_name: &str, occurrence: usize) -> String {
    format!("{}:{occurrence}", tool_name.to_lowercase())
}

/// Location of one `functionCall` / `functionResponse` part.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    content: usize,
    part: usize,
    name: String,
    occurrence: usize,
}

impl Slot {
    fn key(&self) -> String {
        position_key(&self.name, self.occurrence)
    }
}

fn parts(content: &Value) -> &[Value] {
    content
        .get("parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Every part carrying `field` (`functionCall` or `functionResponse`), with
/// its per-name occurrence index.
fn scan(data: &[Value], field: &str) -> Vec<Slot> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut slots = Vec::new();
    for (ci, content) in data.iter().enumerate() {
        for (pi, part) in parts(content).iter().enumerate() {
            let Some(name) = part.get(field).and_then(|f| str_field(f, "name")) else {
                continue;
            };
            let counter = counts.entry(name.to_lowercase()).or_default();
            slots.push(Slot {
                content: ci,
                part: pi,
                name: name.to_string(),
                occurrence: *counter,
            });
            *counter += 1;
        }
    }
    slots
}

fn function_calls(data: &[Value]) -> Vec<Slot> {
    scan(data, "functionCall")
}

fn function_responses(data: &[Value]) -> Vec<Slot> {
    scan(data, "functionResponse")
}

fn part_at<'a>(data: &'a [Value], slot: &Slot) -> Option<&'a Value> {
    data.get(slot.content)?.get("parts")?.get(slot.part)
}

/// Give every function call the position map does not know yet a synthetic
/// call ID. Returns how many positions were added.
///
/// Hosts that emit their own call events fill the map directly; this is the
/// fallback when the request body is the only source of truth.
pub fn register_positions(data: &[Value], positions: &mut HashMap<String, String>) -> usize {
    let mut added = 0;
    for slot in function_calls(data) {
        let key = slot.key();
        if positions.contains_key(&key) {
            continue;
        }
        let id = format!("gemini_{}_{}", slot.name.to_lowercase(), slot.occurrence);
        trace!("Registered Gemini position {key} -> {id}");
        positions.insert(key, id);
        added += 1;
    }
    added
}

pub(super) fn cache_tool_parameters(data: &[Value], state: &mut SessionState) {
    for slot in function_calls(data) {
        let Some(id) = state.gemini_positions.get(&slot.key()).cloned() else {
            continue;
        };
        let raw = part_at(data, &slot).and_then(|p| p.pointer("/functionCall/args"));
        let Some(params) = parse_arguments(raw) else {
            continue;
        };
        state.cache_tool(ToolCallRecord::new(&id, slot.name, params));
    }
}

fn is_user(content: &Value) -> bool {
    matches!(str_field(content, "role"), None | Some("user"))
}

pub(super) fn inject_synth(data: &mut [Value], instruction: &str, nudge_text: &str) -> bool {
    for content in data.iter_mut().rev() {
        if !is_user(content) {
            continue;
        }
        let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };
        let texts = text_parts(parts);
        if texts.is_empty() || is_synthetic(&texts.join("\n"), nudge_text) {
            continue;
        }
        if texts.iter().any(|t| t.contains(instruction)) {
            return false;
        }
        parts.push(json!({"text": instruction}));
        return true;
    }
    false
}

pub(super) fn user_turn(text: &str) -> Value {
    json!({"role": "user", "parts": [{"text": text}]})
}

pub(super) fn extract_tool_outputs(data: &[Value], state: &SessionState) -> Vec<ToolOutput> {
    function_responses(data)
        .into_iter()
        .filter_map(|slot| {
            let id = state.gemini_positions.get(&slot.key())?;
            Some(ToolOutput {
                id: normalize_id(id),
                tool_name: Some(
                    state
                        .tools
                        .tool_name(id)
                        .map(str::to_string)
                        .unwrap_or(slot.name),
                ),
            })
        })
        .collect()
}

pub(super) fn replace_tool_output(
    data: &mut [Value],
    tool_id: &str,
    pruned_message: &str,
    state: &SessionState,
) -> bool {
    let mut replaced = false;
    for slot in function_responses(data) {
        let matches = state
            .gemini_positions
            .get(&slot.key())
            .is_some_and(|id| ids_match(id, tool_id));
        if !matches {
            continue;
        }
        // Only `response` changes; `name` and sibling fields such as
        // `thoughtSignature` must survive.
        let response = data
            .get_mut(slot.content)
            .and_then(|c| c.get_mut("parts"))
            .and_then(|p| p.get_mut(slot.part))
            .and_then(|p| p.get_mut("functionResponse"))
            .and_then(Value::as_object_mut);
        if let Some(response) = response {
            response.insert(
                "response".into(),
                json!({"name": slot.name, "content": pruned_message}),
            );
            replaced = true;
        }
    }
    replaced
}

pub(super) fn has_tool_outputs(data: &[Value]) -> bool {
    data.iter()
        .any(|c| parts(c).iter().any(|p| p.get("functionResponse").is_some()))
}

pub(super) fn count_tool_outputs(data: &[Value]) -> usize {
    function_responses(data).len()
}

pub(super) fn transcript(data: &[Value], state: &SessionState) -> Transcript {
    let id_for = |slot: &Slot| {
        state
            .gemini_positions
            .get(&slot.key())
            .cloned()
            .unwrap_or_else(|| slot.key())
    };
    let calls: HashMap<(usize, usize), Slot> = function_calls(data)
        .into_iter()
        .map(|s| ((s.content, s.part), s))
        .collect();
    let responses: HashMap<(usize, usize), Slot> = function_responses(data)
        .into_iter()
        .map(|s| ((s.content, s.part), s))
        .collect();

    let mut transcript = Vec::new();
    for (ci, content) in data.iter().enumerate() {
        let mut out = Vec::new();
        for (pi, part) in parts(content).iter().enumerate() {
            if let Some(slot) = calls.get(&(ci, pi)) {
                out.push(TranscriptPart::ToolCall {
                    id: id_for(slot),
                    name: slot.name.clone(),
                    input: part
                        .pointer("/functionCall/args")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                });
            } else if let Some(slot) = responses.get(&(ci, pi)) {
                out.push(TranscriptPart::ToolResult {
                    id: id_for(slot),
                    output: response_text(part.pointer("/functionResponse/response")),
                });
            } else if let Some(text) = str_field(part, "text") {
                out.push(TranscriptPart::Text {
                    text: text.to_string(),
                });
            }
        }
        if out.is_empty() {
            continue;
        }
        let only_results = out
            .iter()
            .all(|p| matches!(p, TranscriptPart::ToolResult { .. }));
        let role = match str_field(content, "role") {
            Some("model") => Role::Assistant,
            Some("function") => Role::Tool,
            _ if only_results => Role::Tool,
            _ => Role::User,
        };
        transcript.push(TranscriptMessage::new(role, out));
    }
    transcript
}

fn response_text(response: Option<&Value>) -> String {
    let Some(response) = response else {
        return String::new();
    };
    for key in ["content", "output", "result"] {
        if let Some(value) = response.get(key) {
            return flatten_text(value);
        }
    }
    response.to_string()
}
