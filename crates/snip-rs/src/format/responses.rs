//! OpenAI Responses API bodies (`input` array of typed items).
//!
//! Calls are `{"type":"function_call","call_id","name","arguments"}` items and
//! outputs are `{"type":"function_call_output","call_id","output"}` items.
//! User turns are `message` items (or bare `{"role":"user"}` items) whose
//! content is a string or a list of `input_text` parts.

use serde_json::{Value, json};

use super::{
    ToolOutput, flatten_text, ids_match, is_synthetic, parse_arguments, str_field, text_parts,
};
use crate::host::{Role, Transcript, TranscriptMessage, TranscriptPart};
use crate::state::{SessionState, ToolCallRecord, normalize_id};

fn item_type(item: &Value) -> Option<&str> {
    str_field(item, "type")
}

fn is_output(item: &Value) -> bool {
    item_type(item) == Some("function_call_output")
}

fn is_user_message(item: &Value) -> bool {
    matches!(item_type(item), None | Some("message")) && str_field(item, "role") == Some("user")
}

pub(super) fn cache_tool_parameters(data: &[Value], state: &mut SessionState) {
    for item in data.iter().filter(|i| item_type(i) == Some("function_call")) {
        let (Some(id), Some(name)) = (str_field(item, "call_id"), str_field(item, "name")) else {
            continue;
        };
        let Some(params) = parse_arguments(item.get("arguments")) else {
            continue;
        };
        state.cache_tool(ToolCallRecord::new(id, name, params));
    }
}

pub(super) fn inject_synth(data: &mut [Value], instruction: &str, nudge_text: &str) -> bool {
    for item in data.iter_mut().rev() {
        if !is_user_message(item) {
            continue;
        }
        match item.get_mut("content") {
            Some(Value::String(text)) => {
                if is_synthetic(text, nudge_text) {
                    continue;
                }
                if text.contains(instruction) {
                    return false;
                }
                text.push_str("\n\n");
                text.push_str(instruction);
                return true;
            }
            Some(Value::Array(parts)) => {
                let texts = text_parts(parts);
                if texts.is_empty() || is_synthetic(&texts.join("\n"), nudge_text) {
                    continue;
                }
                if texts.iter().any(|t| t.contains(instruction)) {
                    return false;
                }
                parts.push(json!({"type": "input_text", "text": instruction}));
                return true;
            }
            _ => continue,
        }
    }
    false
}

pub(super) fn user_turn(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "user",
        "content": [{"type": "input_text", "text": text}]
    })
}

pub(super) fn extract_tool_outputs(data: &[Value], state: &SessionState) -> Vec<ToolOutput> {
    data.iter()
        .filter(|i| is_output(i))
        .filter_map(|i| str_field(i, "call_id"))
        .map(|id| ToolOutput {
            id: normalize_id(id),
            tool_name: state.tools.tool_name(id).map(str::to_string),
        })
        .collect()
}

pub(super) fn replace_tool_output(data: &mut [Value], tool_id: &str, pruned_message: &str) -> bool {
    let mut replaced = false;
    for item in data.iter_mut().filter(|i| is_output(i)) {
        if !str_field(item, "call_id").is_some_and(|id| ids_match(id, tool_id)) {
            continue;
        }
        if let Some(obj) = item.as_object_mut() {
            obj.insert("output".into(), Value::String(pruned_message.to_string()));
            replaced = true;
        }
    }
    replaced
}

pub(super) fn has_tool_outputs(data: &[Value]) -> bool {
    data.iter().any(is_output)
}

pub(super) fn count_tool_outputs(data: &[Value]) -> usize {
    data.iter().filter(|i| is_output(i)).count()
}

pub(super) fn transcript(data: &[Value]) -> Transcript {
    data.iter()
        .filter_map(|item| match item_type(item) {
            Some("function_call") => Some(TranscriptMessage::new(
                Role::Assistant,
                vec![TranscriptPart::ToolCall {
                    id: str_field(item, "call_id").unwrap_or_default().to_string(),
                    name: str_field(item, "name").unwrap_or_default().to_string(),
                    input: parse_arguments(item.get("arguments")).unwrap_or(Value::Null),
                }],
            )),
            Some("function_call_output") => Some(TranscriptMessage::new(
                Role::Tool,
                vec![TranscriptPart::ToolResult {
                    id: str_field(item, "call_id").unwrap_or_default().to_string(),
                    output: flatten_text(item.get("output").unwrap_or(&Value::Null)),
                }],
            )),
            None | Some("message") => {
                let role = match str_field(item, "role")? {
                    "system" | "developer" => Role::System,
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    _ => return None,
                };
                let text = flatten_text(item.get("content").unwrap_or(&Value::Null));
                Some(TranscriptMessage::text(role, text))
            }
            _ => None,
        })
        .collect()
}
