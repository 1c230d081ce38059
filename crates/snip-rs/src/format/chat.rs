//! OpenAI Chat Completions and Anthropic Messages bodies (`messages` array).
//!
//! The two dialects share the array but differ in where tool traffic lives:
//!
//! - OpenAI: assistant `tool_calls[]` (`id`, `function.name`,
//!   `function.arguments` as a JSON string) answered by `role: "tool"`
//!   messages carrying `tool_call_id`.
//! - Anthropic: assistant content blocks `{"type":"tool_use","id","name","input"}`
//!   answered by user content blocks `{"type":"tool_result","tool_use_id","content"}`.
//!
//! Both are handled in every operation; a body may even mix them.

use serde_json::{Value, json};
use tracing::trace;

use super::{
    ToolOutput, flatten_text, ids_match, is_synthetic, parse_arguments, str_field, text_parts,
};
use crate::host::{Role, Transcript, TranscriptMessage, TranscriptPart};
use crate::state::{SessionState, ToolCallRecord, normalize_id};

fn role(msg: &Value) -> Option<&str> {
    str_field(msg, "role")
}

fn content_blocks(msg: &Value) -> &[Value] {
    msg.get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn is_block(block: &Value, kind: &str) -> bool {
    str_field(block, "type") == Some(kind)
}

pub(super) fn cache_tool_parameters(data: &[Value], state: &mut SessionState) {
    for msg in data.iter().filter(|m| role(m) == Some("assistant")) {
        if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let (Some(id), Some(name)) = (
                    str_field(call, "id"),
                    call.pointer("/function/name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let Some(params) = parse_arguments(call.pointer("/function/arguments")) else {
                    trace!("Skipping tool call {id}: malformed arguments");
                    continue;
                };
                state.cache_tool(ToolCallRecord::new(id, name, params));
            }
        }
        for block in content_blocks(msg).iter().filter(|b| is_block(b, "tool_use")) {
            let (Some(id), Some(name)) = (str_field(block, "id"), str_field(block, "name")) else {
                continue;
            };
            let Some(params) = parse_arguments(block.get("input")) else {
                continue;
            };
            state.cache_tool(ToolCallRecord::new(id, name, params));
        }
    }
}

pub(super) fn inject_synth(data: &mut [Value], instruction: &str, nudge_text: &str) -> bool {
    for msg in data.iter_mut().rev() {
        if role(msg) != Some("user") {
            continue;
        }
        match msg.get_mut("content") {
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
            Some(Value::Array(blocks)) => {
                let texts = text_parts(blocks);
                // A user turn holding only tool results is not a real user turn.
                if texts.is_empty() || is_synthetic(&texts.join("\n"), nudge_text) {
                    continue;
                }
                if texts.iter().any(|t| t.contains(instruction)) {
                    return false;
                }
                blocks.push(json!({"type": "text", "text": instruction}));
                return true;
            }
            _ => continue,
        }
    }
    false
}

pub(super) fn user_turn(text: &str) -> Value {
    json!({"role": "user", "content": text})
}

/// IDs of every tool output, in order.
fn tool_output_ids(data: &[Value]) -> Vec<&str> {
    let mut ids = Vec::new();
    for msg in data {
        if role(msg) == Some("tool")
            && let Some(id) = str_field(msg, "tool_call_id")
        {
            ids.push(id);
        }
        ids.extend(
            content_blocks(msg)
                .iter()
                .filter(|b| is_block(b, "tool_result"))
                .filter_map(|b| str_field(b, "tool_use_id")),
        );
    }
    ids
}

pub(super) fn extract_tool_outputs(data: &[Value], state: &SessionState) -> Vec<ToolOutput> {
    tool_output_ids(data)
        .into_iter()
        .map(|id| ToolOutput {
            id: normalize_id(id),
            tool_name: state.tools.tool_name(id).map(str::to_string),
        })
        .collect()
}

pub(super) fn replace_tool_output(data: &mut [Value], tool_id: &str, pruned_message: &str) -> bool {
    let mut replaced = false;
    for msg in data.iter_mut() {
        if role(msg) == Some("tool")
            && str_field(msg, "tool_call_id").is_some_and(|id| ids_match(id, tool_id))
        {
            msg["content"] = Value::String(pruned_message.to_string());
            replaced = true;
            continue;
        }
        if let Some(blocks) = msg.get_mut("content").and_then(Value::as_array_mut) {
            for block in blocks.iter_mut() {
                if is_block(block, "tool_result")
                    && str_field(block, "tool_use_id").is_some_and(|id| ids_match(id, tool_id))
                {
                    block["content"] = Value::String(pruned_message.to_string());
                    replaced = true;
                }
            }
        }
    }
    replaced
}

pub(super) fn has_tool_outputs(data: &[Value]) -> bool {
    data.iter().any(|msg| {
        role(msg) == Some("tool")
            || content_blocks(msg)
                .iter()
                .any(|b| is_block(b, "tool_result"))
    })
}

pub(super) fn count_tool_outputs(data: &[Value]) -> usize {
    tool_output_ids(data).len()
}

pub(super) fn transcript(data: &[Value]) -> Transcript {
    data.iter().filter_map(transcript_message).collect()
}

fn transcript_message(msg: &Value) -> Option<TranscriptMessage> {
    let role = match role(msg)? {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => return None,
    };

    let mut parts = Vec::new();
    if role == Role::Tool {
        parts.push(TranscriptPart::ToolResult {
            id: str_field(msg, "tool_call_id").unwrap_or_default().to_string(),
            output: flatten_text(msg.get("content").unwrap_or(&Value::Null)),
        });
        return Some(TranscriptMessage::new(role, parts));
    }

    match msg.get("content") {
        Some(Value::String(text)) if !text.is_empty() => {
            parts.push(TranscriptPart::Text { text: text.clone() });
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match str_field(block, "type") {
                    Some("tool_use") => parts.push(TranscriptPart::ToolCall {
                        id: str_field(block, "id").unwrap_or_default().to_string(),
                        name: str_field(block, "name").unwrap_or_default().to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    }),
                    Some("tool_result") => parts.push(TranscriptPart::ToolResult {
                        id: str_field(block, "tool_use_id")
                            .unwrap_or_default()
                            .to_string(),
                        output: flatten_text(block.get("content").unwrap_or(&Value::Null)),
                    }),
                    _ => {
                        if let Some(text) = str_field(block, "text") {
                            parts.push(TranscriptPart::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                }
            }
        }
        _ => {}
    }

    for call in msg
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let raw = call.pointer("/function/arguments");
        parts.push(TranscriptPart::ToolCall {
            id: str_field(call, "id").unwrap_or_default().to_string(),
            name: call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input: parse_arguments(raw).unwrap_or_else(|| raw.cloned().unwrap_or(Value::Null)),
        });
    }

    Some(TranscriptMessage::new(role, parts))
}
