use serde_json::Value;

use super::cumulative::CumulativeTracker;
use super::json::{self, first_str, first_u64};
use super::{decode_arguments, empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession, TokenUsage};

/// User-role messages that Codex injects itself rather than the person typing.
const INJECTED_CONTEXT_PREFIXES: &[&str] = &[
    "<environment_context>",
    "<user_shell_command>",
    "<INSTRUCTIONS>",
    "<user_instructions>",
    "<system",
    "# AGENTS.md instructions for",
];

pub fn is_injected_context(text: &str) -> bool {
    let trimmed = text.trim_start();
    INJECTED_CONTEXT_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

/// A `token_count` usage object as Codex reports it: `input_tokens` includes
/// cached input and `output_tokens` includes reasoning output.
fn snapshot(usage: &Value) -> Option<TokenUsage> {
    if !usage.is_object() {
        return None;
    }
    Some(TokenUsage {
        input_tokens: first_u64(usage, &["input_tokens"]).unwrap_or(0),
        output_tokens: first_u64(usage, &["output_tokens"]).unwrap_or(0),
        cache_read_tokens: first_u64(usage, &["cached_input_tokens", "cache_read_input_tokens"])
            .unwrap_or(0),
        cache_write_tokens: 0,
        reasoning_tokens: first_u64(usage, &["reasoning_output_tokens"]).unwrap_or(0),
    })
}

/// Split inclusive Codex counts into disjoint buckets.
pub(crate) fn to_canonical(delta: TokenUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: delta.input_tokens.saturating_sub(delta.cache_read_tokens),
        output_tokens: delta.output_tokens.saturating_sub(delta.reasoning_tokens),
        cache_read_tokens: delta.cache_read_tokens,
        cache_write_tokens: 0,
        reasoning_tokens: delta.reasoning_tokens,
    }
}

struct CodexState {
    model: Option<String>,
    tracker: CumulativeTracker,
}

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let records = json::read_jsonl(&candidate.path)?;

    let mut session = empty_session(candidate, String::new());
    let mut session_id: Option<String> = None;
    let mut state = CodexState {
        model: None,
        tracker: CumulativeTracker::new(),
    };

    for record in &records {
        // Older rollouts wrote payloads at the top level
        let (record_type, payload) = match record.get("payload") {
            Some(payload) => (first_str(record, &["type"]).unwrap_or_default(), payload),
            None if record.get("type").is_none() && record.get("id").is_some() => {
                ("session_meta", record)
            }
            None => ("response_item", record),
        };
        let timestamp = json::first_value(record, &["timestamp"])
            .or_else(|| json::first_value(payload, &["timestamp"]));

        match record_type {
            "session_meta" => {
                let metadata = &mut session.metadata;
                set_once(&mut session_id, first_str(payload, &["id"]));
                set_once(&mut metadata.cwd, first_str(payload, &["cwd"]));
                set_once(&mut metadata.cli_version, first_str(payload, &["cli_version"]));
                set_once(&mut metadata.git_branch, first_str(payload, &["git.branch"]));
            }
            "turn_context" => {
                if let Some(model) = first_str(payload, &["model"]) {
                    state.model = Some(model.to_string());
                }
                set_once(&mut session.metadata.model, first_str(payload, &["model"]));
                set_once(&mut session.metadata.cwd, first_str(payload, &["cwd"]));
            }
            "response_item" => {
                if let Some(event) = response_item(payload, timestamp, &state) {
                    session.events.push(event);
                }
            }
            "event_msg" => {
                if let Some(event) = event_msg(payload, timestamp, &mut state) {
                    session.events.push(event);
                }
            }
            _ => {}
        }
    }

    session.session_id = session_id.unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    Some(session)
}

fn response_item(payload: &Value, timestamp: Option<&Value>, state: &CodexState) -> Option<RawEvent> {
    let item_type = first_str(payload, &["type"])?;
    let call_id = first_str(payload, &["call_id", "id"]).map(str::to_string);

    let raw = match item_type {
        "message" => {
            let role = first_str(payload, &["role"])?;
            let text = payload.get("content").and_then(json::extract_text);
            let kind = match role {
                "user" if text.as_deref().is_some_and(is_injected_context) => EventKind::Meta,
                "user" => EventKind::User,
                "assistant" => EventKind::Assistant,
                _ => EventKind::Meta,
            };
            let mut message = event(kind, timestamp);
            message.raw_id = first_str(payload, &["id"]).map(str::to_string);
            message.role = Some(role.to_string());
            message.text = text;
            if kind == EventKind::Assistant {
                message.model = state.model.clone();
            }
            message
        }
        "function_call" | "custom_tool_call" | "local_shell_call" => {
            let mut call = event(EventKind::ToolCall, timestamp);
            call.raw_id = call_id.clone();
            call.message_id = call_id;
            call.tool_name = Some(
                first_str(payload, &["name"])
                    .unwrap_or(if item_type == "local_shell_call" { "shell" } else { "unknown" })
                    .to_string(),
            );
            call.tool_input = json::first_value(payload, &["arguments", "input", "action"])
                .map(decode_arguments);
            call.model = state.model.clone();
            call
        }
        "web_search_call" => {
            let mut call = event(EventKind::ToolCall, timestamp);
            call.raw_id = call_id.clone();
            call.message_id = call_id;
            call.tool_name = Some("web_search".to_string());
            call.tool_input = payload.get("action").cloned();
            call
        }
        "function_call_output" | "custom_tool_call_output" | "local_shell_call_output" => {
            let output = payload.get("output").map(decode_arguments);
            let mut result = event(EventKind::ToolResult, timestamp);
            result.raw_id = call_id.clone();
            result.message_id = call_id.clone();
            result.parent_id = call_id;
            result.text = output.as_ref().and_then(|o| {
                json::first_value(o, &["output"])
                    .and_then(json::extract_text)
                    .or_else(|| json::extract_text(o))
            });
            result.tool_output = output;
            result
        }
        "reasoning" => {
            let mut reasoning = event(EventKind::Meta, timestamp);
            reasoning.raw_id = first_str(payload, &["id"]).map(str::to_string);
            reasoning.role = Some("reasoning".to_string());
            reasoning.text = payload.get("summary").and_then(json::extract_text);
            reasoning
        }
        _ => return None,
    };
    Some(raw)
}

fn event_msg(payload: &Value, timestamp: Option<&Value>, state: &mut CodexState) -> Option<RawEvent> {
    let msg_type = first_str(payload, &["type"])?;
    match msg_type {
        "token_count" => {
            let info = payload.get("info").filter(|i| i.is_object())?;
            let total = info.get("total_token_usage").and_then(snapshot)?;
            let last = info.get("last_token_usage").and_then(snapshot);
            let delta = state.tracker.token_delta(total, last)?;

            let mut usage = event(EventKind::Meta, timestamp);
            usage.role = Some("token_count".to_string());
            usage.usage = Some(to_canonical(delta).to_value());
            usage.model = state.model.clone();
            Some(usage)
        }
        "error" | "stream_error" => {
            let mut error = event(EventKind::Error, timestamp);
            error.text = first_str(payload, &["message"]).map(str::to_string);
            Some(error)
        }
        // Echoes of response items
        "user_message" | "agent_message" | "agent_reasoning" => None,
        other if other.ends_with("_delta") => {
            let mut delta = event(EventKind::Meta, timestamp);
            delta.is_delta = true;
            delta.role = Some(other.to_string());
            delta.text = first_str(payload, &["delta"]).map(str::to_string);
            Some(delta)
        }
        _ => None,
    }
}
