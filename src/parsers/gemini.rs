use serde_json::Value;

use super::json::{self, first_str, first_u64};
use super::{decode_arguments, empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession, TokenUsage};

/// `tokens{input, output, cached, thoughts, tool}` of a gemini message.
/// Tool-use prompt tokens are billed as input.
fn usage(tokens: &Value) -> Option<Value> {
    if !tokens.is_object() {
        return None;
    }
    let usage = TokenUsage {
        input_tokens: first_u64(tokens, &["input"])
            .unwrap_or(0)
            .saturating_add(first_u64(tokens, &["tool"]).unwrap_or(0)),
        output_tokens: first_u64(tokens, &["output"]).unwrap_or(0),
        cache_read_tokens: first_u64(tokens, &["cached"]).unwrap_or(0),
        cache_write_tokens: 0,
        reasoning_tokens: first_u64(tokens, &["thoughts"]).unwrap_or(0),
    };
    Some(usage.to_value())
}

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let doc = json::read_document(&candidate.path)?;
    let messages = doc.get("messages")?.as_array()?;

    let session_id = first_str(&doc, &["sessionId"])
        .map(str::to_string)
        .unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    let mut session = empty_session(candidate, session_id);

    for message in messages {
        let timestamp = message.get("timestamp");
        let id = first_str(message, &["id"]);
        let text = message.get("content").and_then(json::extract_text);

        match first_str(message, &["type"]).unwrap_or_default() {
            "user" => {
                let mut user = event(EventKind::User, timestamp);
                user.raw_id = id.map(str::to_string);
                user.role = Some("user".to_string());
                user.text = text;
                session.events.push(user);
            }
            "gemini" => {
                let model = first_str(message, &["model"]);
                set_once(&mut session.metadata.model, model);

                let mut assistant = event(EventKind::Assistant, timestamp);
                assistant.raw_id = id.map(str::to_string);
                assistant.message_id = id.map(str::to_string);
                assistant.role = Some("assistant".to_string());
                assistant.text = text;
                assistant.model = model.map(str::to_string);
                assistant.usage = message.get("tokens").and_then(usage);
                session.events.push(assistant);

                if let Some(calls) = message.get("toolCalls").and_then(Value::as_array) {
                    for call in calls {
                        session.events.extend(tool_call_events(call, id, timestamp, model));
                    }
                }
            }
            "error" => {
                let mut error = event(EventKind::Error, timestamp);
                error.raw_id = id.map(str::to_string);
                error.text = text;
                session.events.push(error);
            }
            "info" | "system" | "warning" => {
                let mut meta = event(EventKind::Meta, timestamp);
                meta.raw_id = id.map(str::to_string);
                meta.role = Some("system".to_string());
                meta.text = text;
                session.events.push(meta);
            }
            _ => {}
        }
    }

    Some(session)
}

/// One call and, once it has finished, its result. Both carry the call id.
fn tool_call_events(
    call: &Value,
    message_id: Option<&str>,
    message_timestamp: Option<&Value>,
    model: Option<&str>,
) -> Vec<RawEvent> {
    let call_id = first_str(call, &["id"]).map(str::to_string);
    let timestamp = call.get("timestamp").or(message_timestamp);

    let mut tool_call = event(EventKind::ToolCall, timestamp);
    tool_call.raw_id = call_id.clone();
    tool_call.message_id = call_id.clone();
    tool_call.parent_id = message_id.map(str::to_string);
    tool_call.tool_name = first_str(call, &["name", "displayName"]).map(str::to_string);
    tool_call.tool_input = call.get("args").map(decode_arguments);
    tool_call.model = model.map(str::to_string);

    let mut events = vec![tool_call];

    let status = first_str(call, &["status"]).unwrap_or_default();
    if call.get("result").is_some_and(|r| !r.is_null()) || matches!(status, "error" | "cancelled") {
        let kind = if status == "error" { EventKind::Error } else { EventKind::ToolResult };
        let mut result = event(kind, timestamp);
        result.raw_id = call_id.clone();
        result.message_id = call_id.clone();
        result.parent_id = call_id;
        result.tool_name = first_str(call, &["name"]).map(str::to_string);
        result.tool_output = call.get("result").cloned();
        result.text = first_str(call, &["resultDisplay"])
            .map(str::to_string)
            .or_else(|| call.get("result").and_then(json::extract_text));
        events.push(result);
    }
    events
}
