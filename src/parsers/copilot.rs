use std::collections::HashSet;

use serde_json::Value;

use super::json::{self, first_str};
use super::{decode_arguments, empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession};

/// GitHub Copilot CLI `session-state` event log.
pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let records = json::read_jsonl(&candidate.path)?;

    let mut session = empty_session(candidate, String::new());
    let mut session_id: Option<String> = None;
    let mut model: Option<String> = None;
    let mut requested_calls: HashSet<String> = HashSet::new();

    for record in &records {
        let timestamp = record.get("timestamp");
        let id = first_str(record, &["id"]);
        let empty = Value::Null;
        let data = record.get("data").unwrap_or(&empty);

        match first_str(record, &["type"]).unwrap_or_default() {
            "session.start" => {
                let metadata = &mut session.metadata;
                set_once(&mut session_id, first_str(data, &["sessionId"]));
                set_once(&mut metadata.cli_version, first_str(data, &["copilotVersion", "version"]));
                set_once(&mut metadata.cwd, first_str(data, &["context.cwd", "cwd"]));
                set_once(&mut metadata.git_branch, first_str(data, &["context.gitBranch", "context.branch"]));
                set_once(&mut metadata.model, first_str(data, &["selectedModel", "model"]));
                if let Some(selected) = first_str(data, &["selectedModel", "model"]) {
                    model = Some(selected.to_string());
                }
            }
            "session.model_change" => {
                if let Some(new_model) = first_str(data, &["newModel", "model"]) {
                    set_once(&mut session.metadata.model, Some(new_model));
                    model = Some(new_model.to_string());
                }
            }
            "session.info" => {
                let mut meta = event(EventKind::Meta, timestamp);
                meta.raw_id = id.map(str::to_string);
                meta.role = Some("system".to_string());
                meta.text = first_str(data, &["message"]).map(str::to_string);
                session.events.push(meta);
            }
            "session.error" => {
                let mut error = event(EventKind::Error, timestamp);
                error.raw_id = id.map(str::to_string);
                error.text = first_str(data, &["message", "errorType"]).map(str::to_string);
                session.events.push(error);
            }
            "user.message" => {
                let mut user = event(EventKind::User, timestamp);
                user.raw_id = id.map(str::to_string);
                user.parent_id = first_str(record, &["parentId"]).map(str::to_string);
                user.role = Some("user".to_string());
                user.text = data.get("content").and_then(json::extract_text);
                session.events.push(user);
            }
            "assistant.message" => {
                let message_id = first_str(data, &["messageId"]).or(id);
                if let Some(text) = data.get("content").and_then(json::extract_text) {
                    let mut assistant = event(EventKind::Assistant, timestamp);
                    assistant.raw_id = id.map(str::to_string);
                    assistant.message_id = message_id.map(str::to_string);
                    assistant.parent_id = first_str(record, &["parentId"]).map(str::to_string);
                    assistant.role = Some("assistant".to_string());
                    assistant.text = Some(text);
                    assistant.model = model.clone();
                    session.events.push(assistant);
                }
                for request in data.get("toolRequests").and_then(Value::as_array).into_iter().flatten() {
                    let call = tool_call(request, id, timestamp, model.as_deref());
                    if let Some(call_id) = &call.raw_id {
                        requested_calls.insert(call_id.clone());
                    }
                    session.events.push(call);
                }
            }
            "assistant.message_delta" => {
                let mut delta = event(EventKind::Assistant, timestamp);
                delta.raw_id = id.map(str::to_string);
                delta.message_id = first_str(data, &["messageId"]).map(str::to_string);
                delta.role = Some("assistant".to_string());
                delta.text = first_str(data, &["deltaContent", "content"]).map(str::to_string);
                delta.is_delta = true;
                delta.model = model.clone();
                session.events.push(delta);
            }
            "tool.execution_start" => {
                // Usually already announced through assistant.message toolRequests
                let call_id = first_str(data, &["toolCallId"]);
                if call_id.is_some_and(|c| requested_calls.contains(c)) {
                    continue;
                }
                let call = tool_call(data, id, timestamp, model.as_deref());
                if let Some(call_id) = &call.raw_id {
                    requested_calls.insert(call_id.clone());
                }
                session.events.push(call);
            }
            "tool.execution_complete" => {
                let call_id = first_str(data, &["toolCallId"]).map(str::to_string);
                let success = json::first_bool(data, &["success"]).unwrap_or(true);
                let kind = if success { EventKind::ToolResult } else { EventKind::Error };
                let output = json::first_value(data, &["result", "error"]);

                let mut result = event(kind, timestamp);
                result.raw_id = call_id.clone();
                result.message_id = call_id.clone();
                result.parent_id = call_id;
                result.tool_output = output.cloned();
                result.text = output.and_then(|o| {
                    first_str(o, &["content", "message"])
                        .map(str::to_string)
                        .or_else(|| json::extract_text(o))
                });
                session.events.push(result);
            }
            "assistant.usage" => {
                let usage_model = first_str(data, &["model"]).map(str::to_string).or_else(|| model.clone());
                let mut meta = event(EventKind::Meta, timestamp);
                meta.raw_id = id.map(str::to_string);
                meta.role = Some("usage".to_string());
                meta.model = usage_model;
                // `cost` here counts premium requests, not dollars
                meta.usage = Some(data.clone());
                session.events.push(meta);
            }
            _ => {}
        }
    }

    session.session_id = session_id.unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    Some(session)
}

fn tool_call(
    request: &Value,
    parent: Option<&str>,
    timestamp: Option<&Value>,
    model: Option<&str>,
) -> RawEvent {
    let call_id = first_str(request, &["toolCallId", "id"]).map(str::to_string);
    let mut call = event(EventKind::ToolCall, timestamp);
    call.raw_id = call_id.clone();
    call.message_id = call_id;
    call.parent_id = parent.map(str::to_string);
    call.tool_name = first_str(request, &["name", "toolName"]).map(str::to_string);
    call.tool_input = request.get("arguments").map(decode_arguments);
    call.model = model.map(str::to_string);
    call
}
