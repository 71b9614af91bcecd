use std::collections::HashSet;

use serde_json::Value;

use super::json::{self, first_str};
use super::{empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession};

/// Placeholder model Claude Code writes on locally generated messages.
const SYNTHETIC_MODEL: &str = "<synthetic>";

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let records = json::read_jsonl(&candidate.path)?;

    let mut session = empty_session(candidate, String::new());
    let mut session_id: Option<String> = None;
    let mut title: Option<String> = None;
    // (message.id, requestId) pairs whose usage was already reported
    let mut reported_usage: HashSet<(String, String)> = HashSet::new();

    for record in &records {
        let record_type = record.get("type").and_then(Value::as_str).unwrap_or_default();

        if record_type == "summary" {
            if let Some(summary) = first_str(record, &["summary"]) {
                title = Some(summary.to_string());
            }
            continue;
        }

        let metadata = &mut session.metadata;
        set_once(&mut session_id, first_str(record, &["sessionId"]));
        set_once(&mut metadata.cwd, first_str(record, &["cwd"]));
        set_once(&mut metadata.git_branch, first_str(record, &["gitBranch"]));
        set_once(&mut metadata.cli_version, first_str(record, &["version"]));

        match record_type {
            "user" => session.events.extend(user_events(record)),
            "assistant" => {
                let model = first_str(record, &["message.model"]).filter(|m| *m != SYNTHETIC_MODEL);
                set_once(&mut session.metadata.model, model);
                session
                    .events
                    .extend(assistant_events(record, model, &mut reported_usage));
            }
            "system" => {
                let mut meta = event(EventKind::Meta, record.get("timestamp"));
                meta.raw_id = first_str(record, &["uuid"]).map(str::to_string);
                meta.parent_id = first_str(record, &["parentUuid"]).map(str::to_string);
                meta.role = Some("system".to_string());
                meta.text = record.get("content").and_then(json::extract_text);
                session.events.push(meta);
            }
            _ => {}
        }
    }

    session.metadata.title = title;
    session.session_id = session_id.unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    Some(session)
}

fn user_events(record: &Value) -> Vec<RawEvent> {
    let timestamp = record.get("timestamp");
    let uuid = first_str(record, &["uuid"]);
    let content = record.get("message").and_then(|m| m.get("content"));

    let mut events = Vec::new();
    if let Some(text) = content.and_then(json::extract_text) {
        let is_meta = json::first_bool(record, &["isMeta"]).unwrap_or(false);
        let kind = if is_meta { EventKind::Meta } else { EventKind::User };
        let mut user = event(kind, timestamp);
        user.raw_id = uuid.map(str::to_string);
        user.parent_id = first_str(record, &["parentUuid"]).map(str::to_string);
        user.role = Some("user".to_string());
        user.text = Some(text);
        events.push(user);
    }
    if let Some(content) = content {
        events.extend(tool_block_events(content, uuid, timestamp, None));
    }
    events
}

fn assistant_events(
    record: &Value,
    model: Option<&str>,
    reported_usage: &mut HashSet<(String, String)>,
) -> Vec<RawEvent> {
    let timestamp = record.get("timestamp");
    let uuid = first_str(record, &["uuid"]);
    let message = record.get("message");
    let message_id = first_str(record, &["message.id"]);
    let content = message.and_then(|m| m.get("content"));

    if json::first_bool(record, &["isApiErrorMessage"]).unwrap_or(false) {
        let mut error = event(EventKind::Error, timestamp);
        error.raw_id = uuid.map(str::to_string);
        error.parent_id = first_str(record, &["parentUuid"]).map(str::to_string);
        error.text = content.and_then(json::extract_text);
        error.model = model.map(str::to_string);
        return vec![error];
    }

    // Streaming splits of one API response repeat the same usage
    let first_split = match (message_id, first_str(record, &["requestId"])) {
        (Some(id), Some(request)) => reported_usage.insert((id.to_string(), request.to_string())),
        _ => true,
    };
    let usage = first_split
        .then(|| json::first_value(record, &["message.usage"]).cloned())
        .flatten();
    let cost_usd = first_split
        .then(|| json::first_f64(record, &["costUSD"]))
        .flatten();

    let mut events = Vec::new();
    let text = content.and_then(json::extract_text);
    if text.is_some() || usage.is_some() || cost_usd.is_some() {
        let mut assistant = event(EventKind::Assistant, timestamp);
        assistant.raw_id = uuid.map(str::to_string);
        assistant.parent_id = first_str(record, &["parentUuid"]).map(str::to_string);
        assistant.message_id = message_id.map(str::to_string);
        assistant.role = Some("assistant".to_string());
        assistant.text = text;
        assistant.model = model.map(str::to_string);
        assistant.usage = usage;
        assistant.cost_usd = cost_usd;
        events.push(assistant);
    }
    if let Some(content) = content {
        events.extend(tool_block_events(content, uuid, timestamp, model));
    }
    events
}

/// `tool_use` and `tool_result` blocks of an Anthropic-style content array.
///
/// Calls and results are keyed by the tool-use id, so a call and its result
/// share `message_id` and the result's `parent_id` points at the call.
pub(crate) fn tool_block_events(
    content: &Value,
    parent: Option<&str>,
    timestamp: Option<&Value>,
    model: Option<&str>,
) -> Vec<RawEvent> {
    let Some(blocks) = content.as_array() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_use") => {
                let id = first_str(block, &["id"]);
                let mut call = event(EventKind::ToolCall, timestamp);
                call.raw_id = id.map(str::to_string);
                call.message_id = id.map(str::to_string);
                call.parent_id = parent.map(str::to_string);
                call.tool_name = first_str(block, &["name"]).map(str::to_string);
                call.tool_input = block.get("input").cloned();
                call.model = model.map(str::to_string);
                events.push(call);
            }
            Some("tool_result") => {
                let id = first_str(block, &["tool_use_id"]);
                let is_error = json::first_bool(block, &["is_error"]).unwrap_or(false);
                let kind = if is_error { EventKind::Error } else { EventKind::ToolResult };
                let mut result = event(kind, timestamp);
                result.raw_id = id.map(str::to_string);
                result.message_id = id.map(str::to_string);
                result.parent_id = id.map(str::to_string);
                result.tool_output = block.get("content").cloned();
                result.text = block.get("content").and_then(json::extract_text);
                events.push(result);
            }
            _ => {}
        }
    }
    events
}
