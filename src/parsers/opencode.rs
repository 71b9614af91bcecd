//! OpenCode keeps one file per session, per message and per message part:
//!
//! ```text
//! storage/session/<project>/<sessionID>.json
//! storage/message/<sessionID>/<messageID>.json
//! storage/part/<messageID>/<partID>.json
//! ```
//!
//! Discovery yields the session file; messages and parts are read from the
//! sibling directories.

use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use super::json::{self, first_f64, first_str, first_u64};
use super::{empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession, TokenUsage};

/// `storage/` for a session file at `storage/session/<project>/<id>.json`.
fn storage_root(session_file: &Path) -> Option<PathBuf> {
    Some(session_file.parent()?.parent()?.parent()?.to_path_buf())
}

/// All JSON documents directly inside `dir`, in file-name order.
fn read_dir_documents(dir: &Path) -> Vec<Value> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json")
        })
        .filter_map(|entry| json::read_document(entry.path()))
        .collect()
}

fn usage(tokens: &Value) -> Option<Value> {
    if !tokens.is_object() {
        return None;
    }
    let usage = TokenUsage {
        input_tokens: first_u64(tokens, &["input"]).unwrap_or(0),
        output_tokens: first_u64(tokens, &["output"]).unwrap_or(0),
        cache_read_tokens: first_u64(tokens, &["cache.read"]).unwrap_or(0),
        cache_write_tokens: first_u64(tokens, &["cache.write"]).unwrap_or(0),
        reasoning_tokens: first_u64(tokens, &["reasoning"]).unwrap_or(0),
    };
    Some(usage.to_value())
}

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let doc = json::read_document(&candidate.path)?;
    let session_id = first_str(&doc, &["id"])
        .map(str::to_string)
        .unwrap_or_else(|| json::session_id_from_path(&candidate.path));

    let mut session = empty_session(candidate, session_id.clone());
    let metadata = &mut session.metadata;
    set_once(&mut metadata.title, first_str(&doc, &["title"]));
    set_once(&mut metadata.cwd, first_str(&doc, &["directory"]));
    set_once(&mut metadata.cli_version, first_str(&doc, &["version"]));

    let storage = storage_root(&candidate.path)?;
    let mut messages = read_dir_documents(&storage.join("message").join(&session_id));
    // File names are ids; creation time is the real order
    messages.sort_by_key(|m| first_u64(m, &["time.created"]).unwrap_or(u64::MAX));

    for message in &messages {
        let Some(message_id) = first_str(message, &["id"]) else {
            continue;
        };
        let parts = read_dir_documents(&storage.join("part").join(message_id));
        set_once(&mut session.metadata.cwd, first_str(message, &["path.cwd"]));
        session.events.extend(message_events(message, message_id, &parts, &mut session.metadata.model));
    }

    Some(session)
}

fn message_events(
    message: &Value,
    message_id: &str,
    parts: &[Value],
    session_model: &mut Option<String>,
) -> Vec<RawEvent> {
    let timestamp = json::path(message, "time.created");
    let role = first_str(message, &["role"]).unwrap_or_default();
    let model = first_str(message, &["modelID", "model.modelID"]);

    let text_parts: Vec<&str> = parts
        .iter()
        .filter(|part| first_str(part, &["type"]) == Some("text"))
        .filter(|part| !json::first_bool(part, &["synthetic"]).unwrap_or(false))
        .filter_map(|part| first_str(part, &["text"]))
        .collect();
    let text = (!text_parts.is_empty()).then(|| text_parts.join("\n"));

    let mut events = Vec::new();
    let kind = match role {
        "user" => EventKind::User,
        "assistant" => EventKind::Assistant,
        _ => EventKind::Meta,
    };
    let mut main = event(kind, timestamp);
    main.raw_id = Some(message_id.to_string());
    main.message_id = Some(message_id.to_string());
    main.parent_id = first_str(message, &["parentID"]).map(str::to_string);
    main.role = Some(role.to_string());
    main.text = text;
    if kind == EventKind::Assistant {
        set_once(session_model, model);
        main.model = model.map(str::to_string);
        main.usage = message.get("tokens").and_then(usage);
        // Zero means "not billed by OpenCode", not "free"
        main.cost_usd = first_f64(message, &["cost"]).filter(|cost| *cost > 0.0);
    }
    events.push(main);

    if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
        let mut failure = event(EventKind::Error, json::path(message, "time.completed").or(timestamp));
        failure.parent_id = Some(message_id.to_string());
        failure.text = first_str(error, &["data.message", "message", "name"]).map(str::to_string);
        events.push(failure);
    }

    for part in parts {
        if first_str(part, &["type"]) == Some("tool") {
            events.extend(tool_part_events(part, message_id, timestamp, model));
        }
    }
    events
}

fn tool_part_events(
    part: &Value,
    message_id: &str,
    message_timestamp: Option<&Value>,
    model: Option<&str>,
) -> Vec<RawEvent> {
    let call_id = first_str(part, &["callID", "id"]).map(str::to_string);
    let state = part.get("state");
    let status = state.and_then(|s| first_str(s, &["status"])).unwrap_or_default();

    let mut call = event(
        EventKind::ToolCall,
        json::path(part, "state.time.start").or(message_timestamp),
    );
    call.raw_id = call_id.clone();
    call.message_id = call_id.clone();
    call.parent_id = Some(message_id.to_string());
    call.tool_name = first_str(part, &["tool"]).map(str::to_string);
    call.tool_input = state.and_then(|s| s.get("input")).cloned();
    call.model = model.map(str::to_string);

    let mut events = vec![call];
    if matches!(status, "completed" | "error") {
        let kind = if status == "error" { EventKind::Error } else { EventKind::ToolResult };
        let mut result = event(
            kind,
            json::path(part, "state.time.end").or(message_timestamp),
        );
        result.raw_id = call_id.clone();
        result.message_id = call_id.clone();
        result.parent_id = call_id;
        result.tool_name = first_str(part, &["tool"]).map(str::to_string);
        result.tool_output = state.and_then(|s| json::first_value(s, &["output", "error"])).cloned();
        result.text = state.and_then(|s| first_str(s, &["output", "error"])).map(str::to_string);
        events.push(result);
    }
    events
}
