use std::path::{Path, PathBuf};

use serde_json::Value;

use super::claude::tool_block_events;
use super::json::{self, first_str, first_u64};
use super::{empty_session, event, set_once};
use crate::types::{EventKind, FileCandidate, RawParsedSession, TokenUsage};

/// `<stem>.settings.json` next to `<stem>.jsonl`.
fn settings_path(session_file: &Path) -> Option<PathBuf> {
    let stem = session_file.file_stem()?.to_string_lossy();
    Some(session_file.with_file_name(format!("{stem}.settings.json")))
}

/// Session-wide `tokenUsage` from the settings companion.
fn settings_usage(settings: &Value) -> Option<TokenUsage> {
    let usage = settings.get("tokenUsage").filter(|u| u.is_object())?;
    Some(TokenUsage {
        input_tokens: first_u64(usage, &["inputTokens"]).unwrap_or(0),
        output_tokens: first_u64(usage, &["outputTokens"]).unwrap_or(0),
        cache_read_tokens: first_u64(usage, &["cacheReadTokens"]).unwrap_or(0),
        cache_write_tokens: first_u64(usage, &["cacheCreationTokens"]).unwrap_or(0),
        reasoning_tokens: first_u64(usage, &["thinkingTokens"]).unwrap_or(0),
    })
}

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let records = json::read_jsonl(&candidate.path)?;
    let settings = settings_path(&candidate.path).and_then(|p| json::read_document(&p));
    let model = settings
        .as_ref()
        .and_then(|s| first_str(s, &["model"]))
        .map(str::to_string);

    let mut session = empty_session(candidate, String::new());
    let mut session_id: Option<String> = None;
    session.metadata.model = model.clone();

    for record in &records {
        let timestamp = record.get("timestamp");
        match first_str(record, &["type"]).unwrap_or_default() {
            "session_start" => {
                let metadata = &mut session.metadata;
                set_once(&mut session_id, first_str(record, &["id", "sessionId"]));
                set_once(&mut metadata.title, first_str(record, &["sessionTitle", "title"]));
                set_once(&mut metadata.cwd, first_str(record, &["cwd"]));
                set_once(&mut metadata.cli_version, first_str(record, &["version"]));
            }
            "message" => {
                let id = first_str(record, &["id"]);
                let role = first_str(record, &["message.role"]).unwrap_or_default();
                let content = json::path(record, "message.content");

                let kind = match role {
                    "user" => EventKind::User,
                    "assistant" => EventKind::Assistant,
                    _ => EventKind::Meta,
                };
                let event_model = (kind == EventKind::Assistant).then_some(model.as_deref()).flatten();

                if let Some(text) = content.and_then(json::extract_text) {
                    let mut message = event(kind, timestamp);
                    message.raw_id = id.map(str::to_string);
                    message.message_id = id.map(str::to_string);
                    message.parent_id = first_str(record, &["parentId"]).map(str::to_string);
                    message.role = Some(role.to_string());
                    message.text = Some(text);
                    message.model = event_model.map(str::to_string);
                    session.events.push(message);
                }
                if let Some(content) = content {
                    session
                        .events
                        .extend(tool_block_events(content, id, timestamp, event_model));
                }
            }
            "todo_state" => {
                let mut meta = event(EventKind::Meta, timestamp);
                meta.raw_id = first_str(record, &["id"]).map(str::to_string);
                meta.role = Some("todo_state".to_string());
                meta.tool_output = record.get("todos").cloned();
                session.events.push(meta);
            }
            _ => {}
        }
    }

    // One session-level usage record, stamped with the last event time
    if !session.events.is_empty()
        && let Some(usage) = settings.as_ref().and_then(settings_usage)
    {
        let last_timestamp = session.events.iter().rev().find_map(|e| e.timestamp.clone());
        let mut meta = event(EventKind::Meta, last_timestamp.as_ref());
        meta.raw_id = Some("settings-usage".to_string());
        meta.role = Some("usage".to_string());
        meta.model = model;
        meta.usage = Some(usage.to_value());
        session.events.push(meta);
    }

    session.session_id = session_id.unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    Some(session)
}
