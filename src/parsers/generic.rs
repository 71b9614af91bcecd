//! Best-effort parser for files no source parser understood.
//!
//! Every record is searched with long alias lists; anything carrying a role,
//! a recognizable type, text or usage becomes an event.

use serde_json::Value;

use super::codex;
use super::cumulative::CumulativeTracker;
use super::json::{self, first_f64, first_str, first_value};
use super::{empty_session, event, set_once};
use crate::normalize::resolve_usage;
use crate::types::{EventKind, FileCandidate, RawParsedSession};

/// Record type of a cumulative usage snapshot.
const TOKEN_COUNT_SENTINEL: &str = "token_count";

const SESSION_ID_KEYS: &[&str] = &[
    "sessionId",
    "session_id",
    "sessionID",
    "conversationId",
    "conversation_id",
    "payload.id",
    "data.sessionId",
];

const CWD_KEYS: &[&str] = &[
    "cwd",
    "workdir",
    "working_directory",
    "workingDirectory",
    "directory",
    "projectPath",
    "project_path",
    "path.cwd",
    "payload.cwd",
    "context.cwd",
    "data.context.cwd",
    "session.cwd",
];

const MODEL_KEYS: &[&str] = &[
    "model",
    "modelId",
    "modelID",
    "model_id",
    "model_name",
    "modelName",
    "message.model",
    "payload.model",
    "data.model",
    "response.model",
    "metadata.model",
    "info.model",
];

const USAGE_KEYS: &[&str] = &[
    "usage",
    "message.usage",
    "tokens",
    "token_usage",
    "tokenUsage",
    "payload.usage",
    "data.usage",
    "response.usage",
    "usageMetadata",
    "metadata.usage",
    "payload.info.last_token_usage",
    "stats.usage",
];

const CUMULATIVE_USAGE_KEYS: &[&str] = &[
    "payload.info.total_token_usage",
    "info.total_token_usage",
    "total_token_usage",
    "payload.total_token_usage",
    "usage",
];

const LAST_USAGE_KEYS: &[&str] = &[
    "payload.info.last_token_usage",
    "info.last_token_usage",
    "last_token_usage",
];

const COST_KEYS: &[&str] = &[
    "cost_usd",
    "costUSD",
    "costUsd",
    "cost",
    "usd_cost",
    "total_cost",
    "message.cost",
    "message.costUSD",
    "payload.cost",
    "data.cost",
    "usage.cost",
    "usage.cost_usd",
];

const CUMULATIVE_COST_KEYS: &[&str] = &["total_cost_usd", "cumulative_cost_usd"];

const ROLE_KEYS: &[&str] = &[
    "role",
    "message.role",
    "payload.role",
    "data.role",
    "author",
    "author.role",
    "sender",
];

const TYPE_KEYS: &[&str] = &["type", "payload.type", "event", "kind"];

const TEXT_KEYS: &[&str] = &[
    "content",
    "message",
    "summary",
    "text",
    "payload.content",
    "data.content",
];

const ID_KEYS: &[&str] = &["uuid", "id", "messageId", "message_id", "message.id", "payload.id"];

const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "time.created",
    "created_at",
    "createdAt",
    "ts",
    "time",
    "date",
    "payload.timestamp",
];

/// Codex-style snapshots count cached input inside `input_tokens` and
/// reasoning inside `output_tokens`.
fn counts_are_inclusive(usage: &Value) -> bool {
    ["cached_input_tokens", "reasoning_output_tokens"]
        .iter()
        .any(|key| usage.get(key).is_some())
}

fn kind_from_role(role: &str) -> Option<EventKind> {
    match role.to_ascii_lowercase().as_str() {
        "user" | "human" => Some(EventKind::User),
        "assistant" | "model" | "ai" | "gemini" | "bot" => Some(EventKind::Assistant),
        "system" | "developer" => Some(EventKind::Meta),
        "tool" | "function" => Some(EventKind::ToolResult),
        _ => None,
    }
}

fn kind_from_type(record_type: &str) -> Option<EventKind> {
    let t = record_type.to_ascii_lowercase();
    if t.contains("tool_result") || t.contains("tool_output") || t.contains("call_output") {
        Some(EventKind::ToolResult)
    } else if t.contains("tool_use") || t.contains("tool_call") || t.contains("function_call") {
        Some(EventKind::ToolCall)
    } else if t.contains("error") {
        Some(EventKind::Error)
    } else if t.contains("user") || t.contains("human") {
        Some(EventKind::User)
    } else if t.contains("assistant") || t.contains("gemini") || t.contains("agent") {
        Some(EventKind::Assistant)
    } else if t == TOKEN_COUNT_SENTINEL || t.contains("system") || t.contains("summary") {
        Some(EventKind::Meta)
    } else {
        None
    }
}

pub fn parse(candidate: &FileCandidate) -> Option<RawParsedSession> {
    let records = json::read_records(&candidate.path)?;

    let mut session = empty_session(candidate, String::new());
    let mut session_id: Option<String> = None;
    let mut tracker = CumulativeTracker::new();

    for record in records.iter().filter(|r| r.is_object()) {
        let metadata = &mut session.metadata;
        set_once(&mut session_id, first_str(record, SESSION_ID_KEYS));
        set_once(&mut metadata.cwd, first_str(record, CWD_KEYS));
        set_once(&mut metadata.git_branch, first_str(record, &["gitBranch", "git_branch", "git.branch", "branch"]));
        set_once(&mut metadata.cli_version, first_str(record, &["version", "cli_version", "cliVersion"]));
        set_once(&mut metadata.title, first_str(record, &["title", "sessionTitle"]));

        let record_type = first_str(record, TYPE_KEYS);
        let is_token_count = ["type", "payload.type"]
            .iter()
            .any(|p| json::path(record, p).and_then(Value::as_str) == Some(TOKEN_COUNT_SENTINEL));

        let model = first_str(record, MODEL_KEYS);
        let kind = first_str(record, ROLE_KEYS)
            .and_then(kind_from_role)
            .or_else(|| record_type.and_then(kind_from_type));
        if kind == Some(EventKind::Assistant) {
            set_once(&mut metadata.model, model);
        }

        let usage = if is_token_count {
            let total_value = first_value(record, CUMULATIVE_USAGE_KEYS);
            let total = total_value.and_then(resolve_usage);
            let last = first_value(record, LAST_USAGE_KEYS).and_then(resolve_usage);
            let inclusive = total_value.is_some_and(counts_are_inclusive);
            total
                .and_then(|total| tracker.token_delta(total, last))
                .map(|delta| if inclusive { codex::to_canonical(delta) } else { delta })
                .map(|delta| delta.to_value())
        } else {
            first_value(record, USAGE_KEYS)
                .filter(|u| resolve_usage(u).is_some())
                .cloned()
        };

        let cost_usd = match first_f64(record, CUMULATIVE_COST_KEYS) {
            Some(total) => Some(tracker.cost_delta(total)),
            None => first_f64(record, COST_KEYS),
        };

        let text = TEXT_KEYS
            .iter()
            .filter_map(|key| json::path(record, key))
            .find_map(json::extract_text);

        let kind = match kind {
            Some(kind) => kind,
            None if usage.is_some() || cost_usd.is_some() => EventKind::Meta,
            // Headers and bookkeeping records only contribute metadata
            None => continue,
        };

        let mut raw = event(kind, first_value(record, TIMESTAMP_KEYS));
        raw.raw_id = first_str(record, ID_KEYS).map(str::to_string);
        raw.role = first_str(record, ROLE_KEYS).map(str::to_string);
        raw.parent_id = first_str(record, &["parentUuid", "parentId", "parent_id", "parentID"]).map(str::to_string);
        raw.text = text;
        raw.model = model.map(str::to_string);
        raw.usage = usage;
        raw.cost_usd = cost_usd;
        raw.is_delta = json::is_delta_record(record);
        if matches!(kind, EventKind::ToolCall | EventKind::ToolResult) {
            raw.tool_name = first_str(record, &["name", "tool_name", "toolName", "payload.name"]).map(str::to_string);
            let call_id = first_str(record, &["call_id", "tool_use_id", "toolCallId", "payload.call_id"]);
            if let Some(call_id) = call_id {
                raw.raw_id = Some(call_id.to_string());
                raw.message_id = Some(call_id.to_string());
                if kind == EventKind::ToolResult {
                    raw.parent_id = Some(call_id.to_string());
                }
            }
        }
        session.events.push(raw);
    }

    session.session_id = session_id.unwrap_or_else(|| json::session_id_from_path(&candidate.path));
    Some(session)
}
