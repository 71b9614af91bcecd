//! Lenient JSON access shared by every parser.
//!
//! Session files from different tool versions disagree on field names, so
//! lookups take an ordered list of dotted paths and return the first hit.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

/// Deepest nesting `extract_text` will follow.
pub const MAX_TEXT_DEPTH: usize = 8;

/// Decode one JSON document with simd-json.
pub fn parse_slice(bytes: &mut [u8]) -> Option<Value> {
    simd_json::from_slice(bytes).ok()
}

pub fn read_document(path: &Path) -> Option<Value> {
    let mut bytes = fs::read(path).ok()?;
    parse_slice(&mut bytes)
}

/// One value per non-empty line. Malformed lines are skipped.
pub fn read_jsonl(path: &Path) -> Option<Vec<Value>> {
    let bytes = fs::read(path).ok()?;
    Some(split_lines(&bytes, path))
}

fn split_lines(bytes: &[u8], path: &Path) -> Vec<Value> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in bytes.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let mut line = line.to_vec();
        match parse_slice(&mut line) {
            Some(value) => records.push(value),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed JSONL lines");
    }
    records
}

/// Read a file as a record stream, whatever its layout: JSONL, a JSON array,
/// a single object, or a `{..., messages: [...]}` session whose header is
/// yielded first (without `messages`) followed by each message.
pub fn read_records(path: &Path) -> Option<Vec<Value>> {
    let bytes = fs::read(path).ok()?;

    let is_jsonl = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    if !is_jsonl {
        let mut doc = bytes.clone();
        if let Some(value) = parse_slice(&mut doc) {
            return Some(records_from_document(value));
        }
    }

    Some(split_lines(&bytes, path))
}

pub fn records_from_document(doc: Value) -> Vec<Value> {
    match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("messages") {
            Some(Value::Array(messages)) => {
                let mut records = Vec::with_capacity(messages.len() + 1);
                records.push(Value::Object(map));
                records.extend(messages);
                records
            }
            Some(other) => {
                map.insert("messages".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => vec![other],
    }
}

/// Follow a dotted path such as `message.usage`.
pub fn path<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |current, key| current.get(key))
}

/// First non-null value among `paths`.
pub fn first_value<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find(|v| !v.is_null())
}

/// First non-empty string among `paths`.
pub fn first_str<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a str> {
    paths
        .iter()
        .filter_map(|p| path(value, p).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Numbers and numeric strings. Non-finite values are rejected.
pub fn as_f64_lenient(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

pub fn first_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find_map(as_f64_lenient)
}

/// Non-negative integer; negative inputs clamp to zero.
pub fn as_u64_clamped(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if let Some(n) = value.as_i64() {
        return Some(n.max(0) as u64);
    }
    as_f64_lenient(value).map(|n| n.max(0.0) as u64)
}

pub fn first_u64(value: &Value, paths: &[&str]) -> Option<u64> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find_map(as_u64_clamped)
}

pub fn first_bool(value: &Value, paths: &[&str]) -> Option<bool> {
    paths
        .iter()
        .filter_map(|p| path(value, p))
        .find_map(Value::as_bool)
}

/// Concatenated text of a string, a content-block array or a nested object.
/// Returns `None` when nothing textual is found.
pub fn extract_text(value: &Value) -> Option<String> {
    let mut parts = Vec::new();
    collect_text(value, 0, &mut parts);
    let text = parts.join("\n");
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn collect_text(value: &Value, depth: usize, parts: &mut Vec<String>) {
    if depth > MAX_TEXT_DEPTH {
        return;
    }
    match value {
        Value::String(s) => {
            if !s.trim().is_empty() {
                parts.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, depth + 1, parts);
            }
        }
        Value::Object(map) => {
            // Only text-bearing blocks; tool payloads and images are skipped
            if let Some(kind) = map.get("type").and_then(Value::as_str)
                && !matches!(
                    kind,
                    "text" | "input_text" | "output_text" | "summary_text" | "message"
                )
            {
                return;
            }
            for key in ["text", "content", "parts", "message"] {
                if let Some(inner) = map.get(key) {
                    collect_text(inner, depth + 1, parts);
                    return;
                }
            }
        }
        _ => {}
    }
}

/// Streaming-fragment markers: a `type` mentioning delta/partial/chunk, or a
/// `delta` payload, or `isPartial`/`partial` set to true.
pub fn is_delta_record(record: &Value) -> bool {
    let typed = ["type", "payload.type", "event", "kind"]
        .iter()
        .filter_map(|p| path(record, p).and_then(Value::as_str))
        .any(|kind| {
            let kind = kind.to_ascii_lowercase();
            kind.contains("delta") || kind.contains("partial") || kind.contains("chunk")
        });
    typed
        || ["delta", "payload.delta", "data.delta"]
            .iter()
            .any(|p| path(record, p).is_some_and(|v| !v.is_null()))
        || first_bool(record, &["isPartial", "partial", "data.isPartial"]).unwrap_or(false)
}

fn is_uuid(candidate: &str) -> bool {
    let groups: Vec<&str> = candidate.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Trailing UUID of the file stem (`rollout-<ts>-<uuid>`), else the stem.
pub fn session_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if stem.len() >= 36
        && let Some(tail) = stem.get(stem.len() - 36..)
        && is_uuid(tail)
    {
        return tail.to_string();
    }
    stem
}
