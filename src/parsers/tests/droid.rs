use std::fs;

use tempfile::tempdir;

use super::{candidate, normalize};
use crate::parsers::droid::parse;
use crate::types::{EventKind, Source, TokenUsage};

const SESSION: &str = r#"{"type":"session_start","id":"d6c1a2b3-0000-4000-8000-00000000abcd","title":"Fix flaky test","sessionTitle":"Fix flaky test","cwd":"/home/me/work/api","version":"0.22.3"}
{"type":"message","id":"m1","timestamp":"2025-08-10T14:00:00.000Z","message":{"role":"user","content":[{"type":"text","text":"The login test is flaky"}]}}
{"type":"message","id":"m2","parentId":"m1","timestamp":"2025-08-10T14:00:04.000Z","message":{"role":"assistant","content":[{"type":"text","text":"Let me look."},{"type":"tool_use","id":"call_1","name":"Grep","input":{"pattern":"login"}}]}}
{"type":"message","id":"m3","parentId":"m2","timestamp":"2025-08-10T14:00:05.000Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"call_1","content":"tests/login.rs"}]}}
{"type":"todo_state","id":"t1","timestamp":"2025-08-10T14:00:06.000Z","todos":[{"content":"fix","status":"pending"}]}
"#;

const SETTINGS: &str = r#"{"model":"claude-sonnet-4-5-20250929","reasoningEffort":"none","tokenUsage":{"inputTokens":1200,"outputTokens":300,"cacheCreationTokens":50,"cacheReadTokens":4000,"thinkingTokens":0}}"#;

#[test]
fn test_parse_droid_session_with_settings_companion() {
    let dir = tempdir().unwrap();
    let session_path = dir.path().join("d6c1a2b3-0000-4000-8000-00000000abcd.jsonl");
    fs::write(&session_path, SESSION).unwrap();
    fs::write(
        dir.path().join("d6c1a2b3-0000-4000-8000-00000000abcd.settings.json"),
        SETTINGS,
    )
    .unwrap();

    let raw = parse(&candidate(Source::Droid, &session_path)).unwrap();
    assert_eq!(raw.session_id, "d6c1a2b3-0000-4000-8000-00000000abcd");
    assert_eq!(raw.metadata.title.as_deref(), Some("Fix flaky test"));
    assert_eq!(raw.metadata.model.as_deref(), Some("claude-sonnet-4-5-20250929"));

    let kinds: Vec<EventKind> = raw.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::User,
            EventKind::Assistant,
            EventKind::ToolCall,
            EventKind::ToolResult,
            EventKind::Meta,
            EventKind::Meta,
        ]
    );

    let usage = raw.events.last().unwrap();
    assert_eq!(usage.raw_id.as_deref(), Some("settings-usage"));
    assert_eq!(usage.timestamp, Some(serde_json::json!("2025-08-10T14:00:06.000Z")));

    let normalized = normalize(raw);
    assert_eq!(
        normalized.session.total_tokens,
        TokenUsage {
            input_tokens: 1200,
            output_tokens: 300,
            cache_read_tokens: 4000,
            cache_write_tokens: 50,
            reasoning_tokens: 0,
        }
    );
    assert_eq!(normalized.session.model.as_deref(), Some("claude-sonnet-4-5-20250929"));
    assert_eq!(normalized.session.repo_name.as_deref(), Some("api"));
    assert!(normalized.session.total_cost_usd.is_some());
}

#[test]
fn test_missing_settings_means_unknown_usage() {
    let dir = tempdir().unwrap();
    let session_path = dir.path().join("plain.jsonl");
    fs::write(&session_path, SESSION).unwrap();

    let normalized = normalize(parse(&candidate(Source::Droid, &session_path)).unwrap());
    assert_eq!(normalized.session.total_tokens, TokenUsage::default());
    assert_eq!(normalized.session.total_cost_usd, None);
    assert_eq!(normalized.session.model, None);
    assert_eq!(normalized.session.message_count, 2);
}
