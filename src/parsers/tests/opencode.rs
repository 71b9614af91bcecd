use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use super::{candidate, normalize};
use crate::parsers::opencode::parse;
use crate::types::{EventKind, Source};

fn write(path: PathBuf, contents: &str) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

fn build_storage(storage: &Path) -> PathBuf {
    let session = write(
        storage.join("session/proj-hash/ses_123.json"),
        r#"{"id":"ses_123","version":"0.9.1","projectID":"proj-hash","directory":"/home/me/src/tool","title":"Add caching","time":{"created":1751364000000,"updated":1751364100000}}"#,
    );

    // File names sort opposite to creation time
    write(
        storage.join("message/ses_123/msg_b.json"),
        r#"{"id":"msg_b","sessionID":"ses_123","role":"user","time":{"created":1751364000000}}"#,
    );
    write(
        storage.join("message/ses_123/msg_a.json"),
        r#"{"id":"msg_a","sessionID":"ses_123","role":"assistant","parentID":"msg_b","modelID":"claude-sonnet-4-20250514","providerID":"anthropic","cost":0.042,"tokens":{"input":500,"output":80,"reasoning":0,"cache":{"read":2000,"write":100}},"time":{"created":1751364005000,"completed":1751364009000}}"#,
    );

    write(
        storage.join("part/msg_b/prt_1.json"),
        r#"{"id":"prt_1","messageID":"msg_b","type":"text","text":"Add a cache layer"}"#,
    );
    write(
        storage.join("part/msg_b/prt_2.json"),
        r#"{"id":"prt_2","messageID":"msg_b","type":"text","text":"<file>injected</file>","synthetic":true}"#,
    );
    write(
        storage.join("part/msg_a/prt_3.json"),
        r#"{"id":"prt_3","messageID":"msg_a","type":"text","text":"Sure."}"#,
    );
    write(
        storage.join("part/msg_a/prt_4.json"),
        r#"{"id":"prt_4","messageID":"msg_a","type":"tool","callID":"toolu_9","tool":"edit","state":{"status":"completed","input":{"filePath":"src/cache.rs"},"output":"edited","time":{"start":1751364006000,"end":1751364007000}}}"#,
    );
    write(
        storage.join("part/msg_a/prt_5.json"),
        r#"{"id":"prt_5","messageID":"msg_a","type":"step-finish","tokens":{"input":500}}"#,
    );

    session
}

#[test]
fn test_parse_opencode_storage_layout() {
    let dir = tempdir().unwrap();
    let session_file = build_storage(&dir.path().join("storage"));
    let raw = parse(&candidate(Source::OpenCode, &session_file)).unwrap();

    assert_eq!(raw.session_id, "ses_123");
    assert_eq!(raw.metadata.title.as_deref(), Some("Add caching"));
    assert_eq!(raw.metadata.cwd.as_deref(), Some("/home/me/src/tool"));
    assert_eq!(raw.metadata.cli_version.as_deref(), Some("0.9.1"));
    assert_eq!(raw.metadata.model.as_deref(), Some("claude-sonnet-4-20250514"));

    let kinds: Vec<EventKind> = raw.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::User,
            EventKind::Assistant,
            EventKind::ToolCall,
            EventKind::ToolResult,
        ]
    );
    // Synthetic parts are not user text
    assert_eq!(raw.events[0].text.as_deref(), Some("Add a cache layer"));
    assert_eq!(raw.events[3].parent_id.as_deref(), Some("toolu_9"));

    let normalized = normalize(raw);
    let session = &normalized.session;
    assert_eq!(session.total_tokens.input_tokens, 500);
    assert_eq!(session.total_tokens.cache_read_tokens, 2000);
    assert_eq!(session.total_tokens.cache_write_tokens, 100);
    assert_eq!(session.total_cost_usd, Some(0.042));
    assert_eq!(session.repo_name.as_deref(), Some("tool"));
    assert_eq!(session.duration_ms, Some(7000));
}

#[test]
fn test_zero_cost_falls_back_to_pricing() {
    let dir = tempdir().unwrap();
    let storage = dir.path().join("storage");
    let session_file = write(
        storage.join("session/p/ses_z.json"),
        r#"{"id":"ses_z","directory":"/w/z"}"#,
    );
    write(
        storage.join("message/ses_z/msg_1.json"),
        r#"{"id":"msg_1","role":"assistant","modelID":"gpt-4o","cost":0,"tokens":{"input":1000000,"output":0,"reasoning":0,"cache":{"read":0,"write":0}},"time":{"created":1751364005000}}"#,
    );
    write(
        storage.join("part/msg_1/prt_1.json"),
        r#"{"id":"prt_1","type":"text","text":"hello"}"#,
    );

    let normalized = normalize(parse(&candidate(Source::OpenCode, &session_file)).unwrap());
    let cost = normalized.session.total_cost_usd.unwrap();
    assert!((cost - 2.5).abs() < 1e-9, "unexpected cost {cost}");
}

#[test]
fn test_session_without_messages_is_empty() {
    let dir = tempdir().unwrap();
    let session_file = write(
        dir.path().join("storage/session/p/ses_empty.json"),
        r#"{"id":"ses_empty","title":"nothing yet"}"#,
    );
    let raw = parse(&candidate(Source::OpenCode, &session_file)).unwrap();
    assert!(raw.events.is_empty());
    assert!(crate::parsers::SessionParser::OpenCode
        .parse(&candidate(Source::OpenCode, &session_file))
        .is_none());
}
