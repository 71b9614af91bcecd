use super::{candidate, jsonl_file, normalize};
use crate::parsers::generic::parse;
use crate::types::{EventKind, Source, TokenUsage};

#[test]
fn test_cumulative_cost_becomes_deltas() {
    let file = jsonl_file(&[
        r#"{"session_id":"gen-1","cwd":"/srv/app","role":"user","content":"start","timestamp":"2025-04-01T08:00:00Z"}"#,
        r#"{"role":"assistant","model":"gpt-4o","content":"one","total_cost_usd":0.015,"timestamp":"2025-04-01T08:00:01Z"}"#,
        r#"{"role":"assistant","model":"gpt-4o","content":"two","total_cost_usd":0.015,"timestamp":"2025-04-01T08:00:02Z"}"#,
        r#"{"role":"assistant","model":"gpt-4o","content":"three","total_cost_usd":0.021,"timestamp":"2025-04-01T08:00:03Z"}"#,
    ]);
    let raw = parse(&candidate(Source::Claude, file.path())).unwrap();

    assert_eq!(raw.session_id, "gen-1");
    let costs: Vec<f64> = raw.events.iter().filter_map(|e| e.cost_usd).collect();
    assert_eq!(costs.len(), 3);
    assert!((costs[0] - 0.015).abs() < 1e-12);
    assert!(costs[1].abs() < 1e-12);
    assert!((costs[2] - 0.006).abs() < 1e-12);

    let normalized = normalize(raw);
    let total = normalized.session.total_cost_usd.unwrap();
    assert!((total - 0.021).abs() < 1e-12);
    assert_eq!(normalized.session.repo_name.as_deref(), Some("app"));
    assert_eq!(normalized.session.model.as_deref(), Some("gpt-4o"));
}

#[test]
fn test_token_count_records_use_cumulative_tracking() {
    let file = jsonl_file(&[
        r#"{"type":"message","role":"user","content":"go","timestamp":1743494400}"#,
        r#"{"type":"token_count","usage":{"prompt_tokens":100,"completion_tokens":10},"timestamp":1743494401}"#,
        r#"{"type":"token_count","usage":{"prompt_tokens":100,"completion_tokens":10},"last_token_usage":{"prompt_tokens":100,"completion_tokens":10},"timestamp":1743494402}"#,
        r#"{"type":"token_count","usage":{"prompt_tokens":250,"completion_tokens":40},"timestamp":1743494403}"#,
    ]);
    let normalized = normalize(parse(&candidate(Source::Codex, file.path())).unwrap());

    // The first snapshot carries no per-turn usage, so only later growth counts
    assert_eq!(
        normalized.session.total_tokens,
        TokenUsage {
            input_tokens: 150,
            output_tokens: 30,
            ..Default::default()
        }
    );
    assert_eq!(
        normalized.events.iter().filter(|e| e.kind == EventKind::Meta).count(),
        3
    );
    assert_eq!(normalized.session.message_count, 1);
}

#[test]
fn test_inclusive_snapshots_split_like_codex() {
    let file = jsonl_file(&[
        r#"{"timestamp":"2025-09-18T00:16:30Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"Hey"}]}}"#,
        r#"{"timestamp":"2025-09-18T00:16:38Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":100,"cached_input_tokens":50,"output_tokens":20,"reasoning_output_tokens":10},"last_token_usage":{"input_tokens":100,"cached_input_tokens":50,"output_tokens":20,"reasoning_output_tokens":10}}}}"#,
        r#"{"timestamp":"2025-09-18T00:16:39Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":100,"cached_input_tokens":50,"output_tokens":20,"reasoning_output_tokens":10},"last_token_usage":{"input_tokens":100,"cached_input_tokens":50,"output_tokens":20,"reasoning_output_tokens":10}}}}"#,
        r#"{"timestamp":"2025-09-18T00:16:40Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":170,"cached_input_tokens":80,"output_tokens":35,"reasoning_output_tokens":15}}}}"#,
    ]);
    let normalized = normalize(parse(&candidate(Source::Codex, file.path())).unwrap());

    assert_eq!(
        normalized.session.total_tokens,
        TokenUsage {
            input_tokens: 90,
            output_tokens: 20,
            cache_read_tokens: 80,
            cache_write_tokens: 0,
            reasoning_tokens: 15,
        }
    );
}

#[test]
fn test_session_document_with_messages() {
    let mut file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
    std::io::Write::write_all(
        &mut file,
        br#"{"sessionId":"doc-1","title":"From a document","messages":[
            {"type":"user","content":[{"type":"text","text":"hello"}],"timestamp":"2025-04-02T10:00:00Z"},
            {"type":"gemini","content":"hi","model":"gemini-2.5-flash","tokens":{"input":10,"output":5},"timestamp":"2025-04-02T10:00:01Z"},
            {"type":"tool_call","name":"read_file","call_id":"c1","timestamp":"2025-04-02T10:00:02Z"},
            {"type":"tool_result","call_id":"c1","content":"file body","timestamp":"2025-04-02T10:00:03Z"}
        ]}"#,
    )
    .unwrap();
    let raw = parse(&candidate(Source::Gemini, file.path())).unwrap();

    assert_eq!(raw.session_id, "doc-1");
    assert_eq!(raw.metadata.title.as_deref(), Some("From a document"));
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
    assert_eq!(raw.events[3].parent_id.as_deref(), Some("c1"));
    assert_eq!(raw.events[2].message_id, raw.events[3].message_id);

    let normalized = normalize(raw);
    assert_eq!(normalized.session.total_tokens.input_tokens, 10);
    assert_eq!(normalized.session.model.as_deref(), Some("gemini-2.5-flash"));
}

#[test]
fn test_records_without_signal_are_skipped() {
    let file = jsonl_file(&[
        r#"{"sessionId":"gen-2","version":"1.2.3"}"#,
        r#"{"foo":"bar"}"#,
        r#"{"role":"user","text":"real message"}"#,
    ]);
    let raw = parse(&candidate(Source::Droid, file.path())).unwrap();

    assert_eq!(raw.events.len(), 1);
    assert_eq!(raw.metadata.cli_version.as_deref(), Some("1.2.3"));
    assert_eq!(raw.events[0].text.as_deref(), Some("real message"));
}
