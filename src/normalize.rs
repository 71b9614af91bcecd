//! Raw parser output to canonical sessions and events.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::models::PricingResolver;
use crate::parsers::json::{as_f64_lenient, first_u64};
use crate::types::{
    CanonicalEvent, EventKind, NormalizedSession, RawParsedSession, Session, TokenUsage,
};

/// Epoch values below this are seconds, at or above it milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const TITLE_MAX_CHARS: usize = 200;

const INPUT_KEYS: &[&str] = &[
    "input_tokens",
    "inputTokens",
    "prompt_tokens",
    "promptTokens",
    "promptTokenCount",
    "input",
];
const OUTPUT_KEYS: &[&str] = &[
    "output_tokens",
    "outputTokens",
    "completion_tokens",
    "completionTokens",
    "candidatesTokenCount",
    "output",
];
const CACHE_READ_KEYS: &[&str] = &[
    "cache_read_tokens",
    "cache_read_input_tokens",
    "cacheReadInputTokens",
    "cacheReadTokens",
    "cached_input_tokens",
    "cachedContentTokenCount",
    "cached",
    "cache.read",
];
const CACHE_WRITE_KEYS: &[&str] = &[
    "cache_write_tokens",
    "cache_creation_input_tokens",
    "cacheCreationInputTokens",
    "cacheCreationTokens",
    "cacheWriteTokens",
    "cache.write",
];
const REASONING_KEYS: &[&str] = &[
    "reasoning_tokens",
    "reasoning_output_tokens",
    "reasoningTokens",
    "thinkingTokens",
    "thoughtsTokenCount",
    "thoughts",
    "reasoning",
];

/// Map whatever usage object a tool wrote onto [`TokenUsage`].
///
/// Returns `None` when no known token field is present, so "unknown" stays
/// distinguishable from zero. Negative counts clamp to zero.
pub fn resolve_usage(value: &Value) -> Option<TokenUsage> {
    if !value.is_object() {
        return None;
    }
    let input = first_u64(value, INPUT_KEYS);
    let output = first_u64(value, OUTPUT_KEYS);
    let cache_read = first_u64(value, CACHE_READ_KEYS);
    let cache_write = first_u64(value, CACHE_WRITE_KEYS);
    let reasoning = first_u64(value, REASONING_KEYS);

    if [input, output, cache_read, cache_write, reasoning]
        .iter()
        .all(Option::is_none)
    {
        return None;
    }
    Some(TokenUsage {
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
        cache_read_tokens: cache_read.unwrap_or(0),
        cache_write_tokens: cache_write.unwrap_or(0),
        reasoning_tokens: reasoning.unwrap_or(0),
    })
}

fn from_epoch(number: f64) -> Option<DateTime<Utc>> {
    let millis = if number.abs() < EPOCH_MILLIS_THRESHOLD {
        number * 1000.0
    } else {
        number
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// ISO-8601 / RFC 3339 strings, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (read as
/// UTC), and epoch numbers or numeric strings in seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            as_f64_lenient(value).and_then(from_epoch)
        }
        Value::Number(_) => as_f64_lenient(value).and_then(from_epoch),
        _ => None,
    }
}

/// `<session>:event:<raw id or index>`; already-scoped ids pass through.
pub fn scope_event_id(session_id: &str, raw_id: Option<&str>, index: usize) -> String {
    let prefix = format!("{session_id}:event:");
    match raw_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) if id.starts_with(&prefix) => id.to_string(),
        Some(id) => format!("{prefix}{id}"),
        None => format!("{prefix}{index}"),
    }
}

/// Last segment of a working directory path.
pub fn repo_name(cwd: &str) -> Option<String> {
    cwd.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Untimestamped events sort after all timestamped ones.
fn timestamp_order(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Most frequent model; ties go to the one seen first.
fn majority_model<'a>(models: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut tally: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, model) in models.enumerate() {
        tally.entry(model).or_insert((0, position)).0 += 1;
    }
    tally
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(model, _)| model.to_string())
}

pub struct EventNormalizer<'a> {
    pricing: &'a PricingResolver,
}

impl<'a> EventNormalizer<'a> {
    pub fn new(pricing: &'a PricingResolver) -> Self {
        Self { pricing }
    }

    /// Pure: the same input always yields the same output apart from `parsed_at`.
    pub fn normalize(&self, raw: RawParsedSession, parsed_at: DateTime<Utc>) -> NormalizedSession {
        let RawParsedSession {
            session_id,
            source,
            file_path,
            file_size_bytes,
            metadata,
            events: raw_events,
        } = raw;

        let mut events: Vec<CanonicalEvent> = raw_events
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                let timestamp = event.timestamp.as_ref().and_then(parse_timestamp);
                let tokens = event.usage.as_ref().and_then(resolve_usage);
                let cost_usd = event
                    .cost_usd
                    .filter(|cost| cost.is_finite())
                    .map(|cost| cost.max(0.0))
                    .or_else(|| {
                        let model = event.model.as_deref().or(metadata.model.as_deref())?;
                        self.pricing.cost(tokens.as_ref()?, model)
                    });

                CanonicalEvent {
                    id: scope_event_id(&session_id, event.raw_id.as_deref(), index),
                    session_id: session_id.clone(),
                    kind: event.kind,
                    timestamp,
                    role: event.role,
                    text: event.text,
                    tool_name: event.tool_name,
                    tool_input: event.tool_input,
                    tool_output: event.tool_output,
                    model: event.model,
                    parent_id: event.parent_id,
                    message_id: event.message_id,
                    is_delta: event.is_delta,
                    tokens,
                    cost_usd,
                }
            })
            .collect();

        // Stable: ties keep file order
        events.sort_by(|a, b| timestamp_order(&a.timestamp, &b.timestamp));
        dedupe_ids(&mut events);

        let session = roll_up(
            &events,
            Session {
                id: session_id,
                source,
                file_path,
                file_size_bytes,
                start_time: None,
                end_time: None,
                duration_ms: None,
                title: metadata.title,
                model: metadata.model,
                repo_name: metadata.cwd.as_deref().and_then(repo_name),
                cwd: metadata.cwd,
                git_branch: metadata.git_branch,
                cli_version: metadata.cli_version,
                event_count: 0,
                message_count: 0,
                tool_call_count: 0,
                total_tokens: TokenUsage::default(),
                total_cost_usd: None,
                is_housekeeping: false,
                parsed_at,
            },
        );

        NormalizedSession { session, events }
    }
}

/// First occurrence keeps its id; later ones get `:dup:1`, `:dup:2`, ...
fn dedupe_ids(events: &mut [CanonicalEvent]) {
    let mut emitted: HashSet<String> = HashSet::with_capacity(events.len());
    let mut dup_counts: HashMap<String, usize> = HashMap::new();

    for event in events.iter_mut() {
        if emitted.insert(event.id.clone()) {
            continue;
        }
        let counter = dup_counts.entry(event.id.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}:dup:{}", event.id, counter);
            if emitted.insert(candidate.clone()) {
                event.id = candidate;
                break;
            }
        }
    }
}

fn roll_up(events: &[CanonicalEvent], mut session: Session) -> Session {
    // Events are sorted, so the bounds are the first and last timestamps
    session.start_time = events.iter().find_map(|e| e.timestamp);
    session.end_time = events.iter().rev().find_map(|e| e.timestamp);
    session.duration_ms = match (session.start_time, session.end_time) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
        _ => None,
    };

    session.event_count = events.len() as u64;
    session.message_count = events
        .iter()
        .filter(|e| e.kind.is_message() && !e.is_delta)
        .count() as u64;
    session.tool_call_count = events
        .iter()
        .filter(|e| e.kind == EventKind::ToolCall)
        .count() as u64;

    for tokens in events.iter().filter_map(|e| e.tokens) {
        session.total_tokens += tokens;
    }
    session.total_cost_usd = events
        .iter()
        .filter_map(|e| e.cost_usd)
        .fold(None, |total, cost| Some(total.unwrap_or(0.0) + cost));

    let assistant_models = events
        .iter()
        .filter(|e| e.kind == EventKind::Assistant)
        .filter_map(|e| e.model.as_deref());
    if let Some(model) = majority_model(assistant_models) {
        session.model = Some(model);
    }

    if session.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        session.title = events
            .iter()
            .filter(|e| e.kind == EventKind::User)
            .filter_map(|e| e.text.as_deref())
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(|text| truncate_chars(text, TITLE_MAX_CHARS));
    }

    session.is_housekeeping =
        session.message_count == 0 || events.iter().all(|e| e.kind == EventKind::Meta);
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawEvent, SessionMetadata, Source};
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::PathBuf;

    fn raw_session(events: Vec<RawEvent>) -> RawParsedSession {
        RawParsedSession {
            session_id: "s1".to_string(),
            source: Source::Codex,
            file_path: PathBuf::from("/tmp/s1.jsonl"),
            file_size_bytes: 10,
            metadata: SessionMetadata {
                cwd: Some("/home/me/projects/ledger/".to_string()),
                ..Default::default()
            },
            events,
        }
    }

    fn raw(kind: EventKind, id: Option<&str>, ts: Option<Value>) -> RawEvent {
        RawEvent {
            raw_id: id.map(str::to_string),
            timestamp: ts,
            ..RawEvent::new(kind)
        }
    }

    fn parsed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn timestamps_in_every_shape() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(&json!("2025-01-02T03:04:05Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-01-02T05:04:05+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-01-02 03:04:05")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis().to_string())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[test]
    fn usage_aliases_and_unknown() {
        let claude = json!({"input_tokens": 5, "output_tokens": 7, "cache_read_input_tokens": 11, "cache_creation_input_tokens": 13});
        assert_eq!(
            resolve_usage(&claude),
            Some(TokenUsage {
                input_tokens: 5,
                output_tokens: 7,
                cache_read_tokens: 11,
                cache_write_tokens: 13,
                reasoning_tokens: 0,
            })
        );

        let camel = json!({"inputTokens": 1, "thinkingTokens": 2, "cache": {"read": 3}});
        let usage = resolve_usage(&camel).unwrap();
        assert_eq!((usage.input_tokens, usage.reasoning_tokens, usage.cache_read_tokens), (1, 2, 3));

        assert_eq!(resolve_usage(&json!({"foo": 1})), None);
        assert_eq!(resolve_usage(&json!(42)), None);
        assert_eq!(resolve_usage(&json!({"input_tokens": -40})).unwrap().input_tokens, 0);
    }

    #[test]
    fn event_ids_are_scoped_once() {
        assert_eq!(scope_event_id("s1", Some("abc"), 3), "s1:event:abc");
        assert_eq!(scope_event_id("s1", None, 3), "s1:event:3");
        assert_eq!(scope_event_id("s1", Some("s1:event:abc"), 3), "s1:event:abc");
    }

    #[test]
    fn ordering_puts_untimestamped_last_and_keeps_file_order() {
        let events = vec![
            raw(EventKind::User, Some("late"), Some(json!("2025-01-01T00:00:10Z"))),
            raw(EventKind::Meta, Some("none-a"), None),
            raw(EventKind::Assistant, Some("early"), Some(json!("2025-01-01T00:00:01Z"))),
            raw(EventKind::Meta, Some("none-b"), None),
            raw(EventKind::Assistant, Some("tie"), Some(json!("2025-01-01T00:00:10Z"))),
        ];
        let normalizer_prices = PricingResolver::new();
        let out = EventNormalizer::new(&normalizer_prices).normalize(raw_session(events), parsed_at());

        let ids: Vec<&str> = out.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["s1:event:early", "s1:event:late", "s1:event:tie", "s1:event:none-a", "s1:event:none-b"]
        );
        assert_eq!(out.session.duration_ms, Some(9_000));
    }

    #[test]
    fn duplicate_ids_get_dup_suffix_in_order() {
        let ts = Some(json!("2025-01-01T00:00:00Z"));
        let events = vec![
            raw(EventKind::User, Some("x"), ts.clone()),
            raw(EventKind::Assistant, Some("x"), ts.clone()),
            raw(EventKind::Assistant, Some("x"), ts.clone()),
        ];
        let prices = PricingResolver::new();
        let out = EventNormalizer::new(&prices).normalize(raw_session(events), parsed_at());
        let ids: Vec<&str> = out.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s1:event:x", "s1:event:x:dup:1", "s1:event:x:dup:2"]);
    }

    #[test]
    fn tool_call_and_result_share_message_id() {
        let mut call = raw(EventKind::ToolCall, Some("call_1"), Some(json!("2025-01-01T00:00:00Z")));
        call.message_id = Some("call_1".to_string());
        let mut result = raw(EventKind::ToolResult, Some("call_1"), Some(json!("2025-01-01T00:00:01Z")));
        result.message_id = Some("call_1".to_string());
        result.parent_id = Some("call_1".to_string());

        let prices = PricingResolver::new();
        let out = EventNormalizer::new(&prices).normalize(raw_session(vec![call, result]), parsed_at());
        let (call, result) = (&out.events[0], &out.events[1]);
        assert_ne!(call.id, result.id);
        assert_eq!(call.message_id, result.message_id);
        assert_eq!(result.parent_id.as_deref(), Some("call_1"));
        assert_eq!(out.session.tool_call_count, 1);
    }

    #[test]
    fn roll_up_fields() {
        let mut user = raw(EventKind::User, Some("u"), Some(json!("2025-01-01T00:00:00Z")));
        user.text = Some("x".repeat(300));
        let mut a1 = raw(EventKind::Assistant, Some("a1"), Some(json!("2025-01-01T00:00:05Z")));
        a1.model = Some("gpt-5".to_string());
        a1.usage = Some(json!({"input_tokens": 1000, "output_tokens": 100}));
        let mut a2 = raw(EventKind::Assistant, Some("a2"), Some(json!("2025-01-01T00:00:06Z")));
        a2.model = Some("claude-sonnet-4".to_string());
        a2.cost_usd = Some(0.5);
        let mut delta = raw(EventKind::Assistant, Some("d"), Some(json!("2025-01-01T00:00:07Z")));
        delta.is_delta = true;

        let prices = PricingResolver::new();
        let out = EventNormalizer::new(&prices).normalize(raw_session(vec![user, a1, a2, delta]), parsed_at());
        let session = &out.session;

        assert_eq!(session.message_count, 3);
        assert_eq!(session.event_count, 4);
        // One vote each: the earliest wins
        assert_eq!(session.model.as_deref(), Some("gpt-5"));
        assert_eq!(session.title.as_ref().map(|t| t.chars().count()), Some(200));
        assert_eq!(session.repo_name.as_deref(), Some("ledger"));
        assert_eq!(session.total_tokens.input_tokens, 1000);
        let expected = 0.5 + (1000.0 * 1.25 + 100.0 * 10.0) / 1_000_000.0;
        assert!((session.total_cost_usd.unwrap() - expected).abs() < 1e-12);
        assert!(!session.is_housekeeping);
    }

    #[test]
    fn unknown_cost_stays_none() {
        let mut a = raw(EventKind::Assistant, Some("a"), None);
        a.model = Some("mystery-model".to_string());
        a.usage = Some(json!({"input_tokens": 10}));
        let prices = PricingResolver::new();
        let out = EventNormalizer::new(&prices).normalize(raw_session(vec![a]), parsed_at());
        assert_eq!(out.events[0].cost_usd, None);
        assert_eq!(out.session.total_cost_usd, None);
        assert_eq!(out.session.start_time, None);
        assert_eq!(out.session.duration_ms, None);
    }

    #[test]
    fn meta_only_session_is_housekeeping() {
        let events = vec![
            raw(EventKind::Meta, None, Some(json!("2025-01-01T00:00:00Z"))),
            raw(EventKind::ToolCall, None, None),
        ];
        let prices = PricingResolver::new();
        let out = EventNormalizer::new(&prices).normalize(raw_session(events), parsed_at());
        assert_eq!(out.session.message_count, 0);
        assert!(out.session.is_housekeeping);
    }

    #[test]
    fn normalizing_twice_differs_only_in_parsed_at() {
        let mut a = raw(EventKind::Assistant, Some("a"), Some(json!(1_735_689_600)));
        a.model = Some("gpt-5".to_string());
        a.usage = Some(json!({"input_tokens": 10}));
        let session = raw_session(vec![raw(EventKind::User, None, None), a]);

        let prices = PricingResolver::new();
        let normalizer = EventNormalizer::new(&prices);
        let first = normalizer.normalize(session.clone(), parsed_at());
        let mut second = normalizer.normalize(session, Utc::now());

        assert_eq!(first.events, second.events);
        second.session.parsed_at = first.session.parsed_at;
        assert_eq!(first.session, second.session);
    }
}
