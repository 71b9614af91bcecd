use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::NamedTempFile;

use crate::models::PricingResolver;
use crate::normalize::EventNormalizer;
use crate::types::{FileCandidate, NormalizedSession, RawParsedSession, Source};

mod droid;
mod generic;
mod opencode;

pub(super) fn candidate(source: Source, path: &Path) -> FileCandidate {
    FileCandidate {
        path: path.to_path_buf(),
        source,
        mtime_ms: 0,
        size: fs::metadata(path).map(|m| m.len()).unwrap_or(0),
    }
}

pub(super) fn jsonl_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".jsonl").unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

pub(super) fn parsed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub(super) fn normalize(raw: RawParsedSession) -> NormalizedSession {
    let pricing = PricingResolver::new();
    EventNormalizer::new(&pricing).normalize(raw, parsed_at())
}

#[test]
fn fallback_to_generic_parser() {
    // Not a Gemini session document, but the generic parser still finds messages
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    write!(
        file,
        r#"[{{"role":"user","content":"hi there","timestamp":"2025-02-01T09:00:00Z"}},{{"role":"assistant","content":"hello","model":"gemini-2.5-pro","timestamp":"2025-02-01T09:00:02Z"}}]"#
    )
    .unwrap();

    let c = candidate(Source::Gemini, file.path());
    assert!(super::SessionParser::Gemini.parse(&c).is_none());

    let raw = super::parse_with_fallback(&c).expect("generic parser should pick it up");
    assert_eq!(raw.source, Source::Gemini);
    assert_eq!(raw.events.len(), 2);
    assert_eq!(raw.metadata.model.as_deref(), Some("gemini-2.5-pro"));
}

#[test]
fn unreadable_file_yields_nothing() {
    let c = FileCandidate {
        path: Path::new("/definitely/not/here.jsonl").to_path_buf(),
        source: Source::Claude,
        mtime_ms: 0,
        size: 0,
    };
    assert!(super::parse_with_fallback(&c).is_none());
}

#[test]
fn file_without_events_yields_nothing() {
    let file = jsonl_file(&[r#"{"type":"summary","summary":"only a title"}"#, "not json at all"]);
    let c = candidate(Source::Claude, file.path());
    assert!(super::SessionParser::Claude.parse(&c).is_none());
}
