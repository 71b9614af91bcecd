//! Per-source session parsers.
//!
//! Each parser turns one discovered file into a [`RawParsedSession`], or
//! `None` when the file holds nothing it recognizes. [`parse_with_fallback`]
//! gives the lenient [`SessionParser::Generic`] parser a second try.

use serde_json::Value;
use tracing::debug;

use crate::types::{EventKind, FileCandidate, RawEvent, RawParsedSession, SessionMetadata, Source};

pub mod claude;
pub mod codex;
pub mod copilot;
pub mod cumulative;
pub mod droid;
pub mod gemini;
pub mod generic;
pub mod json;
pub mod opencode;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionParser {
    Claude,
    Codex,
    Gemini,
    OpenCode,
    Droid,
    Copilot,
    Generic,
}

impl SessionParser {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::Claude => SessionParser::Claude,
            Source::Codex => SessionParser::Codex,
            Source::Gemini => SessionParser::Gemini,
            Source::OpenCode => SessionParser::OpenCode,
            Source::Droid => SessionParser::Droid,
            Source::Copilot => SessionParser::Copilot,
        }
    }

    /// `None` when the file cannot be read or yields no events.
    pub fn parse(&self, candidate: &FileCandidate) -> Option<RawParsedSession> {
        let session = match self {
            SessionParser::Claude => claude::parse(candidate),
            SessionParser::Codex => codex::parse(candidate),
            SessionParser::Gemini => gemini::parse(candidate),
            SessionParser::OpenCode => opencode::parse(candidate),
            SessionParser::Droid => droid::parse(candidate),
            SessionParser::Copilot => copilot::parse(candidate),
            SessionParser::Generic => generic::parse(candidate),
        }?;
        (!session.events.is_empty()).then_some(session)
    }
}

/// The source's own parser, then the generic one.
pub fn parse_with_fallback(candidate: &FileCandidate) -> Option<RawParsedSession> {
    SessionParser::for_source(candidate.source)
        .parse(candidate)
        .or_else(|| {
            debug!(
                path = %candidate.path.display(),
                source = %candidate.source,
                "source parser found nothing, trying generic parser"
            );
            SessionParser::Generic.parse(candidate)
        })
}

pub(crate) fn empty_session(candidate: &FileCandidate, session_id: String) -> RawParsedSession {
    RawParsedSession {
        session_id,
        source: candidate.source,
        file_path: candidate.path.clone(),
        file_size_bytes: candidate.size,
        metadata: SessionMetadata::default(),
        events: Vec::new(),
    }
}

/// Fill `slot` if it is still empty.
pub(crate) fn set_once(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none()
        && let Some(value) = value.map(str::trim).filter(|v| !v.is_empty())
    {
        *slot = Some(value.to_string());
    }
}

pub(crate) fn event(kind: EventKind, timestamp: Option<&Value>) -> RawEvent {
    RawEvent {
        timestamp: timestamp.filter(|t| !t.is_null()).cloned(),
        ..RawEvent::new(kind)
    }
}

/// Tool arguments often arrive as a JSON-encoded string.
pub(crate) fn decode_arguments(arguments: &Value) -> Value {
    if let Value::String(s) = arguments {
        let mut bytes = s.as_bytes().to_vec();
        if let Some(decoded @ (Value::Object(_) | Value::Array(_))) = json::parse_slice(&mut bytes) {
            return decoded;
        }
    }
    arguments.clone()
}
