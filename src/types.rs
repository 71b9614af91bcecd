use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the supported AI coding CLI tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Claude,
    Codex,
    Gemini,
    #[serde(rename = "opencode")]
    OpenCode,
    Droid,
    Copilot,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Claude,
        Source::Codex,
        Source::Gemini,
        Source::OpenCode,
        Source::Droid,
        Source::Copilot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Claude => "claude",
            Source::Codex => "codex",
            Source::Gemini => "gemini",
            Source::OpenCode => "opencode",
            Source::Droid => "droid",
            Source::Copilot => "copilot",
        }
    }

}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claude_code" => Ok(Source::Claude),
            "codex" | "codex-cli" => Ok(Source::Codex),
            "gemini" | "gemini-cli" => Ok(Source::Gemini),
            "opencode" | "open-code" => Ok(Source::OpenCode),
            "droid" | "factory" => Ok(Source::Droid),
            "copilot" | "copilot-cli" => Ok(Source::Copilot),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// A discovered file eligible for parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub source: Source,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime_ms: i64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub model: Option<String>,
    pub cli_version: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Error,
    Meta,
}

impl EventKind {
    pub fn is_message(&self) -> bool {
        matches!(self, EventKind::User | EventKind::Assistant)
    }
}

/// Parser-produced event, before normalization.
///
/// `timestamp` and `usage` stay as raw JSON: timestamps may be ISO strings or
/// epoch numbers, and usage objects use whatever field names the source tool
/// happened to write. The normalizer resolves both.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub raw_id: Option<String>,
    pub kind: EventKind,
    pub timestamp: Option<Value>,
    pub role: Option<String>,
    pub text: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub model: Option<String>,
    pub parent_id: Option<String>,
    pub message_id: Option<String>,
    pub is_delta: bool,
    pub usage: Option<Value>,
    pub cost_usd: Option<f64>,
}

impl RawEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            raw_id: None,
            kind,
            timestamp: None,
            role: None,
            text: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            model: None,
            parent_id: None,
            message_id: None,
            is_delta: false,
            usage: None,
            cost_usd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawParsedSession {
    pub session_id: String,
    pub source: Source,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub metadata: SessionMetadata,
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_write_tokens)
            .saturating_add(self.reasoning_tokens)
    }

    /// Render with canonical field names so the usage resolver reads it back unchanged.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "input_tokens": self.input_tokens,
            "output_tokens": self.output_tokens,
            "cache_read_tokens": self.cache_read_tokens,
            "cache_write_tokens": self.cache_write_tokens,
            "reasoning_tokens": self.reasoning_tokens,
        })
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(rhs.cache_read_tokens);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(rhs.cache_write_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(rhs.reasoning_tokens);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    pub session_id: String,
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub role: Option<String>,
    pub text: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub model: Option<String>,
    pub parent_id: Option<String>,
    pub message_id: Option<String>,
    pub is_delta: bool,
    pub tokens: Option<TokenUsage>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub source: Source,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub title: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub repo_name: Option<String>,
    pub git_branch: Option<String>,
    pub cli_version: Option<String>,
    pub event_count: u64,
    pub message_count: u64,
    pub tool_call_count: u64,
    pub total_tokens: TokenUsage,
    pub total_cost_usd: Option<f64>,
    pub is_housekeeping: bool,
    pub parsed_at: DateTime<Utc>,
}

/// A session together with its ordered canonical events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSession {
    pub session: Session,
    pub events: Vec<CanonicalEvent>,
}

/// Additive counters for one slice (source, model, repo or whole day) of a day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBucket {
    pub sessions: u64,
    pub events: u64,
    pub messages: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub reasoning_tokens: u64,
    pub cost_usd: f64,
    /// Sessions whose cost could not be resolved at all
    pub unpriced_sessions: u64,
    pub duration_ms: u64,
}

impl UsageBucket {
    pub fn from_session(session: &Session) -> Self {
        Self {
            sessions: 1,
            events: session.event_count,
            messages: session.message_count,
            tool_calls: session.tool_call_count,
            input_tokens: session.total_tokens.input_tokens,
            output_tokens: session.total_tokens.output_tokens,
            cache_read_tokens: session.total_tokens.cache_read_tokens,
            cache_write_tokens: session.total_tokens.cache_write_tokens,
            reasoning_tokens: session.total_tokens.reasoning_tokens,
            cost_usd: session.total_cost_usd.unwrap_or(0.0),
            unpriced_sessions: u64::from(session.total_cost_usd.is_none()),
            duration_ms: session.duration_ms.unwrap_or(0).max(0) as u64,
        }
    }
}

impl AddAssign<&UsageBucket> for UsageBucket {
    fn add_assign(&mut self, rhs: &UsageBucket) {
        self.sessions = self.sessions.saturating_add(rhs.sessions);
        self.events = self.events.saturating_add(rhs.events);
        self.messages = self.messages.saturating_add(rhs.messages);
        self.tool_calls = self.tool_calls.saturating_add(rhs.tool_calls);
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(rhs.cache_read_tokens);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(rhs.cache_write_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(rhs.reasoning_tokens);
        self.cost_usd += rhs.cost_usd;
        self.unpriced_sessions = self.unpriced_sessions.saturating_add(rhs.unpriced_sessions);
        self.duration_ms = self.duration_ms.saturating_add(rhs.duration_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayStats {
    pub date: String,
    pub totals: UsageBucket,
    pub by_source: BTreeMap<String, UsageBucket>,
    pub by_model: BTreeMap<String, UsageBucket>,
    pub by_repo: BTreeMap<String, UsageBucket>,
}

/// Date ("YYYY-MM-DD") -> stats for that day.
pub type DailyStore = BTreeMap<String, DayStats>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStateEntry {
    pub source: Source,
    pub file_size: u64,
    pub mtime_ms: i64,
    pub parsed_at: DateTime<Utc>,
    /// False when every parser gave up on the file. The file is still not
    /// retried until it changes or a full scan is forced.
    #[serde(default = "default_parsed_ok")]
    pub parsed_ok: bool,
}

fn default_parsed_ok() -> bool {
    true
}

impl ScanStateEntry {
    pub fn matches(&self, candidate: &FileCandidate) -> bool {
        self.file_size == candidate.size && self.mtime_ms == candidate.mtime_ms
    }
}

/// File path -> scan bookkeeping.
pub type ScanState = BTreeMap<PathBuf, ScanStateEntry>;
