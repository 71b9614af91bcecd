//! Model price table and cost resolution.
//!
//! Prices are USD per one million tokens. The static table is always
//! available; a remote LiteLLM-style table can be layered on top of it with
//! [`PricingResolver::refresh`].

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use phf::phf_map;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::reqwest_simd_json::ResponseSimdJsonExt;
use crate::types::TokenUsage;

/// Per-bucket prices for one model, USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub cache_read_per_1m: f64,
    pub cache_write_per_1m: f64,
    pub reasoning_per_1m: f64,
}

impl ModelPrice {
    /// Reasoning tokens are billed at the output rate by every provider we track.
    pub const fn new(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Self {
        Self {
            input_per_1m: input,
            output_per_1m: output,
            cache_read_per_1m: cache_read,
            cache_write_per_1m: cache_write,
            reasoning_per_1m: output,
        }
    }

    pub fn cost(&self, tokens: &TokenUsage) -> f64 {
        (tokens.input_tokens as f64 * self.input_per_1m
            + tokens.output_tokens as f64 * self.output_per_1m
            + tokens.cache_read_tokens as f64 * self.cache_read_per_1m
            + tokens.cache_write_tokens as f64 * self.cache_write_per_1m
            + tokens.reasoning_tokens as f64 * self.reasoning_per_1m)
            / 1_000_000.0
    }
}

static MODEL_INDEX: phf::Map<&'static str, ModelPrice> = phf_map! {
    // OpenAI Models
    "o4-mini" => ModelPrice::new(1.1, 4.4, 0.275, 0.0),
    "o3" => ModelPrice::new(2.0, 8.0, 0.5, 0.0),
    "o3-pro" => ModelPrice::new(20.0, 80.0, 0.0, 0.0),
    "o3-mini" => ModelPrice::new(1.1, 4.4, 0.55, 0.0),
    "o1" => ModelPrice::new(15.0, 60.0, 7.5, 0.0),
    "o1-mini" => ModelPrice::new(1.1, 4.4, 0.55, 0.0),
    "o1-pro" => ModelPrice::new(150.0, 600.0, 0.0, 0.0),
    "gpt-4.1" => ModelPrice::new(2.0, 8.0, 0.5, 0.0),
    "gpt-4.1-mini" => ModelPrice::new(0.4, 1.6, 0.1, 0.0),
    "gpt-4.1-nano" => ModelPrice::new(0.1, 0.4, 0.025, 0.0),
    "gpt-4o" => ModelPrice::new(2.5, 10.0, 1.25, 0.0),
    "gpt-4o-2024-05-13" => ModelPrice::new(5.0, 10.0, 0.0, 0.0),
    "gpt-4o-mini" => ModelPrice::new(0.15, 0.6, 0.075, 0.0),
    "gpt-4-turbo" => ModelPrice::new(10.0, 30.0, 0.0, 0.0),
    "codex-mini-latest" => ModelPrice::new(1.5, 6.0, 0.375, 0.0),
    "gpt-5" => ModelPrice::new(1.25, 10.0, 0.125, 0.0),
    "gpt-5-codex" => ModelPrice::new(1.25, 10.0, 0.125, 0.0),
    "gpt-5-mini" => ModelPrice::new(0.25, 2.0, 0.025, 0.0),
    "gpt-5-nano" => ModelPrice::new(0.05, 0.4, 0.005, 0.0),
    "gpt-5-codex-mini" => ModelPrice::new(0.25, 2.0, 0.025, 0.0),

    // Anthropic Models
    "claude-opus-4-1" => ModelPrice::new(15.0, 75.0, 1.5, 18.75),
    "claude-opus-4" => ModelPrice::new(15.0, 75.0, 1.5, 18.75),
    "claude-opus-4-5" => ModelPrice::new(5.0, 25.0, 0.5, 6.25),
    "claude-sonnet-4" => ModelPrice::new(3.0, 15.0, 0.3, 3.75),
    "claude-sonnet-4-5" => ModelPrice::new(3.0, 15.0, 0.3, 3.75),
    "claude-3-7-sonnet" => ModelPrice::new(3.0, 15.0, 0.3, 3.75),
    "claude-3-5-sonnet" => ModelPrice::new(3.0, 15.0, 0.3, 3.75),
    "claude-3-5-haiku" => ModelPrice::new(0.8, 4.0, 0.08, 1.0),
    "claude-haiku-4-5" => ModelPrice::new(1.0, 5.0, 0.1, 1.25),
    "claude-3-opus" => ModelPrice::new(15.0, 75.0, 1.5, 18.75),
    "claude-3-haiku" => ModelPrice::new(0.25, 1.25, 0.03, 0.3),

    // Google Models (lowest tier)
    "gemini-3-pro-preview" => ModelPrice::new(2.0, 12.0, 0.2, 0.0),
    "gemini-2.5-pro" => ModelPrice::new(1.25, 10.0, 0.31, 0.0),
    "gemini-2.5-flash" => ModelPrice::new(0.3, 2.5, 0.075, 0.0),
    "gemini-2.5-flash-lite" => ModelPrice::new(0.1, 0.4, 0.025, 0.0),
    "gemini-2.0-flash" => ModelPrice::new(0.1, 0.4, 0.025, 0.0),
    "gemini-2.0-flash-lite" => ModelPrice::new(0.075, 0.3, 0.0, 0.0),
    "gemini-1.5-flash" => ModelPrice::new(0.075, 0.3, 0.01875, 0.0),
    "gemini-1.5-flash-8b" => ModelPrice::new(0.0375, 0.15, 0.01, 0.0),
    "gemini-1.5-pro" => ModelPrice::new(1.25, 5.0, 0.3125, 0.0),
};

/// Spellings that are not a dash-delimited prefix of their canonical model.
static MODEL_ALIASES: phf::Map<&'static str, &'static str> = phf_map! {
    "claude-haiku-4.5" => "claude-haiku-4-5",
    "claude-sonnet-4.5" => "claude-sonnet-4-5",
    "claude-opus-4.1" => "claude-opus-4-1",
    "claude-opus-4.5" => "claude-opus-4-5",
    "sonnet-4.5" => "claude-sonnet-4-5",
    "gemini-exp-1206" => "gemini-2.0-flash",
};

/// Lower-case and drop any `provider/` routing prefix.
pub fn normalize_model_name(model: &str) -> String {
    let trimmed = model.trim();
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.to_ascii_lowercase()
}

/// The name itself, then every proper dash-delimited prefix, longest first.
fn lookup_candidates(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(name), |current| {
        current.rfind('-').map(|idx| &current[..idx])
    })
    .filter(|candidate| !candidate.is_empty())
}

/// Fetches a model price table from somewhere other than the static index.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self) -> Result<HashMap<String, ModelPrice>>;
}

fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(reqwest::Client::new)
}

/// Downloads a LiteLLM-style `model_prices_and_context_window.json`.
pub struct HttpPriceSource {
    url: String,
    timeout: Duration,
}

impl HttpPriceSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch(&self) -> Result<HashMap<String, ModelPrice>> {
        let response = http_client()
            .get(&self.url)
            .header("User-Agent", concat!("agent-ledger/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Pricing(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Pricing(format!(
                "price table request returned {}",
                response.status()
            )));
        }

        let raw: HashMap<String, Value> = response
            .simd_json()
            .await
            .map_err(|e| Error::Pricing(format!("{e:#}")))?;
        Ok(parse_litellm_table(&raw))
    }
}

/// Convert LiteLLM per-token prices into per-million [`ModelPrice`]s.
/// Entries without both input and output prices are ignored.
pub fn parse_litellm_table(raw: &HashMap<String, Value>) -> HashMap<String, ModelPrice> {
    let per_million = |entry: &Value, key: &str| {
        entry
            .get(key)
            .and_then(Value::as_f64)
            .map(|per_token| per_token * 1_000_000.0)
    };

    let mut keys: Vec<&String> = raw.keys().collect();
    keys.sort();

    let mut table = HashMap::new();
    for key in keys {
        let entry = &raw[key];
        let (Some(input), Some(output)) = (
            per_million(entry, "input_cost_per_token"),
            per_million(entry, "output_cost_per_token"),
        ) else {
            continue;
        };
        let price = ModelPrice {
            input_per_1m: input,
            output_per_1m: output,
            cache_read_per_1m: per_million(entry, "cache_read_input_token_cost").unwrap_or(0.0),
            cache_write_per_1m: per_million(entry, "cache_creation_input_token_cost")
                .unwrap_or(0.0),
            reasoning_per_1m: per_million(entry, "output_cost_per_reasoning_token")
                .unwrap_or(output),
        };
        // A bare name always wins; provider-qualified keys only fill gaps
        if key.contains('/') {
            table.entry(normalize_model_name(key)).or_insert(price);
        } else {
            table.insert(normalize_model_name(key), price);
        }
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(usize),
    /// No remote source configured, or still cooling down after a failure
    Skipped,
    Failed,
}

/// Resolves `(tokens, model)` to a USD cost.
///
/// Holds the remote override table and the refresh cooldown; construct one
/// per process (or per test) rather than sharing global state.
pub struct PricingResolver {
    overrides: RwLock<HashMap<String, ModelPrice>>,
    source: Option<Box<dyn PriceSource>>,
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingResolver {
    /// Static table only.
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            source: None,
            cooldown: Duration::ZERO,
            last_failure: Mutex::new(None),
        }
    }

    pub fn with_remote(source: Box<dyn PriceSource>, cooldown: Duration) -> Self {
        Self {
            source: Some(source),
            cooldown,
            ..Self::new()
        }
    }

    pub fn lookup(&self, model: &str) -> Option<ModelPrice> {
        let name = normalize_model_name(model);
        if name.is_empty() {
            return None;
        }

        let overrides = self.overrides.read();
        for candidate in lookup_candidates(&name) {
            if let Some(price) = overrides.get(candidate) {
                return Some(*price);
            }
            if let Some(canonical) = MODEL_ALIASES.get(candidate) {
                return MODEL_INDEX.get(canonical).copied();
            }
            if let Some(price) = MODEL_INDEX.get(candidate) {
                return Some(*price);
            }
        }
        None
    }

    /// `None` means the model is unknown, which is not the same as free.
    pub fn cost(&self, tokens: &TokenUsage, model: &str) -> Option<f64> {
        self.lookup(model).map(|price| price.cost(tokens))
    }

    /// Best-effort refresh of the override table from the remote source.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(source) = &self.source else {
            return RefreshOutcome::Skipped;
        };

        let last_failure = *self.last_failure.lock();
        if let Some(failed_at) = last_failure
            && failed_at.elapsed() < self.cooldown
        {
            debug!(
                retry_in_secs = (self.cooldown - failed_at.elapsed()).as_secs(),
                "skipping price refresh during cooldown"
            );
            return RefreshOutcome::Skipped;
        }

        match source.fetch().await {
            Ok(table) => {
                let count = table.len();
                *self.overrides.write() = table;
                *self.last_failure.lock() = None;
                debug!(models = count, "price table refreshed");
                RefreshOutcome::Updated(count)
            }
            Err(e) => {
                warn!(error = %e, "price table refresh failed, using built-in prices");
                *self.last_failure.lock() = Some(Instant::now());
                RefreshOutcome::Failed
            }
        }
    }
}
