use crate::types::TokenUsage;

/// Turns running totals into per-event deltas for one session.
///
/// Token and cost totals are tracked independently; a source may report one
/// without the other.
#[derive(Debug, Default, Clone)]
pub struct CumulativeTracker {
    last_tokens: Option<TokenUsage>,
    last_cost: Option<f64>,
}

impl CumulativeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field-wise `max(0, total - previous)`. The first snapshot has no
    /// previous total, so it contributes `last` (the source's own per-turn
    /// usage) when given, else nothing.
    pub fn token_delta(&mut self, total: TokenUsage, last: Option<TokenUsage>) -> Option<TokenUsage> {
        match self.last_tokens.replace(total) {
            Some(previous) => Some(TokenUsage {
                input_tokens: total.input_tokens.saturating_sub(previous.input_tokens),
                output_tokens: total.output_tokens.saturating_sub(previous.output_tokens),
                cache_read_tokens: total
                    .cache_read_tokens
                    .saturating_sub(previous.cache_read_tokens),
                cache_write_tokens: total
                    .cache_write_tokens
                    .saturating_sub(previous.cache_write_tokens),
                reasoning_tokens: total
                    .reasoning_tokens
                    .saturating_sub(previous.reasoning_tokens),
            }),
            None => last,
        }
    }

    /// `max(0, total - previous)`; the first snapshot counts in full.
    pub fn cost_delta(&mut self, total: f64) -> f64 {
        let previous = self.last_cost.replace(total).unwrap_or(0.0);
        (total - previous).max(0.0)
    }
}
