use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate};
use num_format::{Locale, ToFormattedString};

use crate::types::{DailyStore, DayStats, Session, Source, UsageBucket};

#[derive(Clone)]
pub struct NumberFormatOptions {
    pub use_comma: bool,
    pub use_human: bool,
    pub locale: String,
    pub decimal_places: usize,
}

impl Default for NumberFormatOptions {
    fn default() -> Self {
        Self {
            use_comma: true,
            use_human: false,
            locale: "en".to_string(),
            decimal_places: 1,
        }
    }
}

/// Format a number for display. Accepts both u32 and u64.
pub fn format_number(n: impl Into<u64>, options: &NumberFormatOptions) -> String {
    let n: u64 = n.into();
    let locale = match options.locale.as_str() {
        "de" => Locale::de,
        "fr" => Locale::fr,
        "es" => Locale::es,
        "it" => Locale::it,
        "ja" => Locale::ja,
        "ko" => Locale::ko,
        "zh" => Locale::zh,
        _ => Locale::en,
    };

    if options.use_human {
        let scaled = [
            (1_000_000_000_000u64, "t"),
            (1_000_000_000, "b"),
            (1_000_000, "m"),
            (1_000, "k"),
        ]
        .into_iter()
        .find(|(unit, _)| n >= *unit);
        match scaled {
            Some((unit, suffix)) => format!(
                "{:.prec$}{suffix}",
                n as f64 / unit as f64,
                prec = options.decimal_places
            ),
            None => n.to_string(),
        }
    } else if options.use_comma {
        n.to_formatted_string(&locale)
    } else {
        n.to_string()
    }
}

/// `$1.23`; positive amounts under a cent show as `<$0.01`.
pub fn format_cost(cost: f64) -> String {
    if cost > 0.0 && cost < 0.005 {
        "<$0.01".to_string()
    } else {
        format!("${cost:.2}")
    }
}

/// `1h 02m`, `3m 05s` or `12s`.
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// `M/D/YYYY`, with a trailing `*` when the date is `today`.
pub fn format_date_for_display(date: &str, today: NaiveDate) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => {
            let formatted = format!("{}/{}/{}", parsed.month(), parsed.day(), parsed.year());
            if parsed == today {
                format!("{formatted}*")
            } else {
                formatted
            }
        }
        Err(_) => date.to_string(),
    }
}

/// Which slice of each day the daily report shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DailyFilter {
    #[default]
    All,
    Source(Source),
    Model(String),
}

impl DailyFilter {
    pub fn bucket(&self, day: &DayStats) -> Option<UsageBucket> {
        match self {
            DailyFilter::All => Some(day.totals.clone()),
            DailyFilter::Source(source) => day.by_source.get(source.as_str()).cloned(),
            DailyFilter::Model(model) => day.by_model.get(model).cloned(),
        }
    }
}

/// One row per calendar day from the first to the last day with data; days
/// without sessions (or without the filtered slice) get an empty bucket.
pub fn daily_rows(store: &DailyStore, filter: &DailyFilter) -> Vec<(String, UsageBucket)> {
    let (Some(first), Some(last)) = (store.keys().next(), store.keys().next_back()) else {
        return Vec::new();
    };
    let (Ok(start), Ok(end)) = (
        NaiveDate::parse_from_str(first, "%Y-%m-%d"),
        NaiveDate::parse_from_str(last, "%Y-%m-%d"),
    ) else {
        // Keys that are not dates: show them as they are
        return store
            .iter()
            .map(|(date, day)| (date.clone(), filter.bucket(day).unwrap_or_default()))
            .collect();
    };

    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| {
            let key = day.format("%Y-%m-%d").to_string();
            let bucket = store
                .get(&key)
                .and_then(|stats| filter.bucket(stats))
                .unwrap_or_default();
            (key, bucket)
        })
        .collect()
}

pub fn render_daily_table(
    rows: &[(String, UsageBucket)],
    today: NaiveDate,
    options: &NumberFormatOptions,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:>8} {:>9} {:>14} {:>14} {:>14} {:>12} {:>10}",
        "Date", "Sessions", "Messages", "Input", "Output", "Cache Read", "Reasoning", "Cost"
    );

    let mut total = UsageBucket::default();
    for (date, bucket) in rows {
        total += bucket;
        let _ = writeln!(out, "{}", daily_line(&format_date_for_display(date, today), bucket, options));
    }
    let _ = writeln!(out, "{}", daily_line("Total", &total, options));
    if total.unpriced_sessions > 0 {
        let _ = writeln!(
            out,
            "{} session(s) used models without known pricing and are not in the cost column.",
            format_number(total.unpriced_sessions, options)
        );
    }
    out
}

fn daily_line(label: &str, bucket: &UsageBucket, options: &NumberFormatOptions) -> String {
    format!(
        "{:<12} {:>8} {:>9} {:>14} {:>14} {:>14} {:>12} {:>10}",
        label,
        format_number(bucket.sessions, options),
        format_number(bucket.messages, options),
        format_number(bucket.input_tokens, options),
        format_number(bucket.output_tokens, options),
        format_number(bucket.cache_read_tokens, options),
        format_number(bucket.reasoning_tokens, options),
        format_cost(bucket.cost_usd),
    )
}

pub fn render_session_line(session: &Session, options: &NumberFormatOptions) -> String {
    let started = session
        .start_time
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let cost = session
        .total_cost_usd
        .map(format_cost)
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{started:<16} {:<9} {:<28} {:>10} {:>9} {:>8}  {}",
        session.source.as_str(),
        session.model.as_deref().unwrap_or("-"),
        format_number(session.total_tokens.total(), options),
        cost,
        format_duration_ms(session.duration_ms.unwrap_or(0).max(0) as u64),
        session.title.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests;
