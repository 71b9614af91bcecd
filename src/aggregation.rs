use chrono_tz::Tz;
use tracing::warn;

use crate::types::{DailyStore, DayStats, Session, UsageBucket};

/// Bucket key for sessions without a model or working directory.
pub const UNKNOWN_KEY: &str = "unknown";

/// System time zone, falling back to UTC when it cannot be determined.
pub fn local_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(Tz::UTC)
}

/// Folds sessions into per-day statistics.
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine {
    tz: Tz,
}

impl AggregationEngine {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// `name` is an IANA zone such as `Europe/Berlin`; `None` or an invalid
    /// name means the system zone.
    pub fn with_timezone_name(name: Option<&str>) -> Self {
        let tz = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                warn!(timezone = name, "unknown time zone, using system zone");
                local_timezone()
            }),
            None => local_timezone(),
        };
        Self::new(tz)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Calendar day (`YYYY-MM-DD`) of the session start, or of `parsed_at`
    /// when the session has no timestamps.
    pub fn date_key(&self, session: &Session) -> String {
        session
            .start_time
            .unwrap_or(session.parsed_at)
            .with_timezone(&self.tz)
            .format("%Y-%m-%d")
            .to_string()
    }

    pub fn aggregate(&self, sessions: &[Session]) -> DailyStore {
        // Fixed fold order keeps float sums identical between a full
        // rebuild and a per-date incremental recompute
        let mut keyed: Vec<(String, &Session)> = sessions
            .iter()
            .map(|session| (self.date_key(session), session))
            .collect();
        keyed.sort_by(|(date_a, a), (date_b, b)| {
            date_a
                .cmp(date_b)
                .then(a.start_time.cmp(&b.start_time))
                .then(a.id.cmp(&b.id))
        });

        let mut store = DailyStore::new();
        for (date, session) in keyed {
            let bucket = UsageBucket::from_session(session);
            let day = store.entry(date.clone()).or_insert_with(|| DayStats {
                date,
                ..Default::default()
            });

            *day.by_source
                .entry(session.source.as_str().to_string())
                .or_default() += &bucket;
            *day.by_model
                .entry(session.model.clone().unwrap_or_else(|| UNKNOWN_KEY.to_string()))
                .or_default() += &bucket;
            *day.by_repo
                .entry(session.repo_name.clone().unwrap_or_else(|| UNKNOWN_KEY.to_string()))
                .or_default() += &bucket;
        }

        for day in store.values_mut() {
            day.totals = totals_of(day);
        }
        store
    }

    /// New store with every date in `incoming` replacing the same date in
    /// `existing` wholesale.
    pub fn merge(existing: &DailyStore, incoming: &DailyStore) -> DailyStore {
        let mut merged = existing.clone();
        for (date, day) in incoming {
            merged.insert(date.clone(), day.clone());
        }
        merged
    }
}

/// Sum of the per-source buckets.
pub fn totals_of(day: &DayStats) -> UsageBucket {
    let mut totals = UsageBucket::default();
    for bucket in day.by_source.values() {
        totals += bucket;
    }
    totals
}
