//! Incremental scan: discover, diff against scan state, parse what changed,
//! fold into the daily store, persist.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregation::AggregationEngine;
use crate::discovery::FileDiscoverer;
use crate::error::{Error, Result};
use crate::models::PricingResolver;
use crate::normalize::EventNormalizer;
use crate::parsers;
use crate::storage::Storage;
use crate::types::{
    DailyStore, FileCandidate, NormalizedSession, ScanState, ScanStateEntry, Session, Source,
};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;

/// `min(available cores, 8)`.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Re-parse every file regardless of scan state
    pub full: bool,
    /// Restrict to these sources; `None` scans all of them
    pub sources: Option<Vec<Source>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Files handed to a parser
    pub scanned: usize,
    /// Files discovered
    pub total: usize,
    /// Files no parser could read
    pub errors: usize,
    /// Unchanged files that were not parsed
    pub skipped: usize,
    pub sessions: usize,
    /// Scan-state entries dropped because their file is gone
    pub pruned: usize,
}

pub struct ScanOrchestrator {
    discoverer: FileDiscoverer,
    storage: Arc<dyn Storage>,
    pricing: Arc<PricingResolver>,
    aggregation: AggregationEngine,
    max_workers: usize,
    max_file_bytes: u64,
    scan_lock: Mutex<()>,
}

impl ScanOrchestrator {
    pub fn new(
        discoverer: FileDiscoverer,
        storage: Arc<dyn Storage>,
        pricing: Arc<PricingResolver>,
        aggregation: AggregationEngine,
    ) -> Self {
        Self {
            discoverer,
            storage,
            pricing,
            aggregation,
            max_workers: default_max_workers(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            scan_lock: Mutex::new(()),
        }
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Run one scan to completion. A scan requested while another is running,
    /// in this process or another one sharing the store, fails with
    /// [`Error::ScanInProgress`]; storage failures propagate.
    pub fn scan(&self, options: &ScanOptions) -> Result<ScanSummary> {
        let Some(_guard) = self.scan_lock.try_lock() else {
            return Err(Error::ScanInProgress);
        };
        let Some(_writer) = self.storage.try_lock_writer()? else {
            return Err(Error::ScanInProgress);
        };

        let sources = options.sources.as_deref();
        let rebuild_all = options.full && sources.is_none();
        let candidates = self.discoverer.discover(sources);
        let previous_state = self.storage.read_scan_state()?;

        let (to_parse, unchanged): (Vec<&FileCandidate>, Vec<&FileCandidate>) =
            candidates.iter().partition(|candidate| {
                options.full
                    || !previous_state
                        .get(&candidate.path)
                        .is_some_and(|entry| entry.matches(candidate))
            });
        debug!(
            total = candidates.len(),
            changed = to_parse.len(),
            unchanged = unchanged.len(),
            "classified candidates"
        );

        let parsed_at = Utc::now();
        let accumulator: Mutex<Vec<NormalizedSession>> = Mutex::new(Vec::new());
        let new_entries: DashMap<PathBuf, ScanStateEntry> = DashMap::new();
        let errors = AtomicUsize::new(0);

        if !to_parse.is_empty() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.max_workers)
                .build()?;
            let normalizer = EventNormalizer::new(&self.pricing);

            pool.install(|| {
                to_parse.par_iter().for_each(|candidate| {
                    let parsed_ok = match self.parse_file(candidate, &normalizer, parsed_at) {
                        Some(normalized) => {
                            accumulator.lock().push(normalized);
                            true
                        }
                        None => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            false
                        }
                    };
                    // Failed files are recorded too and only retried once they change
                    new_entries.insert(
                        candidate.path.clone(),
                        ScanStateEntry {
                            source: candidate.source,
                            file_size: candidate.size,
                            mtime_ms: candidate.mtime_ms,
                            parsed_at,
                            parsed_ok,
                        },
                    );
                });
            });
        }

        let sessions = dedupe_sessions(accumulator.into_inner());

        // Scan state: drop vanished files of the scanned sources, then record this batch
        let discovered: HashSet<&PathBuf> = candidates.iter().map(|c| &c.path).collect();
        let mut scan_state = previous_state;
        let before = scan_state.len();
        scan_state.retain(|path, entry| {
            discovered.contains(path) || sources.is_some_and(|wanted| !wanted.contains(&entry.source))
        });
        let pruned = before - scan_state.len();
        scan_state.extend(new_entries);

        let summary = ScanSummary {
            scanned: to_parse.len(),
            total: candidates.len(),
            errors: errors.into_inner(),
            skipped: unchanged.len(),
            sessions: sessions.len(),
            pruned,
        };

        if !rebuild_all && to_parse.is_empty() && pruned == 0 {
            debug!("nothing changed since last scan");
            return Ok(summary);
        }

        if rebuild_all {
            let daily = self
                .aggregation
                .aggregate(&sessions.iter().map(|n| n.session.clone()).collect::<Vec<_>>());
            // Unchanged files would otherwise skip the rebuild after a failure
            self.storage.write_scan_state(&ScanState::default())?;
            self.storage.replace_sessions(&sessions)?;
            self.storage.write_daily_store(&daily)?;
        } else {
            let daily = self.incremental_daily(&sessions)?;
            self.storage.write_sessions(&sessions)?;
            self.storage.write_daily_store(&daily)?;
        }
        // Last, so an interrupted write leaves every file due for a re-parse
        self.storage.write_scan_state(&scan_state)?;

        info!(
            scanned = summary.scanned,
            total = summary.total,
            errors = summary.errors,
            skipped = summary.skipped,
            sessions = summary.sessions,
            "scan complete"
        );
        Ok(summary)
    }

    fn parse_file(
        &self,
        candidate: &FileCandidate,
        normalizer: &EventNormalizer<'_>,
        parsed_at: DateTime<Utc>,
    ) -> Option<NormalizedSession> {
        if candidate.size > self.max_file_bytes {
            warn!(
                path = %candidate.path.display(),
                size = candidate.size,
                limit = self.max_file_bytes,
                "file too large, skipping"
            );
            return None;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            parsers::parse_with_fallback(candidate).map(|raw| normalizer.normalize(raw, parsed_at))
        }));
        match outcome {
            Ok(Some(normalized)) => Some(normalized),
            Ok(None) => {
                debug!(path = %candidate.path.display(), "no session found in file");
                None
            }
            Err(_) => {
                warn!(path = %candidate.path.display(), "parser panicked");
                None
            }
        }
    }

    /// Drop one session from the index and its day from the rollups. Its file
    /// stays in the scan state, so it is not re-ingested until it changes.
    /// Returns whether the session existed.
    pub fn forget_session(&self, session_id: &str) -> Result<bool> {
        let Some(_guard) = self.scan_lock.try_lock() else {
            return Err(Error::ScanInProgress);
        };
        let Some(_writer) = self.storage.try_lock_writer()? else {
            return Err(Error::ScanInProgress);
        };

        let mut index = self.session_index()?;
        let Some(removed) = index.remove(session_id) else {
            return Ok(false);
        };
        let affected = BTreeSet::from([self.aggregation.date_key(&removed)]);
        let daily = self.recompute_dates(index.into_values(), &affected)?;

        // Rollups first: if the delete fails, forgetting again converges
        self.storage.write_daily_store(&daily)?;
        self.storage.delete_session(session_id)?;
        info!(session = session_id, "session forgotten");
        Ok(true)
    }

    fn session_index(&self) -> Result<BTreeMap<String, Session>> {
        Ok(self
            .storage
            .read_sessions()?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect())
    }

    /// Recompute every date touched by `sessions` (including the dates of the
    /// stored versions they replace) from the full session index, then merge
    /// the result over the stored daily store.
    fn incremental_daily(&self, sessions: &[NormalizedSession]) -> Result<DailyStore> {
        let mut index = self.session_index()?;

        let mut affected: BTreeSet<String> = BTreeSet::new();
        for normalized in sessions {
            let session = &normalized.session;
            if let Some(previous) = index.get(&session.id) {
                affected.insert(self.aggregation.date_key(previous));
            }
            affected.insert(self.aggregation.date_key(session));
            index.insert(session.id.clone(), session.clone());
        }

        self.recompute_dates(index.into_values(), &affected)
    }

    fn recompute_dates(
        &self,
        index: impl IntoIterator<Item = Session>,
        affected: &BTreeSet<String>,
    ) -> Result<DailyStore> {
        let touched: Vec<Session> = index
            .into_iter()
            .filter(|s| affected.contains(&self.aggregation.date_key(s)))
            .collect();
        let incoming = self.aggregation.aggregate(&touched);

        let mut existing = self.storage.read_daily_store()?;
        // A date can lose its last session when that session moves
        existing.retain(|date, _| !affected.contains(date));
        Ok(AggregationEngine::merge(&existing, &incoming))
    }
}

/// One session per id; when two files claim the same id the later path wins.
fn dedupe_sessions(mut sessions: Vec<NormalizedSession>) -> Vec<NormalizedSession> {
    sessions.sort_by(|a, b| {
        a.session
            .id
            .cmp(&b.session.id)
            .then_with(|| a.session.file_path.cmp(&b.session.file_path))
    });
    let mut unique: BTreeMap<String, NormalizedSession> = BTreeMap::new();
    for normalized in sessions {
        unique.insert(normalized.session.id.clone(), normalized);
    }
    unique.into_values().collect()
}
