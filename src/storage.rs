//! Persistence behind a narrow read/write contract.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::types::{
    CanonicalEvent, DailyStore, NormalizedSession, ScanState, ScanStateEntry, Session,
};

pub trait Storage: Send + Sync {
    fn read_scan_state(&self) -> Result<ScanState>;
    fn write_scan_state(&self, state: &ScanState) -> Result<()>;

    fn read_daily_store(&self) -> Result<DailyStore>;
    fn write_daily_store(&self, store: &DailyStore) -> Result<()>;

    /// Days in `from..=to` (inclusive `YYYY-MM-DD` bounds, either optional).
    fn read_daily_range(&self, from: Option<&str>, to: Option<&str>) -> Result<DailyStore> {
        Ok(self
            .read_daily_store()?
            .into_iter()
            .filter(|(date, _)| from.is_none_or(|from| date.as_str() >= from))
            .filter(|(date, _)| to.is_none_or(|to| date.as_str() <= to))
            .collect())
    }

    /// Session index, sorted by id.
    fn read_sessions(&self) -> Result<Vec<Session>>;
    fn read_events(&self, session_id: &str) -> Result<Vec<CanonicalEvent>>;

    /// Insert or replace by session id.
    fn write_sessions(&self, sessions: &[NormalizedSession]) -> Result<()>;
    /// Replace the whole session index.
    fn replace_sessions(&self, sessions: &[NormalizedSession]) -> Result<()>;
    fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Exclusive writer lock across processes sharing this store. `None`
    /// when another process holds it.
    fn try_lock_writer(&self) -> Result<Option<WriterLock>> {
        Ok(Some(WriterLock::default()))
    }
}

/// Held for the duration of a scan or forget; dropping it unlocks.
#[derive(Default)]
pub struct WriterLock {
    _file: Option<File>,
}

/// JSON files under one data directory:
///
/// ```text
/// scan_state.json
/// daily.json
/// sessions.json
/// events/<xxh3 of session id>.json
/// writer.lock
/// ```
///
/// Every file is written to a temporary sibling and renamed into place.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("writer.lock")
    }

    fn scan_state_path(&self) -> PathBuf {
        self.dir.join("scan_state.json")
    }

    fn daily_path(&self) -> PathBuf {
        self.dir.join("daily.json")
    }

    fn sessions_path(&self) -> PathBuf {
        self.dir.join("sessions.json")
    }

    fn events_dir(&self) -> PathBuf {
        self.dir.join("events")
    }

    fn events_path(&self, session_id: &str) -> PathBuf {
        self.events_dir()
            .join(format!("{:016x}.json", xxh3_64(session_id.as_bytes())))
    }

    fn write_events(&self, sessions: &[NormalizedSession]) -> Result<()> {
        for normalized in sessions {
            write_json_atomic(&self.events_path(&normalized.session.id), &normalized.events)?;
        }
        Ok(())
    }

    fn write_index(&self, mut sessions: Vec<Session>) -> Result<()> {
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        write_json_atomic(&self.sessions_path(), &sessions)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let mut bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(Error::storage(path, e)),
    };
    Ok(simd_json::from_slice(&mut bytes)?)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))?;

    let bytes = simd_json::to_vec(value)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::storage(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| Error::storage(path, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::storage(path, e))?;
    tmp.persist(path).map_err(|e| Error::storage(path, e.error))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage(path, e)),
    }
}

impl Storage for JsonFileStore {
    fn read_scan_state(&self) -> Result<ScanState> {
        // Keys are stored as strings; JSON object keys cannot be raw paths
        let raw: BTreeMap<String, ScanStateEntry> = read_json(&self.scan_state_path())?;
        Ok(raw.into_iter().map(|(path, entry)| (PathBuf::from(path), entry)).collect())
    }

    fn write_scan_state(&self, state: &ScanState) -> Result<()> {
        let raw: BTreeMap<String, _> = state
            .iter()
            .map(|(path, entry)| (path.to_string_lossy().into_owned(), entry))
            .collect();
        write_json_atomic(&self.scan_state_path(), &raw)
    }

    fn read_daily_store(&self) -> Result<DailyStore> {
        read_json(&self.daily_path())
    }

    fn write_daily_store(&self, store: &DailyStore) -> Result<()> {
        write_json_atomic(&self.daily_path(), store)
    }

    fn read_sessions(&self) -> Result<Vec<Session>> {
        read_json(&self.sessions_path())
    }

    fn read_events(&self, session_id: &str) -> Result<Vec<CanonicalEvent>> {
        read_json(&self.events_path(session_id))
    }

    fn write_sessions(&self, sessions: &[NormalizedSession]) -> Result<()> {
        if sessions.is_empty() {
            return Ok(());
        }
        self.write_events(sessions)?;

        let mut index: BTreeMap<String, Session> = self
            .read_sessions()?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        for normalized in sessions {
            index.insert(normalized.session.id.clone(), normalized.session.clone());
        }
        self.write_index(index.into_values().collect())
    }

    fn replace_sessions(&self, sessions: &[NormalizedSession]) -> Result<()> {
        let previous = self.read_sessions()?;
        self.write_events(sessions)?;
        self.write_index(sessions.iter().map(|n| n.session.clone()).collect())?;

        let kept: std::collections::HashSet<&str> =
            sessions.iter().map(|n| n.session.id.as_str()).collect();
        for stale in previous.iter().filter(|s| !kept.contains(s.id.as_str())) {
            debug!(session = %stale.id, "dropping events of replaced session");
            remove_if_present(&self.events_path(&stale.id))?;
        }
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.read_sessions()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != session_id);
        if sessions.len() != before {
            self.write_index(sessions)?;
        }
        remove_if_present(&self.events_path(session_id))
    }

    fn try_lock_writer(&self) -> Result<Option<WriterLock>> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::storage(&path, e))?;

        match file.try_lock() {
            Ok(()) => Ok(Some(WriterLock { _file: Some(file) })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(Error::storage(&path, e)),
        }
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
