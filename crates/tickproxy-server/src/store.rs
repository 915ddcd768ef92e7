//! File-backed series cache and saved snapshots.
//!
//! One CSV file per cache key under the cache directory. Writes land in a
//! temporary sibling first and are renamed over the final path, so readers
//! only ever see a complete previous or complete new snapshot. Writers to the
//! same key queue on a key-scoped async mutex; readers take no lock.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;
use tickproxy_core::{
    escape_path_component, format_date, read_csv, write_csv, SeriesRequest, SeriesTable, Symbol,
};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::StoreError;

const CSV_EXTENSION: &str = "csv";

/// Deterministic cache key; also the file stem of the cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a parsed request. An implicit one-month range keys as `latest`,
    /// separately from an explicit `period=1mo`.
    pub fn for_request(request: &SeriesRequest) -> Self {
        let start = request.start.map(format_date);
        let end = request.end.map(format_date);
        key_for(
            request.symbol.as_str(),
            start.as_deref(),
            end.as_deref(),
            request.period.map(|period| period.as_str()),
            Some(request.interval.as_str()),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{CSV_EXTENSION}", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `<symbol>_<period|start|latest>[_<end>][_<interval>]`, every part escaped
/// with [`escape_path_component`] so distinct inputs never share a key.
pub fn key_for(
    symbol: &str,
    start: Option<&str>,
    end: Option<&str>,
    period: Option<&str>,
    interval: Option<&str>,
) -> CacheKey {
    let tag = period.or(start).unwrap_or("latest");

    let mut key = escape_path_component(symbol);
    key.push('_');
    key.push_str(&escape_path_component(tag));
    for suffix in [end, interval].into_iter().flatten() {
        key.push('_');
        key.push_str(&escape_path_component(suffix));
    }
    CacheKey(key)
}

/// Freshness is inclusive at the boundary: an entry exactly `ttl` old is fresh.
pub fn is_fresh(age: Duration, ttl: Duration) -> bool {
    age.as_secs() <= ttl.as_secs()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
    pub table: SeriesTable,
    pub age: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSnapshot {
    pub table: SeriesTable,
    pub file_name: String,
}

#[derive(Debug)]
pub struct SeriesStore {
    cache_dir: PathBuf,
    snapshot_dir: PathBuf,
    write_locks: Mutex<HashMap<String, WriteSlot>>,
}

impl SeriesStore {
    pub fn new(cache_dir: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            snapshot_dir: snapshot_dir.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Read the entry for `key` with its age. TTL is the caller's decision.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedSeries> {
        let path = self.entry_path(key);
        match tokio::task::spawn_blocking(move || load_entry(&path)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(error)) => {
                tracing::warn!(%key, %error, "unreadable cache entry; treating as miss");
                None
            }
            Err(error) => {
                tracing::warn!(%key, %error, "cache read task aborted");
                None
            }
        }
    }

    /// Atomically replace the entry for `key`.
    pub async fn put(&self, key: &CacheKey, table: &SeriesTable) -> Result<PathBuf, StoreError> {
        let body = write_csv(table)?;
        let lease = self.lease_write(key);
        let _guard = lease.lock.lock().await;

        let dir = self.cache_dir.clone();
        let path = self.entry_path(key);
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, body.as_bytes()).map(|()| path))
            .await
            .map_err(|error| StoreError::TaskAborted(error.to_string()))?
            .map_err(|source| StoreError::Write {
                key: key.to_string(),
                source,
            })
    }

    /// Write a timestamped copy `<symbol>_<YYYYMMDDTHHMMSSZ>.csv` into the snapshot directory.
    pub async fn save_snapshot(
        &self,
        symbol: &Symbol,
        table: &SeriesTable,
        taken_at: OffsetDateTime,
    ) -> Result<PathBuf, StoreError> {
        let stamp = taken_at
            .format(format_description!("[year][month][day]T[hour][minute][second]Z"))
            .map_err(|error| StoreError::Io(std::io::Error::other(error)))?;
        let body = write_csv(table)?;
        let dir = self.snapshot_dir.clone();
        let path = dir.join(format!("{}_{stamp}.{CSV_EXTENSION}", symbol.sanitized()));

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, body.as_bytes()).map(|()| path))
            .await
            .map_err(|error| StoreError::TaskAborted(error.to_string()))?
            .map_err(StoreError::from)
    }

    /// Saved snapshot file names, ascending. A missing directory lists as empty.
    pub async fn list_snapshots(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.snapshot_dir.clone();
        let mut names: Vec<String> = tokio::task::spawn_blocking(move || csv_files_in(&dir))
            .await
            .map_err(|error| StoreError::TaskAborted(error.to_string()))??
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Best-effort stale copy for `symbol`, ignoring freshness and exact key.
    ///
    /// Candidates are `*.csv` files in the cache and snapshot directories whose
    /// name contains the sanitized symbol, case-insensitively. The
    /// lexicographically last file name wins; equal names in both directories
    /// resolve to the larger full path. Unparseable candidates are skipped.
    pub async fn fallback_for(&self, symbol: &Symbol) -> Option<FallbackSnapshot> {
        let dirs = [self.cache_dir.clone(), self.snapshot_dir.clone()];
        let needle = symbol.sanitized().to_ascii_lowercase();

        let result = tokio::task::spawn_blocking(move || find_fallback(&dirs, &needle)).await;
        match result {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(%symbol, %error, "fallback search task aborted");
                None
            }
        }
    }

    /// Register interest in `key`'s write lock. The slot is dropped with its
    /// last lease, including leases abandoned mid-write by a cancelled caller.
    fn lease_write(&self, key: &CacheKey) -> WriteLease<'_> {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = locks.entry(key.as_str().to_owned()).or_default();
        slot.leases += 1;
        WriteLease {
            store: self,
            key: key.as_str().to_owned(),
            lock: Arc::clone(&slot.lock),
        }
    }

    fn pending_write_keys(&self) -> usize {
        self.write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Default)]
struct WriteSlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    leases: usize,
}

struct WriteLease<'a> {
    store: &'a SeriesStore,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.leases = slot.leases.saturating_sub(1);
            if slot.leases == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

fn load_entry(path: &Path) -> Result<Option<CachedSeries>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let modified = std::fs::metadata(path)?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);

    let table = read_csv(&contents)?;
    if table.is_empty() {
        return Ok(None);
    }
    Ok(Some(CachedSeries { table, age }))
}

fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| error.error)?;
    Ok(())
}

fn csv_files_in(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(CSV_EXTENSION));
        if !is_csv || !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            files.push((name.to_owned(), path.clone()));
        }
    }
    Ok(files)
}

fn find_fallback(dirs: &[PathBuf], needle: &str) -> Option<FallbackSnapshot> {
    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    for dir in dirs {
        match csv_files_in(dir) {
            Ok(files) => candidates.extend(
                files
                    .into_iter()
                    .filter(|(name, _)| name.to_ascii_lowercase().contains(needle)),
            ),
            Err(error) => {
                tracing::warn!(dir = %dir.display(), %error, "cannot scan for fallback snapshots");
            }
        }
    }

    candidates.sort();
    candidates.dedup_by(|a, b| a.1 == b.1);

    for (file_name, path) in candidates.into_iter().rev() {
        match std::fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|contents| read_csv(&contents).map_err(StoreError::from))
        {
            Ok(table) if !table.is_empty() => return Some(FallbackSnapshot { table, file_name }),
            Ok(_) => tracing::debug!(%file_name, "skipping empty fallback candidate"),
            Err(error) => tracing::warn!(%file_name, %error, "skipping unreadable fallback candidate"),
        }
    }
    None
}
