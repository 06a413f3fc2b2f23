//! Sharded JSON file cache for lookup results.
//!
//! One record per file, fanned out over 256 shard directories by the first
//! two hex characters of the key hash. Reads and writes to one key share
//! a per-key lock, and writes land via temp-file-plus-rename, so a stale
//! reader can neither observe a partial record nor delete a fresh one.
//! Expiry is enforced lazily on read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use cinegids_config::Settings;
use cinegids_model::{CacheRecord, CacheStatus};

use crate::error::Result;

const MAX_SAFE_KEY_LEN: usize = 80;
const EVICTION_FRACTION: usize = 10;

/// Point-in-time cache shape, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub found: usize,
    pub not_found: usize,
    pub expired: usize,
    pub total_bytes: u64,
    pub max_entries: usize,
    pub max_bytes: u64,
}

pub struct FileCache {
    dir: PathBuf,
    found_ttl: chrono::Duration,
    not_found_ttl: chrono::Duration,
    max_entries: usize,
    max_bytes: u64,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileCache {
    pub fn new(settings: &Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.cache_dir)?;
        Ok(Self {
            dir: settings.cache_dir.clone(),
            found_ttl: chrono::Duration::from_std(settings.found_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(30)),
            not_found_ttl: chrono::Duration::from_std(settings.not_found_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
            max_entries: settings.max_cache_entries,
            max_bytes: settings.max_cache_bytes,
            write_locks: DashMap::new(),
        })
    }

    /// Read a record, enforcing TTL. Expired or unparseable files are
    /// deleted on sight and reported as misses.
    ///
    /// The whole read-validate-delete-touch sequence runs under the
    /// per-key lock. Deleting an expired entry outside the lock could
    /// remove a fresh record a concurrent `write` renamed into place
    /// after our read, and the touch rewrite could roll the file back
    /// to the stale snapshot.
    pub async fn read(&self, key: &str) -> Option<CacheRecord> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let raw = std::fs::read_to_string(&path).ok()?;
        let mut record: CacheRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "corrupt cache entry, deleting"
                );
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        if record.is_expired(self.found_ttl, self.not_found_ttl) {
            tracing::debug!(key, "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        // Touch the access time so eviction ordering tracks usage.
        record.last_accessed = Utc::now();
        if let Err(e) = self.write_file(&path, &record) {
            tracing::debug!(key, error = %e, "failed to touch cache entry");
        }
        Some(record)
    }

    /// Persist a record, evicting first when the cache is at capacity.
    pub async fn write(&self, record: &CacheRecord) -> Result<()> {
        self.evict_if_needed();
        let key = record.lookup_key.clone();
        let path = self.path_for(&key);
        let mut stamped = record.clone();
        stamped.last_accessed = Utc::now();

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        self.write_file(&path, &stamped)
    }

    /// Delete entries, skipping paths the predicate wants kept. Returns the
    /// number of files removed.
    pub fn clear(&self, preserve: impl Fn(&Path) -> bool) -> usize {
        let mut removed = 0;
        for path in self.entry_paths() {
            if preserve(&path) {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            total_entries: 0,
            found: 0,
            not_found: 0,
            expired: 0,
            total_bytes: 0,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
        };
        for path in self.entry_paths() {
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            stats.total_entries += 1;
            stats.total_bytes += metadata.len();
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<CacheRecord>(&raw) else {
                continue;
            };
            match record.status {
                CacheStatus::Found => stats.found += 1,
                CacheStatus::NotFound => stats.not_found += 1,
            }
            if record.is_expired(self.found_ttl, self.not_found_ttl) {
                stats.expired += 1;
            }
        }
        stats
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// `{dir}/{hash[..2]}/{safe_key}_{hash[..12]}.json`
    fn path_for(&self, key: &str) -> PathBuf {
        let hash = format!("{:x}", Sha256::digest(key.as_bytes()));
        let mut safe: String = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        safe.truncate(MAX_SAFE_KEY_LEN);
        self.dir
            .join(&hash[..2])
            .join(format!("{safe}_{}.json", &hash[..12]))
    }

    fn write_file(&self, path: &Path, record: &CacheRecord) -> Result<()> {
        let shard = path.parent().map(PathBuf::from).unwrap_or_else(|| self.dir.clone());
        std::fs::create_dir_all(&shard)?;
        let tmp = tempfile::NamedTempFile::new_in(&shard)?;
        serde_json::to_writer(&tmp, record)?;
        tmp.persist(path)
            .map_err(|e| crate::error::LookupError::Io(e.error))?;
        Ok(())
    }

    fn entry_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let Ok(shards) = std::fs::read_dir(&self.dir) else {
            return paths;
        };
        for shard in shards.flatten() {
            let shard_path = shard.path();
            if shard_path.is_dir() {
                if let Ok(entries) = std::fs::read_dir(&shard_path) {
                    paths.extend(
                        entries
                            .flatten()
                            .map(|e| e.path())
                            .filter(|p| {
                                p.extension().is_some_and(|ext| ext == "json")
                            }),
                    );
                }
            } else if shard_path.extension().is_some_and(|ext| ext == "json") {
                paths.push(shard_path);
            }
        }
        paths
    }

    /// When either ceiling is hit, drop the least-recently-used tenth of
    /// the entries (by file modification time, which tracks reads too).
    fn evict_if_needed(&self) {
        let paths = self.entry_paths();
        let total_bytes: u64 = paths
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        if paths.len() < self.max_entries && total_bytes < self.max_bytes {
            return;
        }

        let mut by_age: Vec<(PathBuf, std::time::SystemTime)> = paths
            .into_iter()
            .filter_map(|p| {
                let modified = std::fs::metadata(&p).ok()?.modified().ok()?;
                Some((p, modified))
            })
            .collect();
        by_age.sort_by_key(|(_, modified)| *modified);

        let victims = (by_age.len() / EVICTION_FRACTION).max(1);
        tracing::info!(
            victims,
            total = by_age.len(),
            total_bytes,
            "cache at capacity, evicting oldest entries"
        );
        for (path, _) in by_age.into_iter().take(victims) {
            let _ = std::fs::remove_file(&path);
        }
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("dir", &self.dir)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegids_model::MediaType;
    use std::time::Duration;

    fn cache_in(dir: &Path) -> FileCache {
        let mut settings = Settings::default();
        settings.cache_dir = dir.to_path_buf();
        FileCache::new(&settings).unwrap()
    }

    fn record(key: &str) -> CacheRecord {
        CacheRecord::not_found(
            key.to_string(),
            "Test".to_string(),
            Some(2004),
            MediaType::Film,
        )
    }

    #[tokio::test]
    async fn round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let rec = record("vpro-test-2004-none-m");
        cache.write(&rec).await.unwrap();
        let back = cache.read("vpro-test-2004-none-m").await.unwrap();
        assert_eq!(back.title, "Test");
        assert_eq!(back.status, CacheStatus::NotFound);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        assert!(cache.read("vpro-nothing-0-none-m").await.is_none());
    }

    #[tokio::test]
    async fn expired_not_found_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut rec = record("vpro-old-2004-none-m");
        // Ten days old: expired as not-found, still fresh as found.
        rec.fetched_at = Utc::now() - chrono::Duration::days(10);
        cache.write(&rec).await.unwrap();
        assert!(cache.read("vpro-old-2004-none-m").await.is_none());
        // The expired file is gone, not just skipped.
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn found_records_outlive_not_found_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut rec = record("vpro-aged-2004-none-m");
        rec.status = CacheStatus::Found;
        rec.description = Some("A film with a valid description body.".into());
        rec.fetched_at = Utc::now() - chrono::Duration::days(10);
        cache.write(&rec).await.unwrap();
        assert!(cache.read("vpro-aged-2004-none-m").await.is_some());
    }

    #[tokio::test]
    async fn corrupt_entry_is_deleted_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let path = cache.path_for("vpro-bad-0-none-m");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{truncated").unwrap();
        assert!(cache.read("vpro-bad-0-none-m").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn expired_read_does_not_delete_a_racing_fresh_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache_in(dir.path()));
        let key = "vpro-raced-2004-none-m";
        let mut stale = record(key);
        stale.fetched_at = Utc::now() - chrono::Duration::days(10);
        cache.write(&stale).await.unwrap();

        // Hold the key lock so the reader parks, then rename a fresh
        // record into place before letting it proceed. The reader must
        // see the fresh record rather than deleting it as expired.
        let lock = cache.lock_for(key);
        let guard = lock.lock().await;
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.read(key).await })
        };
        tokio::task::yield_now().await;
        let mut fresh = record(key);
        fresh.title = "Fresh".to_string();
        cache.write_file(&cache.path_for(key), &fresh).unwrap();
        drop(guard);

        let back = reader.await.unwrap().unwrap();
        assert_eq!(back.title, "Fresh");
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache_in(dir.path()));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let mut rec = record("vpro-contested-0-none-m");
                rec.title = format!("Writer {i}");
                cache.write(&rec).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let back = cache.read("vpro-contested-0-none-m").await.unwrap();
        assert!(back.title.starts_with("Writer "));
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn eviction_drops_oldest_tenth() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.cache_dir = dir.path().to_path_buf();
        settings.max_cache_entries = 20;
        let cache = FileCache::new(&settings).unwrap();

        for i in 0..20 {
            cache.write(&record(&format!("vpro-film{i}-0-none-m"))).await.unwrap();
            // Distinct mtimes so LRU ordering is well defined.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.stats().total_entries, 20);
        // At capacity: the next write evicts the oldest tenth first.
        cache.write(&record("vpro-newcomer-0-none-m")).await.unwrap();
        let stats = cache.stats();
        assert!(stats.total_entries <= 19);
        assert!(cache.read("vpro-newcomer-0-none-m").await.is_some());
        assert!(cache.read("vpro-film0-0-none-m").await.is_none());
    }

    #[tokio::test]
    async fn clear_honors_preserve_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.write(&record("vpro-a-0-none-m")).await.unwrap();
        cache.write(&record("vpro-b-0-none-m")).await.unwrap();
        let keep = cache.path_for("vpro-a-0-none-m");
        let removed = cache.clear(|path| path == keep);
        assert_eq!(removed, 1);
        assert!(cache.read("vpro-a-0-none-m").await.is_some());
        assert!(cache.read("vpro-b-0-none-m").await.is_none());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let long_a = format!("vpro-{}-0-none-m", "a".repeat(120));
        let long_b = format!("vpro-{}-0-none-m", "a".repeat(121));
        assert_ne!(cache.path_for(&long_a), cache.path_for(&long_b));
    }

    #[tokio::test]
    async fn stats_counts_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut found = record("vpro-f-0-none-m");
        found.status = CacheStatus::Found;
        found.description = Some("A perfectly ordinary description.".into());
        cache.write(&found).await.unwrap();
        cache.write(&record("vpro-nf-0-none-m")).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.found, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.expired, 0);
    }
}
