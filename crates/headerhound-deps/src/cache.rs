//! Mtime-validated result cache
//!
//! Caches computed values keyed by `(path, macro fingerprint)` so the
//! same file analyzed under different macro environments gets distinct
//! entries. An entry records which files contributed to the value; it
//! is served only while every one of those files still exists and has
//! a modification time no newer than when the entry was written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::trace;

#[derive(Debug, Clone)]
struct Entry<V> {
    written: SystemTime,
    tracked: Vec<PathBuf>,
    value: V,
}

/// Cache key: resolved path plus the fingerprint of the macro state
/// the value was computed under.
pub type CacheKey = (PathBuf, u64);

#[derive(Debug, Default)]
pub struct MtimeCache<V> {
    entries: Mutex<HashMap<CacheKey, Entry<V>>>,
}

impl<V: Clone> MtimeCache<V> {
    pub fn new() -> Self {
        MtimeCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a cached value if every tracked file is unchanged since
    /// the entry was written. A stale entry is removed on the way out.
    pub fn get(&self, path: &Path, fingerprint: u64) -> Option<V> {
        let key = (path.to_path_buf(), fingerprint);
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(&key)?;

        if entry.tracked.iter().all(|p| fresh(p, entry.written)) {
            trace!(path = %path.display(), "cache hit");
            return Some(entry.value.clone());
        }

        trace!(path = %path.display(), "cache entry stale");
        entries.remove(&key);
        None
    }

    /// Store a value along with the files whose mtimes gate it. The
    /// analyzed file itself should be among `tracked`.
    pub fn put(&self, path: &Path, fingerprint: u64, tracked: Vec<PathBuf>, value: V) {
        let entry = Entry {
            written: SystemTime::now(),
            tracked,
            value,
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((path.to_path_buf(), fingerprint), entry);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// A tracked file is fresh when it still exists and was not modified
/// after the entry was written.
fn fresh(path: &Path, written: SystemTime) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => mtime <= written,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File, FileTimes};
    use std::time::Duration;

    #[test]
    fn test_hit_until_file_touched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        fs::write(&file, "int x;").unwrap();

        let cache: MtimeCache<Vec<String>> = MtimeCache::new();
        cache.put(&file, 7, vec![file.clone()], vec!["dep".to_string()]);
        assert_eq!(cache.get(&file, 7), Some(vec!["dep".to_string()]));

        // Push the mtime past the entry's write time.
        let future = SystemTime::now() + Duration::from_secs(60);
        let times = FileTimes::new().set_modified(future);
        File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_times(times)
            .unwrap();

        assert_eq!(cache.get(&file, 7), None);
        // Stale entry was evicted, not just skipped.
        assert_eq!(cache.get(&file, 7), None);
    }

    #[test]
    fn test_fingerprint_isolates_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        fs::write(&file, "int x;").unwrap();

        let cache: MtimeCache<u32> = MtimeCache::new();
        cache.put(&file, 1, vec![file.clone()], 10);
        cache.put(&file, 2, vec![file.clone()], 20);
        assert_eq!(cache.get(&file, 1), Some(10));
        assert_eq!(cache.get(&file, 2), Some(20));
        assert_eq!(cache.get(&file, 3), None);
    }

    #[test]
    fn test_missing_tracked_file_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        let dep = dir.path().join("b.h");
        fs::write(&file, "").unwrap();
        fs::write(&dep, "").unwrap();

        let cache: MtimeCache<u32> = MtimeCache::new();
        cache.put(&file, 0, vec![file.clone(), dep.clone()], 1);
        assert_eq!(cache.get(&file, 0), Some(1));

        fs::remove_file(&dep).unwrap();
        assert_eq!(cache.get(&file, 0), None);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        fs::write(&file, "").unwrap();

        let cache: MtimeCache<u32> = MtimeCache::new();
        cache.put(&file, 0, vec![file.clone()], 1);
        cache.clear();
        assert_eq!(cache.get(&file, 0), None);
    }
}
