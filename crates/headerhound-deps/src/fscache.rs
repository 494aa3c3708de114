//! Memoized filesystem lookups
//!
//! Path canonicalization and existence checks are referentially
//! transparent for the duration of a build, so they are memoized
//! process-wide and may be shared across traversals. Long-lived
//! processes must call [`clear`] between logically distinct sessions.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, OnceLock};

fn realpath_cache() -> &'static Mutex<HashMap<PathBuf, PathBuf>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, PathBuf>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn is_file_cache() -> &'static Mutex<HashMap<PathBuf, bool>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, bool>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Canonicalize a path, memoized.
///
/// Falls back to lexical normalization of the absolute path when the
/// file does not (yet) exist, because callers sometimes resolve paths
/// they are about to create.
pub fn realpath(path: &Path) -> PathBuf {
    if let Some(cached) = realpath_cache()
        .lock()
        .ok()
        .and_then(|cache| cache.get(path).cloned())
    {
        return cached;
    }

    let resolved = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_lexically(path));

    if let Ok(mut cache) = realpath_cache().lock() {
        cache.insert(path.to_path_buf(), resolved.clone());
    }
    resolved
}

/// Is the given path a regular file? Memoized.
pub fn is_file(path: &Path) -> bool {
    if let Some(cached) = is_file_cache()
        .lock()
        .ok()
        .and_then(|cache| cache.get(path).copied())
    {
        return cached;
    }

    let exists = path.is_file();
    if let Ok(mut cache) = is_file_cache().lock() {
        cache.insert(path.to_path_buf(), exists);
    }
    exists
}

/// Drop all memoized lookups.
pub fn clear() {
    if let Ok(mut cache) = realpath_cache().lock() {
        cache.clear();
    }
    if let Ok(mut cache) = is_file_cache().lock() {
        cache.clear();
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut parts: Vec<Component> = Vec::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
