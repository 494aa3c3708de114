//! File classification helpers
//!
//! Header/source extension sets and the companion-file convention:
//! a header `X.hpp` implies an associated source `X.cpp` should also be
//! compiled, if one exists next to it.

use std::path::{Path, PathBuf};

const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hxx", "hh", "inl"];
const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cxx", "cc", "c"];

/// Extensions tried, in order, when looking for a header's companion source.
const COMPANION_SOURCE_EXTENSIONS: &[&str] = &["cpp", "cxx", "cc", "c", "C", "CC"];

/// Is the given file a header file?
pub fn is_header(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| HEADER_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Is the given file a source file?
pub fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// If a header is part of a build, the corresponding source file must
/// also be built. Returns the companion source file if it exists on disk.
pub fn implied_source(path: &Path) -> Option<PathBuf> {
    for ext in COMPANION_SOURCE_EXTENSIONS {
        let trial = path.with_extension(ext);
        if trial.is_file() {
            return Some(trial);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_header() {
        assert!(is_header(Path::new("foo.h")));
        assert!(is_header(Path::new("foo.HPP")));
        assert!(is_header(Path::new("dir/foo.inl")));
        assert!(!is_header(Path::new("foo.cpp")));
        assert!(!is_header(Path::new("Makefile")));
    }

    #[test]
    fn test_is_source() {
        assert!(is_source(Path::new("foo.cpp")));
        assert!(is_source(Path::new("foo.c")));
        assert!(is_source(Path::new("foo.CC")));
        assert!(!is_source(Path::new("foo.hpp")));
    }

    #[test]
    fn test_implied_source() {
        let temp = TempDir::new().unwrap();
        let header = temp.path().join("widget.hpp");
        let source = temp.path().join("widget.cpp");
        fs::write(&header, "// widget.hpp").unwrap();
        fs::write(&source, "// widget.cpp").unwrap();

        assert_eq!(implied_source(&header), Some(source));
        assert_eq!(implied_source(&temp.path().join("orphan.hpp")), None);
    }
}
