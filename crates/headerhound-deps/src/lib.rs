//! HeaderHound Dependency Engine
//!
//! Given a root C/C++ source file, determine the transitive set of
//! headers and sources it depends on (honoring conditional compilation)
//! and the declarative build metadata (`//#KEY=value` magic flags)
//! embedded in those files.
//!
//! ## Modules
//!
//! - `macros` - macro environment seeded from compiler, flags, and platform
//! - `analyzer` - single-read file analysis locating include/magic/directive candidates
//! - `preprocessor` - conditional-compilation evaluator (`#if`/`#ifdef`/...)
//! - `expr` - restricted `#if` expression evaluation
//! - `headers` - transitive header dependency resolution (direct and cpp strategies)
//! - `magic` - magic flag extraction over the transitive file set
//! - `hunter` - fixed-point closure of files that must be compiled together
//! - `cache` - mtime-gated memoization
//! - `toolchain` - external compiler / preprocessor / pkg-config invocations
//! - `fscache` - memoized path existence and canonicalization lookups

pub mod analyzer;
pub mod cache;
pub mod expr;
pub mod fscache;
pub mod headers;
pub mod hunter;
pub mod macros;
pub mod magic;
pub mod preprocessor;
pub mod toolchain;

pub use headers::{HeaderDeps, IncludeTree};
pub use hunter::Hunter;
pub use macros::MacroMap;
pub use magic::{MagicExtractor, MagicFlags};
pub use preprocessor::ConditionalEvaluator;

use headerhound_core::Result;

/// Run `f`, retrying once on failure.
///
/// Transient IO races (a file vanishing mid-read, a permission flap)
/// are recovered by exactly one retry; a second failure propagates.
pub(crate) fn retry_once<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    match f() {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!("retrying after error: {}", first);
            f()
        }
    }
}

/// De-duplicate while preserving first-seen order.
pub(crate) fn ordered_unique<T: Clone + Eq + std::hash::Hash>(items: &[T]) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_ordered_unique() {
        let items = vec!["b", "a", "b", "c", "a"];
        assert_eq!(ordered_unique(&items), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_retry_once_recovers() {
        let mut calls = 0;
        let result: Result<u32> = retry_once(|| {
            calls += 1;
            if calls == 1 {
                Err(headerhound_core::Error::Other("flaky".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_retry_once_gives_up() {
        let mut calls = 0;
        let result: Result<u32> = retry_once(|| {
            calls += 1;
            Err(headerhound_core::Error::Other("broken".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
