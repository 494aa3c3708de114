//! Macro environment
//!
//! Builds the initial macro table for one traversal from three sources,
//! in increasing priority: a live query of the compiler's built-in
//! predefined macros, `-D` tokens from the compile-flag strings, and a
//! small fixed set of platform/architecture identity macros filled in
//! only where the compiler query came back empty-handed.
//!
//! The table is traversal-scoped state: it is created per top-level
//! traversal and mutated by `#define`/`#undef` as files are visited, so
//! a define in one file affects conditional compilation in files
//! processed later in the same pass. It is never shared across
//! unrelated traversals.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

use headerhound_core::Config;
use tracing::debug;

use crate::toolchain;

/// Macro name -> value. An absent key means undefined: it evaluates to
/// `0` in expressions and `defined()` is false.
pub type MacroMap = HashMap<String, String>;

fn compiler_query_cache() -> &'static Mutex<HashMap<String, MacroMap>> {
    static CACHE: OnceLock<Mutex<HashMap<String, MacroMap>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Compiler built-in macros, memoized by compiler path. The query is
/// expensive (a process spawn) and referentially transparent for the
/// life of the process.
pub fn compiler_builtin_macros(compiler: &str) -> MacroMap {
    if let Some(cached) = compiler_query_cache()
        .lock()
        .ok()
        .and_then(|cache| cache.get(compiler).cloned())
    {
        return cached;
    }

    let macros = toolchain::query_builtin_macros(compiler);
    if let Ok(mut cache) = compiler_query_cache().lock() {
        cache.insert(compiler.to_string(), macros.clone());
    }
    macros
}

/// Drop memoized compiler queries.
pub fn clear_compiler_macro_cache() {
    if let Ok(mut cache) = compiler_query_cache().lock() {
        cache.clear();
    }
}

/// Build the seed macro table for one traversal.
pub fn seed_macros(config: &Config) -> MacroMap {
    let mut macros = compiler_builtin_macros(&config.compiler);

    // -D flags override compiler built-ins; later flag strings override
    // earlier ones on conflict.
    for flags in [&config.cppflags, &config.cflags, &config.cxxflags] {
        for (name, value) in parse_defines(flags) {
            macros.insert(name, value);
        }
    }

    add_platform_macros(&mut macros);
    add_architecture_macros(&mut macros);

    debug!("seeded {} macros for traversal", macros.len());
    macros
}

/// Extract `-D NAME[=VALUE]` tokens from a compile-flag string.
/// Both `-DNAME` and `-D NAME` forms are accepted; a bare `-DNAME`
/// defines the macro with value `1`.
pub fn parse_defines(flags: &str) -> Vec<(String, String)> {
    let mut defines = Vec::new();
    let mut tokens = flags.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let body = if token == "-D" {
            match tokens.next() {
                Some(next) => next,
                None => break,
            }
        } else if let Some(rest) = token.strip_prefix("-D") {
            rest
        } else {
            continue;
        };

        if body.is_empty() {
            continue;
        }
        match body.split_once('=') {
            Some((name, value)) => defines.push((name.to_string(), value.to_string())),
            None => defines.push((body.to_string(), "1".to_string())),
        }
    }

    defines
}

/// Platform identity macros, added only when the compiler query did not
/// already supply them.
fn add_platform_macros(macros: &mut MacroMap) {
    let names: &[&str] = if cfg!(target_os = "linux") {
        &["__linux__", "__unix__", "unix"]
    } else if cfg!(target_os = "windows") {
        &["_WIN32", "WIN32"]
    } else if cfg!(target_os = "macos") {
        &["__APPLE__", "__MACH__", "__unix__", "unix"]
    } else {
        &[]
    };

    for name in names {
        macros.entry((*name).to_string()).or_insert_with(|| "1".to_string());
    }
}

/// Host architecture identity macros, same fill-in-the-gaps policy.
fn add_architecture_macros(macros: &mut MacroMap) {
    let names: &[&str] = match std::env::consts::ARCH {
        "x86_64" => &["__x86_64__", "__amd64__", "__LP64__"],
        "x86" => &["__i386__", "__i386"],
        "aarch64" => &["__aarch64__", "__LP64__"],
        "arm" => &["__arm__"],
        "riscv64" => &["__riscv", "__riscv64__", "__LP64__"],
        "riscv32" => &["__riscv", "__riscv32__"],
        _ => &[],
    };

    for name in names {
        macros.entry((*name).to_string()).or_insert_with(|| "1".to_string());
    }
}

/// Deterministic fingerprint of the macro state, used as part of cache
/// keys: a result computed under one macro state must never be served
/// for another.
pub fn fingerprint(macros: &MacroMap) -> u64 {
    let mut entries: Vec<(&String, &String)> = macros.iter().collect();
    entries.sort();

    let mut hasher = DefaultHasher::new();
    for (name, value) in entries {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_defines_forms() {
        let defines = parse_defines("-I include -DFEATURE_A -D FEATURE_B=2 -DNAME=a=b -O2");
        assert_eq!(
            defines,
            vec![
                ("FEATURE_A".to_string(), "1".to_string()),
                ("FEATURE_B".to_string(), "2".to_string()),
                ("NAME".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_defines_empty() {
        assert!(parse_defines("-I . -fPIC -g -Wall").is_empty());
    }

    #[test]
    fn test_later_flag_strings_override() {
        let config = Config {
            compiler: "/no/such/compiler".to_string(),
            cppflags: "-DVERSION=1".to_string(),
            cxxflags: "-DVERSION=3".to_string(),
            ..Config::default()
        };
        let macros = seed_macros(&config);
        assert_eq!(macros.get("VERSION").map(String::as_str), Some("3"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_platform_macros_present() {
        let config = Config {
            compiler: "/no/such/compiler".to_string(),
            ..Config::default()
        };
        let macros = seed_macros(&config);
        assert_eq!(macros.get("__linux__").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_fingerprint_is_order_insensitive_and_value_sensitive() {
        let mut a = MacroMap::new();
        a.insert("FOO".into(), "1".into());
        a.insert("BAR".into(), "2".into());

        let mut b = MacroMap::new();
        b.insert("BAR".into(), "2".into());
        b.insert("FOO".into(), "1".into());

        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.insert("FOO".into(), "3".into());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
