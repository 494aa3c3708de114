//! Magic build-flag extraction
//!
//! Source files declare their own build requirements in structured
//! comments of the form `//#KEY=value`. This module collects those
//! declarations from a file and everything it transitively includes,
//! honoring conditional compilation, and post-processes the keys that
//! have meaning to the build:
//!
//! * `SOURCE` values are resolved relative to the declaring file and
//!   must exist.
//! * `INCLUDE` values grow the include search path, which can in turn
//!   reveal more flags, so direct extraction iterates to a fixed point.
//! * `PKG-CONFIG` values are expanded through pkg-config into compile
//!   and link flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, warn};

use headerhound_core::{Config, Error, Result, StrategyKind};

use crate::headers::HeaderDeps;
use crate::preprocessor::ConditionalEvaluator;
use crate::{analyzer, fscache, macros, ordered_unique, retry_once, toolchain};

/// Direct extraction passes before assuming non-convergence.
const MAX_PASSES: usize = 5;

/// Flags keyed by magic name, each key holding its values in
/// first-encounter order. Key order is preserved for output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MagicFlags {
    order: Vec<String>,
    map: HashMap<String, Vec<String>>,
}

impl MagicFlags {
    pub fn new() -> Self {
        MagicFlags::default()
    }

    pub fn append(&mut self, key: &str, value: String) {
        if !self.map.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.map.entry(key.to_string()).or_default().push(value);
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Collapse duplicate values per key, preserving first-encounter
    /// order.
    fn dedup(&mut self) {
        for values in self.map.values_mut() {
            *values = ordered_unique(values);
        }
    }
}

impl Serialize for MagicFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for key in &self.order {
            map.serialize_entry(key, &self.map[key])?;
        }
        map.end()
    }
}

pub struct MagicExtractor {
    config: Config,
}

impl MagicExtractor {
    pub fn new(config: &Config) -> Self {
        MagicExtractor {
            config: config.clone(),
        }
    }

    /// Extract the magic flags reachable from `path`.
    pub fn parse(&self, path: &Path, deps: &HeaderDeps) -> Result<MagicFlags> {
        let realpath = fscache::realpath(path);
        match self.config.magic {
            StrategyKind::Direct => self.parse_direct(&realpath, deps),
            StrategyKind::Cpp => self.parse_cpp(&realpath),
        }
    }

    /// Direct extraction. `//#INCLUDE` flags change which headers are
    /// reachable and `-D` flags in discovered CPPFLAGS change which
    /// conditional branches are live, so re-run until the flag set
    /// stops changing.
    fn parse_direct(&self, realpath: &Path, deps: &HeaderDeps) -> Result<MagicFlags> {
        let mut previous: Option<MagicFlags> = None;

        for pass in 0..MAX_PASSES {
            let accumulated = previous.as_ref();
            let extra_dirs = accumulated
                .map(discovered_include_dirs)
                .unwrap_or_default();

            let mut seed = macros::seed_macros(&self.config);
            if let Some(flags) = accumulated {
                for key in ["CPPFLAGS", "CFLAGS", "CXXFLAGS"] {
                    for value in flags.get(key) {
                        for (name, val) in macros::parse_defines(value) {
                            seed.insert(name, val);
                        }
                    }
                }
            }

            let mut files = vec![realpath.to_path_buf()];
            files.extend(deps.direct_deps(realpath, &seed, &extra_dirs)?);

            let text = self.marked_text(&files, &seed);
            let flags = self.collect(&text, realpath)?;

            if previous.as_ref() == Some(&flags) {
                return Ok(flags);
            }
            debug!("magic flag pass {} found {} keys", pass, flags.order.len());
            previous = Some(flags);
        }

        warn!(
            "magic flags for {} did not stabilize in {} passes",
            realpath.display(),
            MAX_PASSES
        );
        Ok(previous.unwrap_or_default())
    }

    /// Preprocessor-backed extraction: `-C -E` keeps comments, and the
    /// emitted line markers attribute each flag to its declaring file.
    fn parse_cpp(&self, realpath: &Path) -> Result<MagicFlags> {
        let preprocessor = self.config.preprocessor().to_string();
        let cppflags = self.config.cppflags.clone();
        let text = retry_once(|| {
            toolchain::preprocess_keep_comments(&preprocessor, &cppflags, realpath)
        })?;
        self.collect(&text, realpath)
    }

    /// Concatenate the conditionally-active text of each file, each
    /// preceded by a line marker naming it. The macro table is shared
    /// across files in include order.
    fn marked_text(&self, files: &[PathBuf], seed: &macros::MacroMap) -> String {
        let mut macros = seed.clone();
        let mut out = String::new();
        for file in files {
            let analysis = match retry_once(|| analyzer::analyze(file, self.config.max_read_size))
            {
                Ok(analysis) => analysis,
                Err(e) => {
                    debug!("giving up on {}: {}", file.display(), e);
                    continue;
                }
            };
            let ranges = ConditionalEvaluator::new(&mut macros).active_ranges(&analysis.text);

            out.push_str(&format!("# 1 \"{}\"\n", file.display()));
            for (start, end) in ranges {
                out.push_str(&analysis.text[start..end]);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out
    }

    /// Collect `//#KEY=value` lines from marked-up text and
    /// post-process the keys with build semantics. The flag positions
    /// come from the shared analysis, so the extractor and the
    /// analyzer can never disagree about what counts as a flag line.
    fn collect(&self, text: &str, realpath: &Path) -> Result<MagicFlags> {
        let markers = file_markers(text, realpath);
        let analysis = analyzer::analyze_text(text.to_string(), false);
        let mut flags = MagicFlags::new();

        for pos in &analysis.magic_positions {
            let Some(caps) = analyzer::magic_flag_pattern().captures_at(text, *pos) else {
                continue;
            };
            let key = &caps[1];
            // The value is the remainder of the line verbatim; only a
            // CRLF carriage return is stripped.
            let value = caps[2].trim_end_matches('\r').to_string();
            let declaring = declaring_file(&markers, *pos);

            match key {
                "SOURCE" => {
                    let resolved = self.resolve_source(declaring, &value)?;
                    flags.append("SOURCE", resolved.display().to_string());
                }
                "INCLUDE" => {
                    flags.append("INCLUDE", value.clone());
                    let dir = resolve_relative(declaring, &value);
                    let flag = format!("-I {}", dir.display());
                    for target in ["CPPFLAGS", "CFLAGS", "CXXFLAGS"] {
                        flags.append(target, flag.clone());
                    }
                }
                "PKG-CONFIG" => {
                    flags.append("PKG-CONFIG", value.clone());
                    for package in value.split_whitespace() {
                        self.expand_pkg_config(package, &mut flags);
                    }
                }
                _ => flags.append(key, value),
            }
        }

        flags.dedup();
        Ok(flags)
    }

    /// A `//#SOURCE=` value names a file that must exist, resolved
    /// against the declaring file's directory.
    fn resolve_source(&self, declaring: &Path, value: &str) -> Result<PathBuf> {
        let resolved = resolve_relative(declaring, value);
        if fscache::is_file(&resolved) {
            Ok(fscache::realpath(&resolved))
        } else {
            Err(Error::MissingSource {
                file: declaring.to_path_buf(),
                flag: value.to_string(),
                resolved,
            })
        }
    }

    /// pkg-config cflags feed the compile flag variables with `-I`
    /// promoted to `-isystem` so third-party headers stay out of
    /// dependency results; libs feed LDFLAGS. A package pkg-config
    /// does not know degrades to a warning.
    fn expand_pkg_config(&self, package: &str, flags: &mut MagicFlags) {
        match toolchain::pkg_config(package) {
            Some((cflags, libs)) => {
                let cflags = cflags.trim().replace("-I", "-isystem ");
                if !cflags.is_empty() {
                    for target in ["CPPFLAGS", "CFLAGS", "CXXFLAGS"] {
                        flags.append(target, cflags.clone());
                    }
                }
                let libs = libs.trim();
                if !libs.is_empty() {
                    flags.append("LDFLAGS", libs.to_string());
                }
            }
            None => warn!("pkg-config could not resolve package {:?}", package),
        }
    }
}

/// `-I` directories already discovered through `//#INCLUDE`. The
/// CPPFLAGS entries carry them resolved to absolute paths, so the next
/// traversal pass can consume them directly.
fn discovered_include_dirs(flags: &MagicFlags) -> Vec<PathBuf> {
    flags
        .get("CPPFLAGS")
        .iter()
        .filter_map(|value| value.strip_prefix("-I "))
        .map(PathBuf::from)
        .collect()
}

fn resolve_relative(declaring: &Path, value: &str) -> PathBuf {
    let value = Path::new(value);
    if value.is_absolute() {
        return value.to_path_buf();
    }
    match declaring.parent() {
        Some(dir) => fscache::realpath(&dir.join(value)),
        None => value.to_path_buf(),
    }
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(?m)^# \d+ "([^"]+)""#).unwrap())
}

/// Byte offset and path of each `# <line> "<file>"` marker.
fn file_markers(text: &str, realpath: &Path) -> Vec<(usize, PathBuf)> {
    let mut markers = vec![(0, realpath.to_path_buf())];
    for caps in marker_pattern().captures_iter(text) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let path = path.as_str();
        // The preprocessor emits pseudo-files like <built-in>.
        if path.starts_with('<') {
            continue;
        }
        markers.push((whole.start(), PathBuf::from(path)));
    }
    markers
}

/// The file whose marker most recently precedes `offset`.
fn declaring_file(markers: &[(usize, PathBuf)], offset: usize) -> &Path {
    markers
        .iter()
        .rev()
        .find(|(pos, _)| *pos <= offset)
        .map(|(_, path)| path.as_path())
        .unwrap_or_else(|| Path::new(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn extract(config: &Config, path: &Path) -> Result<MagicFlags> {
        fscache::clear();
        let deps = HeaderDeps::new(config);
        MagicExtractor::new(config).parse(path, &deps)
    }

    fn config_for(dir: &Path) -> Config {
        Config {
            cppflags: format!("-I {}", dir.display()),
            ..Config::default()
        }
    }

    #[test]
    fn test_basic_flags() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("main.cpp"),
            "//#LDFLAGS=-lpthread\n//#CXXFLAGS=-std=c++17\nint main(){}\n",
        )
        .unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lpthread"]);
        assert_eq!(flags.get("CXXFLAGS"), ["-std=c++17"]);
    }

    #[test]
    fn test_flags_from_included_header() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("main.cpp"), "#include \"net.hpp\"\nint main(){}\n").unwrap();
        fs::write(root.join("net.hpp"), "//#LDFLAGS=-lcurl\n").unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lcurl"]);
    }

    #[test]
    fn test_conditional_flag_respects_macros() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("main.cpp"),
            "#ifdef WITH_SSL\n//#LDFLAGS=-lssl\n#endif\nint main(){}\n",
        )
        .unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert!(flags.get("LDFLAGS").is_empty());

        let config = Config {
            cppflags: format!("-DWITH_SSL -I {}", root.display()),
            ..Config::default()
        };
        let flags = extract(&config, &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lssl"]);
    }

    #[test]
    fn test_source_resolved_against_declaring_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(root.join("main.cpp"), "#include \"sub/widget.hpp\"\n").unwrap();
        fs::write(sub.join("widget.hpp"), "//#SOURCE=widget.cpp\n").unwrap();
        fs::write(sub.join("widget.cpp"), "").unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        let sources = flags.get("SOURCE");
        assert_eq!(sources.len(), 1);
        assert!(sources[0].ends_with("sub/widget.cpp"));
    }

    #[test]
    fn test_missing_source_is_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("main.cpp"), "//#SOURCE=ghost.cpp\n").unwrap();

        let err = extract(&config_for(root), &root.join("main.cpp")).unwrap_err();
        assert!(matches!(err, Error::MissingSource { .. }));
    }

    #[test]
    fn test_include_expands_search_path() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let vendored = root.join("vendored");
        fs::create_dir(&vendored).unwrap();
        fs::write(
            root.join("main.cpp"),
            "//#INCLUDE=vendored\n#include \"extra.hpp\"\nint main(){}\n",
        )
        .unwrap();
        fs::write(vendored.join("extra.hpp"), "//#LDFLAGS=-lextra\n").unwrap();

        let config = Config {
            cppflags: String::new(),
            ..Config::default()
        };
        let flags = extract(&config, &root.join("main.cpp")).unwrap();
        // The INCLUDE flag surfaced -I in the three compile flag vars
        // and the second pass found the header's own flags.
        assert!(flags.get("CPPFLAGS").iter().any(|f| f.starts_with("-I ")));
        assert_eq!(flags.get("LDFLAGS"), ["-lextra"]);
    }

    #[test]
    fn test_block_comment_flag_still_collected() {
        // The preprocessor strategy runs `-C -E`, which keeps block
        // comments, so a flag line inside one counts for both
        // strategies.
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("main.cpp"),
            "/*\n//#LDFLAGS=-lghost\n*/\nint main(){}\n",
        )
        .unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lghost"]);
    }

    #[test]
    fn test_value_kept_verbatim() {
        // Leading whitespace after `=` is consumed by the pattern;
        // everything after that is the value as written, trailing
        // whitespace included.
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("main.cpp"),
            "//#LDFLAGS= -lm -lz \n//#LIBS=pthread m\n",
        )
        .unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lm -lz "]);
        assert_eq!(flags.get("LIBS"), ["pthread m"]);
    }

    #[test]
    fn test_values_deduplicated_in_order() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("main.cpp"),
            "//#LDFLAGS=-lm\n//#LDFLAGS=-lz\n//#LDFLAGS=-lm\n",
        )
        .unwrap();

        let flags = extract(&config_for(root), &root.join("main.cpp")).unwrap();
        assert_eq!(flags.get("LDFLAGS"), ["-lm", "-lz"]);
    }

    #[test]
    fn test_declaring_file_attribution() {
        let text = "# 1 \"/a/main.cpp\"\n//#X=1\n# 1 \"/a/dep.hpp\"\n//#Y=2\n";
        let markers = file_markers(text, Path::new("/a/main.cpp"));
        let x_pos = text.find("//#X").unwrap();
        let y_pos = text.find("//#Y").unwrap();
        assert_eq!(declaring_file(&markers, x_pos), Path::new("/a/main.cpp"));
        assert_eq!(declaring_file(&markers, y_pos), Path::new("/a/dep.hpp"));
    }

    #[test]
    fn test_serializes_in_key_order() {
        let mut flags = MagicFlags::new();
        flags.append("LDFLAGS", "-lm".to_string());
        flags.append("CXXFLAGS", "-O2".to_string());
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, r#"{"LDFLAGS":["-lm"],"CXXFLAGS":["-O2"]}"#);
    }
}
