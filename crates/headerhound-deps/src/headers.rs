//! Header dependency resolution
//!
//! Two interchangeable strategies compute the transitive set of local
//! headers a translation unit depends on:
//!
//! * `direct` walks `#include` statements itself, applying conditional
//!   compilation with a traversal-scoped macro table. Fast, no process
//!   spawns, and able to produce an include tree.
//! * `cpp` delegates to the real preprocessor (`-MM`) and parses the
//!   Make rule it emits. Slower but exact.
//!
//! Both return canonicalized paths, de-duplicated in first-encounter
//! order, never including the queried file itself. Results are cached
//! keyed by `(path, macro fingerprint)` and gated on file mtimes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, trace, warn};

use headerhound_core::{Config, Result, StrategyKind};

use crate::cache::MtimeCache;
use crate::preprocessor::ConditionalEvaluator;
use crate::{analyzer, fscache, macros, retry_once, toolchain};
use crate::macros::MacroMap;

pub struct HeaderDeps {
    config: Config,
    cache: MtimeCache<Vec<PathBuf>>,
}

impl HeaderDeps {
    pub fn new(config: &Config) -> Self {
        HeaderDeps {
            config: config.clone(),
            cache: MtimeCache::new(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.config.header_deps
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transitive header dependencies of `path` under the configured
    /// strategy, excluding `path` itself.
    pub fn process(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let realpath = fscache::realpath(path);
        let seed = macros::seed_macros(&self.config);
        let fingerprint = macros::fingerprint(&seed);

        if let Some(cached) = self.cache.get(&realpath, fingerprint) {
            return Ok(cached);
        }

        let deps = match self.config.header_deps {
            StrategyKind::Direct => self.direct_deps(&realpath, &seed, &[])?,
            StrategyKind::Cpp => self.cpp_deps(&realpath)?,
        };

        let mut tracked = deps.clone();
        tracked.push(realpath.clone());
        self.cache.put(&realpath, fingerprint, tracked, deps.clone());
        Ok(deps)
    }

    /// Direct traversal with caller-supplied additions to the macro
    /// table and the include search path. The magic flag extractor
    /// re-runs this as `//#INCLUDE` and `-D` flags accumulate.
    pub(crate) fn direct_deps(
        &self,
        realpath: &Path,
        seed_macros: &MacroMap,
        extra_include_dirs: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let mut search_dirs = include_dirs(&self.config);
        search_dirs.extend(extra_include_dirs.iter().cloned());

        let mut walk = DirectWalk {
            config: &self.config,
            search_dirs,
            macros: seed_macros.clone(),
            ancestors: Vec::new(),
            seen: Vec::new(),
        };
        walk.visit(realpath);

        Ok(walk
            .seen
            .into_iter()
            .filter(|p| p.as_path() != realpath)
            .collect())
    }

    fn cpp_deps(&self, realpath: &Path) -> Result<Vec<PathBuf>> {
        let preprocessor = self.config.preprocessor().to_string();
        let cppflags = self.config.cppflags.clone();
        let deps = retry_once(|| {
            toolchain::dependency_listing(&preprocessor, &cppflags, realpath)
        })?;

        let system_dirs = isystem_dirs(&self.config);
        Ok(deps
            .into_iter()
            .filter(|dep| !under_any(dep, &system_dirs))
            .collect())
    }

    /// Include tree rooted at `path`, built by direct traversal. The
    /// preprocessor strategy has no tree to offer, so this always walks
    /// directly; the flat dependency list still honors the strategy.
    pub fn include_tree(&self, path: &Path) -> Result<IncludeTree> {
        let realpath = fscache::realpath(path);
        let mut walk = DirectWalk {
            config: &self.config,
            search_dirs: include_dirs(&self.config),
            macros: macros::seed_macros(&self.config),
            ancestors: Vec::new(),
            seen: Vec::new(),
        };
        Ok(walk.visit_tree(&realpath))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// One direct traversal. The macro table is shared across the whole
/// walk so a `#define` in one header gates conditionals in the next.
struct DirectWalk<'c> {
    config: &'c Config,
    search_dirs: Vec<PathBuf>,
    macros: MacroMap,
    ancestors: Vec<PathBuf>,
    seen: Vec<PathBuf>,
}

impl DirectWalk<'_> {
    fn visit(&mut self, realpath: &Path) {
        if self.ancestors.iter().any(|p| p == realpath) {
            trace!("include cycle through {}", realpath.display());
            return;
        }
        if !self.seen.iter().any(|p| p == realpath) {
            self.seen.push(realpath.to_path_buf());
        }

        self.ancestors.push(realpath.to_path_buf());
        for child in self.active_includes(realpath) {
            self.visit(&child);
        }
        self.ancestors.pop();
    }

    fn visit_tree(&mut self, realpath: &Path) -> IncludeTree {
        let mut node = IncludeTree {
            path: realpath.to_path_buf(),
            children: Vec::new(),
        };
        if self.ancestors.iter().any(|p| p == realpath) {
            return node;
        }

        self.ancestors.push(realpath.to_path_buf());
        for child in self.active_includes(realpath) {
            node.children.push(self.visit_tree(&child));
        }
        self.ancestors.pop();
        node
    }

    /// Resolved targets of the `#include` statements that survive
    /// conditional compilation, in source order.
    fn active_includes(&mut self, realpath: &Path) -> Vec<PathBuf> {
        // One retry absorbs transient filesystem races; a second
        // failure degrades to an empty analysis for this file.
        let analysis = match retry_once(|| analyzer::analyze(realpath, self.config.max_read_size))
        {
            Ok(analysis) => analysis,
            Err(e) => {
                debug!("giving up on {}: {}", realpath.display(), e);
                analyzer::FileAnalysis::default()
            }
        };
        if analysis.truncated {
            warn!(
                "{} longer than {} bytes; includes past the bound are missed",
                realpath.display(),
                self.config.max_read_size
            );
        }

        // A file with no conditional or define directives needs no
        // evaluation pass; every include in it is active.
        let needs_eval = ConditionalEvaluator::DIRECTIVES
            .iter()
            .any(|d| analysis.directive_positions.contains_key(*d));
        let ranges = if needs_eval {
            ConditionalEvaluator::new(&mut self.macros).active_ranges(&analysis.text)
        } else {
            vec![(0, analysis.text.len())]
        };

        let mut resolved = Vec::new();
        for (pos, name) in &analysis.include_positions {
            if !ConditionalEvaluator::offset_active(&ranges, *pos) {
                continue;
            }
            match self.resolve(realpath, name) {
                Some(target) => resolved.push(target),
                None => debug!(
                    "could not resolve include {:?} from {}",
                    name,
                    realpath.display()
                ),
            }
        }
        resolved
    }

    /// Look for an include target relative to the including file's
    /// directory first, then along the `-I` search path. System headers
    /// that live elsewhere simply fail to resolve and are skipped.
    fn resolve(&self, including: &Path, name: &str) -> Option<PathBuf> {
        let name = Path::new(name);
        if let Some(dir) = including.parent() {
            let candidate = dir.join(name);
            if fscache::is_file(&candidate) {
                return Some(fscache::realpath(&candidate));
            }
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(name);
            if fscache::is_file(&candidate) {
                return Some(fscache::realpath(&candidate));
            }
        }
        None
    }
}

/// A resolved include hierarchy, serializable for tooling output.
#[derive(Debug, Clone, Serialize)]
pub struct IncludeTree {
    pub path: PathBuf,
    pub children: Vec<IncludeTree>,
}

impl IncludeTree {
    /// Indented text rendering, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&self.path.display().to_string());
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// `-I` directories from CPPFLAGS, CFLAGS, and CXXFLAGS, in order.
fn include_dirs(config: &Config) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for flags in [&config.cppflags, &config.cflags, &config.cxxflags] {
        dirs.extend(flag_dirs(flags, "-I"));
    }
    dedup_paths(dirs)
}

/// `-isystem` directories; dependencies under these are external and
/// excluded from results.
fn isystem_dirs(config: &Config) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for flags in [&config.cppflags, &config.cflags, &config.cxxflags] {
        dirs.extend(flag_dirs(flags, "-isystem"));
    }
    dedup_paths(dirs)
}

fn flag_dirs(flags: &str, flag: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut tokens = flags.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token == flag {
            if let Some(dir) = tokens.next() {
                dirs.push(fscache::realpath(Path::new(dir)));
            }
        } else if let Some(dir) = token.strip_prefix(flag) {
            if !dir.is_empty() {
                dirs.push(fscache::realpath(Path::new(dir)));
            }
        }
    }
    dirs
}

fn dedup_paths(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    dirs.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

fn under_any(path: &Path, dirs: &[PathBuf]) -> bool {
    dirs.iter()
        .any(|dir| dir.parent().is_some() && path.starts_with(dir))
}
