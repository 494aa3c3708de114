//! Source hunting
//!
//! Starting from one translation unit, discover every source file that
//! must be compiled into the final binary. Requirements arrive three
//! ways and each can reveal more of the others, so the hunt runs a
//! worklist to completion:
//!
//! * headers reached through `#include`,
//! * companion sources implied by those headers (`widget.hpp` next to
//!   `widget.cpp` means widget.cpp is part of the build),
//! * explicit `//#SOURCE=` magic flags.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, trace};

use headerhound_core::{files, Config, Result};

use crate::fscache;
use crate::headers::HeaderDeps;
use crate::magic::{MagicExtractor, MagicFlags};

pub struct Hunter {
    deps: HeaderDeps,
    magic: MagicExtractor,
    memo: Mutex<HashMap<PathBuf, Vec<PathBuf>>>,
}

impl Hunter {
    pub fn new(config: &Config) -> Self {
        Hunter {
            deps: HeaderDeps::new(config),
            magic: MagicExtractor::new(config),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn header_deps(&self) -> &HeaderDeps {
        &self.deps
    }

    /// Every file the root translation unit pulls in: sources and
    /// headers both, sorted for deterministic output.
    pub fn required_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let realpath = fscache::realpath(root);
        if let Ok(memo) = self.memo.lock() {
            if let Some(cached) = memo.get(&realpath) {
                return Ok(cached.clone());
            }
        }

        let found = self.hunt(&realpath)?;
        let result: Vec<PathBuf> = found.into_iter().collect();

        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(realpath, result.clone());
        }
        Ok(result)
    }

    /// The sources among `required_files`, i.e. what actually gets
    /// compiled.
    pub fn required_source_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .required_files(root)?
            .into_iter()
            .filter(|p| files::is_source(p))
            .collect())
    }

    /// Magic flags of the root translation unit.
    pub fn magic_flags(&self, root: &Path) -> Result<MagicFlags> {
        let realpath = fscache::realpath(root);
        self.magic.parse(&realpath, &self.deps)
    }

    /// Drop memoized hunts along with the underlying dependency cache.
    pub fn clear_cache(&self) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
        self.deps.clear_cache();
    }

    fn hunt(&self, realpath: &Path) -> Result<BTreeSet<PathBuf>> {
        let mut found: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(realpath.to_path_buf());

        while let Some(file) = queue.pop_front() {
            if !found.insert(file.clone()) {
                continue;
            }
            trace!("hunting through {}", file.display());

            // A header with a sibling source of the same stem implies
            // that source belongs to the build.
            if files::is_header(&file) {
                if let Some(companion) = files::implied_source(&file) {
                    queue.push_back(fscache::realpath(&companion));
                }
            }

            for dep in self.deps.process(&file)? {
                queue.push_back(dep);
            }

            // Headers declare `//#SOURCE=` too, a hunt rooted at one
            // must honor it.
            let flags = self.magic.parse(&file, &self.deps)?;
            for source in flags.get("SOURCE") {
                queue.push_back(fscache::realpath(Path::new(source)));
            }
        }

        debug!(
            "hunt from {} found {} files",
            realpath.display(),
            found.len()
        );
        Ok(found)
    }
}
