//! File analysis
//!
//! Reads a file once (entire, or a byte-bounded prefix) and locates the
//! raw candidate positions of `#include` lines, magic-flag comment
//! lines, and preprocessor directives. The resolver and the magic flag
//! extractor both work from this single read so the file is not
//! re-scanned per concern. Conditional compilation is NOT applied here;
//! that is the caller's job.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use headerhound_core::Result;
use regex::Regex;
use tracing::debug;

/// Structured result of analyzing one file.
#[derive(Debug, Clone, Default)]
pub struct FileAnalysis {
    /// Text content, bounded by the configured max read size
    pub text: String,
    /// Byte offset and quoted/angled name of each uncommented
    /// `#include` statement, in source order
    pub include_positions: Vec<(usize, String)>,
    /// Byte offsets of `//#KEY=` magic flag lines. Lines inside
    /// `/* */` blocks are kept: the reference preprocessor's `-C -E`
    /// output keeps comments, and both strategies must agree.
    pub magic_positions: Vec<usize>,
    /// Byte offsets of preprocessor directives, keyed by directive name
    pub directive_positions: HashMap<String, Vec<usize>>,
    /// Whether the file was larger than the read bound. Callers may
    /// treat a truncated read as a correctness risk.
    pub truncated: bool,
}

fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Comment alternatives are listed first so commented-out
        // includes are consumed without producing a capture.
        Regex::new(r#"(?ms)/\*.*?\*/|//[^\n]*|^[ \t]*#[ \t]*include[ \t]*["<][ \t]*([^ \t">]+)[ \t]*[">]"#)
            .unwrap()
    })
}

fn magic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // //# must be adjacent; key is case-sensitive; value runs to end
        // of line verbatim.
        Regex::new(r"(?m)^[ \t]*//#([A-Za-z_][A-Za-z0-9_-]*)[ \t]*=[ \t]*([^\n]*)").unwrap()
    })
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^([ \t]*)#[ \t]*([A-Za-z_]+)").unwrap())
}

/// The `//#KEY=value` line pattern, shared with the magic flag extractor.
pub(crate) fn magic_flag_pattern() -> &'static Regex {
    magic_pattern()
}

/// Read and analyze a file. `max_read_size` of 0 means the entire file.
///
/// IO errors propagate; callers own the retry policy for transient
/// filesystem races.
pub fn analyze(path: &Path, max_read_size: usize) -> Result<FileAnalysis> {
    let (bytes, truncated) = read_bounded(path, max_read_size).map_err(|e| {
        debug!("failed to read {}: {}", path.display(), e);
        e
    })?;

    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok(analyze_text(text, truncated))
}

/// Analyze already-loaded text (used for the oracle's preprocessed output).
pub fn analyze_text(text: String, truncated: bool) -> FileAnalysis {
    let include_positions = find_include_positions(&text);
    let magic_positions = find_magic_positions(&text);
    let directive_positions = find_directive_positions(&text);

    FileAnalysis {
        text,
        include_positions,
        magic_positions,
        directive_positions,
        truncated,
    }
}

fn read_bounded(path: &Path, max_read_size: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();

    if max_read_size == 0 || file_size <= max_read_size as u64 {
        let mut bytes = Vec::with_capacity(file_size as usize);
        let mut reader = file;
        reader.read_to_end(&mut bytes)?;
        return Ok((bytes, false));
    }

    let mut bytes = vec![0u8; max_read_size];
    let mut reader = file;
    let mut filled = 0;
    while filled < max_read_size {
        let n = reader.read(&mut bytes[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    bytes.truncate(filled);
    Ok((bytes, file_size > filled as u64))
}

fn find_include_positions(text: &str) -> Vec<(usize, String)> {
    include_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?;
            let start = caps.get(0)?.start();
            Some((start, name.as_str().to_string()))
        })
        .collect()
}

fn find_magic_positions(text: &str) -> Vec<usize> {
    magic_pattern().find_iter(text).map(|m| m.start()).collect()
}

fn find_directive_positions(text: &str) -> HashMap<String, Vec<usize>> {
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for caps in directive_pattern().captures_iter(text) {
        let name = caps[2].to_string();
        // Position of the # character, not the leading whitespace.
        let hash_pos = caps.get(0).map(|m| m.start() + caps[1].len()).unwrap_or(0);
        positions.entry(name).or_default().push(hash_pos);
    }
    positions
}
