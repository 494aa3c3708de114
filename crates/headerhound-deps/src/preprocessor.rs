//! Conditional-compilation walk over a single file
//!
//! Tracks `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/`#endif` nesting and
//! reports which byte ranges of the file are active under the current
//! macro table. `#define` and `#undef` in active regions mutate the
//! table as they are encountered, so macros defined earlier in a file
//! gate conditionals later in the same file (and, through the caller's
//! shared table, in files included afterwards).

use tracing::{debug, trace};

use crate::expr;
use crate::macros::MacroMap;

/// One level of conditional nesting.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Text in the current branch is processed.
    active: bool,
    /// An `#else` was already seen at this level.
    seen_else: bool,
    /// Some earlier branch at this level was taken, so every
    /// subsequent `#elif`/`#else` is skipped no matter what it says.
    branch_taken: bool,
}

/// Evaluates conditional directives line by line, mutating `macros`
/// as active `#define`/`#undef` directives are seen.
pub struct ConditionalEvaluator<'m> {
    macros: &'m mut MacroMap,
    stack: Vec<Frame>,
}

impl<'m> ConditionalEvaluator<'m> {
    /// The directives this evaluator reacts to; anything else passes
    /// through untouched.
    pub const DIRECTIVES: [&'static str; 8] = [
        "if", "ifdef", "ifndef", "elif", "else", "endif", "define", "undef",
    ];

    pub fn new(macros: &'m mut MacroMap) -> Self {
        ConditionalEvaluator {
            macros,
            stack: Vec::new(),
        }
    }

    /// Walk `text` and return the half-open byte ranges that are active
    /// under the current macro table. Unterminated conditionals leave
    /// their frames on the stack; everything up to EOF in an active
    /// region is still reported.
    pub fn active_ranges(&mut self, text: &str) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut region_start = if self.is_active() { Some(0) } else { None };
        let mut offset = 0;

        let mut lines = text.split_inclusive('\n');
        while let Some(first) = lines.next() {
            let mut line_len = first.len();
            let mut logical = first.to_string();

            // Directives may continue across backslash-newline; join
            // them so the expression reaches the evaluator whole.
            if is_directive(first) {
                while ends_with_continuation(&logical) {
                    let trimmed = logical.trim_end_matches(['\n', '\r']);
                    let trimmed = &trimmed[..trimmed.len() - 1];
                    logical = format!("{} ", trimmed);
                    match lines.next() {
                        Some(cont) => {
                            line_len += cont.len();
                            logical.push_str(cont);
                        }
                        None => break,
                    }
                }

                let was_active = self.is_active();
                self.handle_directive(logical.trim());
                let now_active = self.is_active();

                if was_active && !now_active {
                    // Close the region before the directive line; the
                    // directive itself still counts as seen text.
                    if let Some(start) = region_start.take() {
                        ranges.push((start, offset + line_len));
                    }
                } else if !was_active && now_active {
                    region_start = Some(offset + line_len);
                }
            }

            offset += line_len;
        }

        if let Some(start) = region_start {
            if start < text.len() {
                ranges.push((start, text.len()));
            }
        }

        if !self.stack.is_empty() {
            debug!("unterminated conditional nesting: {} frames", self.stack.len());
        }
        ranges
    }

    /// True when a byte offset falls inside one of the active ranges.
    pub fn offset_active(ranges: &[(usize, usize)], offset: usize) -> bool {
        ranges.iter().any(|&(start, end)| offset >= start && offset < end)
    }

    fn is_active(&self) -> bool {
        self.stack.iter().all(|f| f.active)
    }

    /// Whether all frames above the innermost are active; a new `#elif`
    /// branch can only turn on if its enclosing context is live.
    fn outer_active(&self) -> bool {
        self.stack
            .iter()
            .rev()
            .skip(1)
            .all(|f| f.active)
    }

    fn handle_directive(&mut self, line: &str) {
        let Some((name, rest)) = split_directive(line) else {
            return;
        };

        match name {
            "ifdef" => {
                let cond = self.is_active() && self.macros.contains_key(first_word(rest));
                self.push(cond);
            }
            "ifndef" => {
                let cond = self.is_active() && !self.macros.contains_key(first_word(rest));
                self.push(cond);
            }
            "if" => {
                let cond = self.is_active() && expr::evaluate(rest, self.macros);
                self.push(cond);
            }
            "elif" => {
                let outer = self.outer_active();
                match self.stack.last().copied() {
                    Some(frame) if frame.seen_else || frame.branch_taken => {
                        if let Some(top) = self.stack.last_mut() {
                            top.active = false;
                        }
                    }
                    Some(_) => {
                        let should = outer && expr::evaluate(rest, self.macros);
                        if let Some(top) = self.stack.last_mut() {
                            top.active = should;
                            if should {
                                top.branch_taken = true;
                            }
                        }
                    }
                    None => trace!("stray #elif ignored"),
                }
            }
            "else" => {
                let outer = self.outer_active();
                if let Some(frame) = self.stack.last_mut() {
                    if frame.seen_else {
                        frame.active = false;
                    } else {
                        frame.seen_else = true;
                        frame.active = outer && !frame.branch_taken;
                        if frame.active {
                            frame.branch_taken = true;
                        }
                    }
                } else {
                    trace!("stray #else ignored");
                }
            }
            "endif" => {
                if self.stack.pop().is_none() {
                    trace!("stray #endif ignored");
                }
            }
            "define" => {
                if self.is_active() {
                    let (name, value) = parse_define(rest);
                    if !name.is_empty() {
                        self.macros.insert(name.to_string(), value.to_string());
                    }
                }
            }
            "undef" => {
                if self.is_active() {
                    self.macros.remove(first_word(rest));
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, cond: bool) {
        self.stack.push(Frame {
            active: cond,
            seen_else: false,
            branch_taken: cond,
        });
    }
}

fn is_directive(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn ends_with_continuation(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).ends_with('\\')
}

/// Split `# if FOO` into `("if", "FOO")`, tolerating space after `#`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic() && c != '_')
        .unwrap_or(rest.len());
    Some((&rest[..end], rest[end..].trim()))
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Extract name and value from a `#define` body. A function-like macro
/// keeps only its name (tracked for `defined()` checks); its body is
/// not expanded.
fn parse_define(rest: &str) -> (&str, &str) {
    let rest = rest.trim();
    let name_end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    let tail = &rest[name_end..];

    if tail.starts_with('(') {
        return (name, "1");
    }
    let value = tail.trim();
    if value.is_empty() {
        (name, "1")
    } else {
        (name, value)
    }
}
