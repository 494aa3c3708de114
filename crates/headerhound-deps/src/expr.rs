//! Restricted `#if`/`#elif` expression evaluation
//!
//! The pipeline mirrors what a real preprocessor does at text level:
//! strip comments, expand `defined(X)`/`defined X`, substitute macro
//! values for identifiers (undefined -> 0), normalize C numeric
//! literals, then evaluate the remaining integer expression with C
//! operator precedence and short-circuit semantics.
//!
//! The evaluator deliberately supports only arithmetic, comparison,
//! logical, and bitwise/shift operators over integers: no function-like
//! macros, no string literals, no `sizeof`. Anything outside that
//! grammar evaluates to false rather than erroring.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::macros::MacroMap;

/// Macro substitution passes before giving up on convergence.
const MAX_SUBSTITUTION_PASSES: usize = 10;

/// Evaluate a directive expression against the macro table.
/// Any failure, malformed input, overflow, division by zero, or an
/// unconvergent macro chain, yields `false`, never an error.
pub fn evaluate(expr: &str, macros: &MacroMap) -> bool {
    evaluate_value(expr, macros).map(|v| v != 0).unwrap_or(false)
}

pub(crate) fn evaluate_value(expr: &str, macros: &MacroMap) -> Option<i64> {
    let expr = strip_comments(expr);
    let expr = expand_defined(&expr, macros);
    let expr = substitute_macros(&expr, macros);
    let expr = normalize_literals(&expr);
    eval_arith(&expr)
}

/// Strip `//` line comments and non-nested `/* */` block comments.
fn strip_comments(expr: &str) -> String {
    let expr = match expr.find("//") {
        Some(pos) => &expr[..pos],
        None => expr,
    };

    static BLOCK: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| Regex::new(r"/\*.*?\*/").unwrap());
    let cleaned = block.replace_all(expr, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Expand `defined(X)` and `defined X` to `1`/`0`.
fn expand_defined(expr: &str, macros: &MacroMap) -> String {
    static PAREN: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();
    let paren =
        PAREN.get_or_init(|| Regex::new(r"defined\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap());
    let bare = BARE.get_or_init(|| Regex::new(r"defined\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

    let expanded = paren.replace_all(expr, |caps: &regex::Captures| {
        if macros.contains_key(&caps[1]) { "1" } else { "0" }
    });
    bare.replace_all(&expanded, |caps: &regex::Captures| {
        if macros.contains_key(&caps[1]) { "1" } else { "0" }
    })
    .into_owned()
}

/// Substitute identifiers with macro values, iterating until the text
/// stops changing. Undefined identifiers become `0`; the logical
/// keywords `and`/`or`/`not` are left for the evaluator.
fn substitute_macros(expr: &str, macros: &MacroMap) -> String {
    let mut current = expr.to_string();
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        let next = substitute_once(&current, macros);
        if next == current {
            return current;
        }
        current = next;
    }

    if substitute_once(&current, macros) != current {
        warn!("macro substitution did not converge for expression: {}", expr);
    }
    current
}

fn substitute_once(expr: &str, macros: &MacroMap) -> String {
    let bytes = expr.as_bytes();
    let mut result = String::with_capacity(expr.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            // Copy an entire numeric literal, including hex/binary
            // digits and suffixes, so 0x1F is never treated as an
            // identifier.
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            result.push_str(&expr[start..i]);
        } else if b == b'_' || b.is_ascii_alphabetic() {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            let ident = &expr[start..i];
            if matches!(ident, "and" | "or" | "not") {
                result.push_str(ident);
            } else {
                match macros.get(ident) {
                    Some(value) => result.push_str(value),
                    None => result.push('0'),
                }
            }
        } else {
            result.push(b as char);
            i += 1;
        }
    }

    result
}

/// Normalize C numeric literals to plain decimal: hex `0x`, binary
/// `0b`, leading-zero octal, and `L`/`U` integer suffixes.
fn normalize_literals(expr: &str) -> String {
    static HEX: OnceLock<Regex> = OnceLock::new();
    static BIN: OnceLock<Regex> = OnceLock::new();
    static OCT: OnceLock<Regex> = OnceLock::new();
    static SUFFIX: OnceLock<Regex> = OnceLock::new();

    let hex = HEX.get_or_init(|| Regex::new(r"\b0[xX]([0-9A-Fa-f]+)[uUlL]*\b").unwrap());
    let bin = BIN.get_or_init(|| Regex::new(r"\b0[bB]([01]+)[uUlL]*\b").unwrap());
    let oct = OCT.get_or_init(|| Regex::new(r"\b0([0-7]+)[uUlL]*\b").unwrap());
    let suffix = SUFFIX.get_or_init(|| Regex::new(r"\b([0-9]+)[uUlL]+\b").unwrap());

    let expr = hex.replace_all(expr, |caps: &regex::Captures| {
        i64::from_str_radix(&caps[1], 16)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| caps[0].to_string())
    });
    let expr = bin.replace_all(&expr, |caps: &regex::Captures| {
        i64::from_str_radix(&caps[1], 2)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| caps[0].to_string())
    });
    let expr = oct.replace_all(&expr, |caps: &regex::Captures| {
        i64::from_str_radix(&caps[1], 8)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| caps[0].to_string())
    });
    suffix.replace_all(&expr, "$1").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    Num(i64),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    AndAnd,
    OrOr,
    Not,
    Tilde,
}

#[derive(Debug)]
enum Ast {
    Num(i64),
    Unary(Tok, Box<Ast>),
    Binary(Tok, Box<Ast>, Box<Ast>),
}

/// Tokenize a fully substituted expression. Anything outside digits,
/// whitespace, the operator set, parentheses, and the three logical
/// keywords is rejected.
fn tokenize(expr: &str) -> Option<Vec<Tok>> {
    let bytes = expr.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' => i += 1,
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // A stray letter here means an unnormalized literal.
                if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
                    return None;
                }
                toks.push(Tok::Num(expr[start..i].parse().ok()?));
            }
            b'a'..=b'z' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                match &expr[start..i] {
                    "and" => toks.push(Tok::AndAnd),
                    "or" => toks.push(Tok::OrOr),
                    "not" => toks.push(Tok::Not),
                    _ => return None,
                }
            }
            b'(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            b')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            b'+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            b'-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            b'*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            b'/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            b'%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            b'~' => {
                toks.push(Tok::Tilde);
                i += 1;
            }
            b'^' => {
                toks.push(Tok::BitXor);
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'<') {
                    toks.push(Tok::Shl);
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    toks.push(Tok::Shr);
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::EqEq);
                    i += 2;
                } else {
                    return None;
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    toks.push(Tok::Not);
                    i += 1;
                }
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    toks.push(Tok::AndAnd);
                    i += 2;
                } else {
                    toks.push(Tok::BitAnd);
                    i += 1;
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    toks.push(Tok::OrOr);
                    i += 2;
                } else {
                    toks.push(Tok::BitOr);
                    i += 1;
                }
            }
            b'\\' => i += 1, // leftover line continuation
            _ => return None,
        }
    }

    Some(toks)
}

/// Left binding power per C precedence; higher binds tighter.
fn binding_power(tok: Tok) -> Option<u8> {
    Some(match tok {
        Tok::OrOr => 1,
        Tok::AndAnd => 2,
        Tok::BitOr => 3,
        Tok::BitXor => 4,
        Tok::BitAnd => 5,
        Tok::EqEq | Tok::Ne => 6,
        Tok::Lt | Tok::Gt | Tok::Le | Tok::Ge => 7,
        Tok::Shl | Tok::Shr => 8,
        Tok::Plus | Tok::Minus => 9,
        Tok::Star | Tok::Slash | Tok::Percent => 10,
        _ => return None,
    })
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Tok> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.peek()?;
        self.pos += 1;
        Some(tok)
    }

    fn parse_primary(&mut self) -> Option<Ast> {
        match self.next()? {
            Tok::Num(v) => Some(Ast::Num(v)),
            Tok::LParen => {
                let inner = self.parse_expr(0)?;
                if self.next()? != Tok::RParen {
                    return None;
                }
                Some(inner)
            }
            op @ (Tok::Not | Tok::Tilde | Tok::Minus | Tok::Plus) => {
                let operand = self.parse_primary()?;
                Some(Ast::Unary(op, Box::new(operand)))
            }
            _ => None,
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Option<Ast> {
        let mut lhs = self.parse_primary()?;

        while let Some(op) = self.peek() {
            let bp = match binding_power(op) {
                Some(bp) if bp >= min_bp => bp,
                _ => break,
            };
            self.next();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Some(lhs)
    }
}

fn eval_ast(ast: &Ast) -> Option<i64> {
    match ast {
        Ast::Num(v) => Some(*v),
        Ast::Unary(op, operand) => {
            let v = eval_ast(operand)?;
            Some(match op {
                Tok::Not => i64::from(v == 0),
                Tok::Tilde => !v,
                Tok::Minus => v.wrapping_neg(),
                Tok::Plus => v,
                _ => return None,
            })
        }
        Ast::Binary(op, lhs, rhs) => {
            // Logical operators short-circuit like C, so a dead right
            // operand (e.g. a division by zero) never poisons the result.
            match op {
                Tok::AndAnd => {
                    if eval_ast(lhs)? == 0 {
                        return Some(0);
                    }
                    return Some(i64::from(eval_ast(rhs)? != 0));
                }
                Tok::OrOr => {
                    if eval_ast(lhs)? != 0 {
                        return Some(1);
                    }
                    return Some(i64::from(eval_ast(rhs)? != 0));
                }
                _ => {}
            }

            let l = eval_ast(lhs)?;
            let r = eval_ast(rhs)?;
            Some(match op {
                Tok::Plus => l.wrapping_add(r),
                Tok::Minus => l.wrapping_sub(r),
                Tok::Star => l.wrapping_mul(r),
                Tok::Slash => l.checked_div(r)?,
                Tok::Percent => l.checked_rem(r)?,
                Tok::Shl => {
                    if !(0..64).contains(&r) {
                        return None;
                    }
                    l.wrapping_shl(r as u32)
                }
                Tok::Shr => {
                    if !(0..64).contains(&r) {
                        return None;
                    }
                    l.wrapping_shr(r as u32)
                }
                Tok::Lt => i64::from(l < r),
                Tok::Gt => i64::from(l > r),
                Tok::Le => i64::from(l <= r),
                Tok::Ge => i64::from(l >= r),
                Tok::EqEq => i64::from(l == r),
                Tok::Ne => i64::from(l != r),
                Tok::BitAnd => l & r,
                Tok::BitXor => l ^ r,
                Tok::BitOr => l | r,
                _ => return None,
            })
        }
    }
}

fn eval_arith(expr: &str) -> Option<i64> {
    let toks = tokenize(expr)?;
    if toks.is_empty() {
        return None;
    }
    let mut parser = Parser { toks, pos: 0 };
    let ast = parser.parse_expr(0)?;
    if parser.pos != parser.toks.len() {
        return None;
    }
    eval_ast(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn macros(entries: &[(&str, &str)]) -> MacroMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_version_equality() {
        let m = macros(&[("VERSION", "3")]);
        assert!(evaluate("VERSION == 3", &m));
        assert!(!evaluate("VERSION == 2", &m));
        assert!(evaluate("VERSION != 2", &m));
    }

    #[test]
    fn test_undefined_macro_is_zero() {
        let m = MacroMap::new();
        assert!(!evaluate("FEATURE_A", &m));
        assert!(evaluate("FEATURE_A == 0", &m));
    }

    #[test]
    fn test_defined_forms() {
        let m = macros(&[("FOO", "1")]);
        assert!(evaluate("defined(FOO)", &m));
        assert!(evaluate("defined FOO", &m));
        assert!(!evaluate("defined(BAR)", &m));
        assert!(evaluate("defined(FOO) && !defined(BAR)", &m));
    }

    #[test]
    fn test_defined_with_zero_value() {
        // -DFEATURE_A=0: defined, but numerically false.
        let m = macros(&[("FEATURE_A", "0")]);
        assert!(evaluate("defined(FEATURE_A)", &m));
        assert!(!evaluate("FEATURE_A", &m));
    }

    #[test]
    fn test_numeric_literals() {
        let m = MacroMap::new();
        assert!(evaluate("0x10 == 16", &m));
        assert!(evaluate("0b101 == 5", &m));
        assert!(evaluate("010 == 8", &m));
        assert!(evaluate("100L == 100", &m));
        assert!(evaluate("2UL + 1 == 3", &m));
    }

    #[test]
    fn test_operator_precedence() {
        let m = MacroMap::new();
        assert!(evaluate("1 + 2 * 3 == 7", &m));
        assert!(evaluate("(1 | 2) == 3", &m));
        assert!(evaluate("1 << 3 == 8", &m));
        assert!(evaluate("6 & 3", &m));
        assert!(evaluate("7 % 4 == 3", &m));
        assert!(evaluate("~0 == -1", &m));
    }

    #[test]
    fn test_logical_operators() {
        let m = macros(&[("A", "1"), ("B", "0")]);
        assert!(evaluate("A && !B", &m));
        assert!(evaluate("B || A", &m));
        assert!(!evaluate("A && B", &m));
        // Word forms some codebases feed through -D values
        assert!(evaluate("A and not B", &m));
    }

    #[test]
    fn test_short_circuit() {
        let m = macros(&[("N", "0")]);
        assert!(!evaluate("N && 10 / N", &m));
        assert!(evaluate("1 || 10 / N", &m));
    }

    #[test]
    fn test_comments_stripped() {
        let m = macros(&[("A", "1")]);
        assert!(evaluate("A // enabled in this build", &m));
        assert!(evaluate("A /* inline */ == 1", &m));
    }

    #[test]
    fn test_macro_chain_substitution() {
        let m = macros(&[("OUTER", "INNER"), ("INNER", "4")]);
        assert!(evaluate("OUTER == 4", &m));
    }

    #[test]
    fn test_malformed_is_false() {
        let m = MacroMap::new();
        assert!(!evaluate("", &m));
        assert!(!evaluate("1 +", &m));
        assert!(!evaluate("(1", &m));
        assert!(!evaluate("\"string\"", &m));
        assert!(!evaluate("1 / 0", &m));
        assert!(!evaluate("sizeof(int) > 2", &m));
    }

    #[test]
    fn test_version_hex_comparison() {
        let m = macros(&[("__GNUC__", "11"), ("KERNEL_VERSION", "0x50f00")]);
        assert!(evaluate("__GNUC__ >= 7", &m));
        assert!(evaluate("KERNEL_VERSION >= 0x50000", &m));
    }
}
