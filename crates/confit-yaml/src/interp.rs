//! Interpolation span and reference scanning.
//!
//! Two distinct scans share this module. Expression spans (`${...}` and
//! `$(...)`) mark text that is evaluated later; the scan is
//! balanced-bracket aware and only returns the outermost spans, with a
//! cheap substring prescreen so plain strings pay almost nothing.
//! Field references (`@some.path`, `&anchor`) are runs of path-safe
//! characters substituted at evaluation time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One outermost interpolation span in a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationSpan {
    /// Byte offset of the `$` sentinel
    pub start: usize,
    /// Byte offset one past the closing bracket
    pub end: usize,
    /// The text between the brackets
    pub expr: String,
}

impl InterpolationSpan {
    /// Whether a byte position falls inside this span.
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A `@`/`&` field reference found in an expression string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMatch {
    pub start: usize,
    pub end: usize,
    /// The referenced path with escapes cleaned (separator escapes kept)
    pub expr: String,
    /// `'@'` for keypath references, `'&'` for anchor references
    pub symbol: char,
}

const BOUNDARY_PAIRS: [(char, char); 2] = [('{', '}'), ('(', ')')];

/// Characters that terminate a field-reference path (structural
/// punctuation of the host expression grammar).
const INVALID_KEYPATH_CHARS: &str = "[]() ,+-*%<>!&|^~@#$?;{}\"'`";

/// Characters that keep their backslash when a reference is cleaned.
const SPECIAL_KEYPATH_CHARS: &str = "./\\";

fn is_escaped(text: &str, pos: usize) -> bool {
    let mut backslashes = 0;
    for ch in text[..pos].chars().rev() {
        if ch == '\\' {
            backslashes += 1;
        } else {
            break;
        }
    }
    backslashes % 2 == 1
}

/// Cheap prescreen: does the text contain any interpolation opener at all?
pub fn has_interpolation(text: &str) -> bool {
    BOUNDARY_PAIRS
        .iter()
        .any(|(open, _)| text.contains(&format!("${}", open)))
}

/// Locate the outermost `${...}` / `$(...)` spans in `text`.
///
/// Nested spans are left inside the captured expression text and handled
/// by recursion at evaluation time, not re-scanned here. A `$` preceded by
/// an odd number of backslashes is an escape and is skipped.
pub fn outermost_interpolation_exprs(text: &str) -> Vec<InterpolationSpan> {
    let mut matches = Vec::new();
    if !has_interpolation(text) {
        return matches;
    }

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() {
            let open = bytes[i + 1] as char;
            if let Some((_, close)) = BOUNDARY_PAIRS.iter().find(|(o, _)| *o == open) {
                if !is_escaped(text, i) {
                    if let Some(end) = scan_balanced(bytes, i + 1, open, *close) {
                        matches.push(InterpolationSpan {
                            start: i,
                            end,
                            expr: text[i + 2..end - 1].to_string(),
                        });
                        i = end;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    matches
}

/// Find the position one past the bracket closing the one at `start`.
fn scan_balanced(bytes: &[u8], start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
        i += 1;
    }
    None
}

/// Find `@path` and `&anchor` references in an expression string.
pub fn find_field_references(expr: &str) -> Vec<ReferenceMatch> {
    let mut matches = Vec::new();
    let chars: Vec<(usize, char)> = expr.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (pos, sym) = chars[i];
        if (sym == '@' || sym == '&') && !is_escaped(expr, pos) {
            let start = pos;
            let mut j = i + 1;
            let mut cleaned = String::new();
            while j < chars.len() {
                let (_, c) = chars[j];
                if c == '\\' && j + 1 < chars.len() {
                    let (_, next) = chars[j + 1];
                    if SPECIAL_KEYPATH_CHARS.contains(next) {
                        cleaned.push('\\');
                    }
                    cleaned.push(next);
                    j += 2;
                    continue;
                }
                if INVALID_KEYPATH_CHARS.contains(c) {
                    break;
                }
                cleaned.push(c);
                j += 1;
            }
            let end = chars.get(j).map(|(p, _)| *p).unwrap_or(expr.len());
            matches.push(ReferenceMatch {
                start,
                end,
                expr: cleaned,
                symbol: sym,
            });
            i = j;
            continue;
        }
        i += 1;
    }
    matches
}

static DOLLAR_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([a-zA-Z_][a-zA-Z0-9_]*)").expect("valid regex"));

/// Rewrite non-escaped `$VAR` shorthands to `${VAR}` so that the standard
/// interpolation machinery picks them up.
pub fn transform_dollar_vars(text: &str) -> String {
    if !text.contains('$') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in DOLLAR_VAR.captures_iter(text) {
        let m = caps.get(0).expect("match");
        if is_escaped(text, m.start()) {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str("${");
        out.push_str(&caps[1]);
        out.push('}');
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

/// A `$CAPITAL` context-variable occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextVarMatch {
    pub start: usize,
    pub end: usize,
    /// The variable name, without the `$`
    pub name: String,
}

static CONTEXT_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z][a-zA-Z0-9_]*)").expect("valid regex"));

/// Find `$CAPITAL` variables: loader-provided symbols substituted
/// immediately rather than deferred to interpolation.
pub fn find_context_vars(expr: &str) -> Vec<ContextVarMatch> {
    if !expr.contains('$') {
        return Vec::new();
    }
    CONTEXT_VAR
        .captures_iter(expr)
        .filter_map(|caps| {
            let m = caps.get(0).expect("match");
            if is_escaped(expr, m.start()) {
                return None;
            }
            Some(ContextVarMatch {
                start: m.start(),
                end: m.end(),
                name: caps[1].to_string(),
            })
        })
        .collect()
}

/// Strip the escape backslashes that protected interpolation openers.
pub fn unescape_interpolation(text: &str) -> String {
    if !text.contains("\\$") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'$') {
            // drop the backslash, keep the dollar
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_interpolation_fast_path() {
        assert!(outermost_interpolation_exprs("plain text").is_empty());
        assert!(outermost_interpolation_exprs("cost is $5").is_empty());
    }

    #[test]
    fn test_single_span() {
        let spans = outermost_interpolation_exprs("${1 + 2}");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 8);
        assert_eq!(spans[0].expr, "1 + 2");
    }

    #[test]
    fn test_embedded_span() {
        let spans = outermost_interpolation_exprs("value is ${x} here");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].expr, "x");
        assert_eq!(&"value is ${x} here"[spans[0].start..spans[0].end], "${x}");
    }

    #[test]
    fn test_nested_spans_outermost_only() {
        let spans = outermost_interpolation_exprs("${a + ${b}}");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].expr, "a + ${b}");
    }

    #[test]
    fn test_paren_spans() {
        let spans = outermost_interpolation_exprs("$(getenv('HOME'))");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].expr, "getenv('HOME')");
    }

    #[test]
    fn test_escaped_dollar_skipped() {
        assert!(outermost_interpolation_exprs("\\${not me}").is_empty());
        // double backslash un-escapes
        assert_eq!(outermost_interpolation_exprs("\\\\${yes}").len(), 1);
    }

    #[test]
    fn test_multiple_spans() {
        let spans = outermost_interpolation_exprs("${a} and ${b}");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].expr, "a");
        assert_eq!(spans[1].expr, "b");
    }

    #[test]
    fn test_field_references() {
        let refs = find_field_references("@a.b + &anchor");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].symbol, '@');
        assert_eq!(refs[0].expr, "a.b");
        assert_eq!(refs[1].symbol, '&');
        assert_eq!(refs[1].expr, "anchor");
    }

    #[test]
    fn test_field_reference_stops_at_punctuation() {
        let refs = find_field_references("(@x.y)+1");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].expr, "x.y");
        assert_eq!(&"(@x.y)+1"[refs[0].start..refs[0].end], "@x.y");
    }

    #[test]
    fn test_field_reference_escaped_separator_kept() {
        let refs = find_field_references("@a\\.b.c");
        assert_eq!(refs[0].expr, "a\\.b.c");
    }

    #[test]
    fn test_transform_dollar_vars() {
        assert_eq!(transform_dollar_vars("$DIR/cfg"), "${DIR}/cfg");
        assert_eq!(transform_dollar_vars("a $var b"), "a ${var} b");
        assert_eq!(transform_dollar_vars("\\$lit"), "\\$lit");
        assert_eq!(transform_dollar_vars("${x}"), "${x}");
    }

    #[test]
    fn test_find_context_vars() {
        let vars = find_context_vars("$DIR/sub/$FILE_STEM.yaml");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "DIR");
        assert_eq!(vars[1].name, "FILE_STEM");
        // lowercase and braced forms are not context variables
        assert!(find_context_vars("$dir ${DIR}").is_empty());
        assert!(find_context_vars("\\$DIR").is_empty());
    }

    #[test]
    fn test_unescape_interpolation() {
        assert_eq!(unescape_interpolation("\\${a}"), "${a}");
        assert_eq!(unescape_interpolation("plain"), "plain");
    }
}
