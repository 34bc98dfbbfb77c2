//! Dependency pattern matching.
//!
//! A pattern is one of:
//! - a bare `name-version_revision` (exact equality),
//! - `name<op>version` with `<op>` in `< <= = != >= >`, chains allowed
//!   (`name>=1.0<2.0`),
//! - `name-<glob>` with shell-style `? * [..]` plus `{a,b,c}` brace
//!   alternation.

use crate::version::{compare_versions, pkg_name, pkg_version};
use std::cmp::Ordering;

/// Match bits for relational conditions: less, equal, greater.
const MATCH_LT: u8 = 1;
const MATCH_EQ: u8 = 2;
const MATCH_GT: u8 = 4;

/// Match a concrete `pkgver` against a dependency pattern.
pub fn pattern_match(pkgver: &str, pattern: &str) -> bool {
    if pkgver == pattern {
        return true;
    }
    match find_condition(pattern) {
        Some(cond_idx) => {
            let name_pat = &pattern[..cond_idx];
            // Conditions apply to the version part; the glob applies to
            // the bare package name.
            let name = pkg_name(pkgver).unwrap_or(pkgver);
            if !glob_match(name_pat, name) {
                return false;
            }
            let version = pkg_version(pkgver).unwrap_or("");
            match_conditions(version, &pattern[cond_idx..])
        }
        None => glob_match(pattern, pkgver),
    }
}

/// Extract the package name a pattern refers to.
///
/// `foo>=1.0` and `foo<2.0>=1.0` yield `foo`; `foo-1.0_1` yields `foo`;
/// `foo-1.[0-9]*` yields `foo` (glob truncated at the first metacharacter,
/// then stripped at the final dash).
pub fn pattern_name(pattern: &str) -> Option<String> {
    if let Some(idx) = find_condition(pattern) {
        let name = &pattern[..idx];
        return (!name.is_empty()).then(|| name.to_string());
    }
    if let Some(meta) = pattern.find(['*', '?', '[', '{']) {
        let prefix = &pattern[..meta];
        let (name, _) = prefix.rsplit_once('-')?;
        return (!name.is_empty()).then(|| name.to_string());
    }
    pkg_name(pattern).map(str::to_string)
}

/// Find the byte offset of the first relational condition, backing up
/// over the `!` of a `!=`.
fn find_condition(pattern: &str) -> Option<usize> {
    let idx = pattern.find(['>', '<', '='])?;
    if idx > 0 && pattern.as_bytes()[idx - 1] == b'!' {
        Some(idx - 1)
    } else {
        Some(idx)
    }
}

/// Evaluate a chain of relational conditions against a bare version.
fn match_conditions(version: &str, mut conditions: &str) -> bool {
    while !conditions.is_empty() {
        let bytes = conditions.as_bytes();
        let (mask, oplen) = match bytes[0] {
            b'<' if bytes.get(1) == Some(&b'=') => (MATCH_LT | MATCH_EQ, 2),
            b'<' => (MATCH_LT, 1),
            b'>' if bytes.get(1) == Some(&b'=') => (MATCH_GT | MATCH_EQ, 2),
            b'>' => (MATCH_GT, 1),
            b'!' if bytes.get(1) == Some(&b'=') => (MATCH_LT | MATCH_GT, 2),
            b'=' => (MATCH_EQ, 1),
            _ => return false,
        };
        let rest = &conditions[oplen..];
        let end = rest.find(['<', '>', '=', '!']).unwrap_or(rest.len());
        let wanted = &rest[..end];
        if wanted.is_empty() {
            return false;
        }
        let bit = match compare_versions(version, wanted) {
            Ordering::Less => MATCH_LT,
            Ordering::Equal => MATCH_EQ,
            Ordering::Greater => MATCH_GT,
        };
        if mask & bit == 0 {
            return false;
        }
        conditions = &rest[end..];
    }
    true
}

/// Shell-style glob match with csh `{a,b,c}` alternation.
///
/// Alternatives are expanded outermost-first and each expansion is
/// retried recursively, so nested braces work.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut depth = 0usize;
    let mut start = None;
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => {
                // A bracket expression hides any braces inside it.
                let mut j = i + 1;
                if matches!(bytes.get(j), Some(b'!' | b'^')) {
                    j += 1;
                }
                if bytes.get(j) == Some(&b']') {
                    j += 1;
                }
                while j < bytes.len() && bytes[j] != b']' {
                    j += 1;
                }
                if j < bytes.len() {
                    i = j;
                }
            }
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth == 1 {
                    let open = start.unwrap_or(0);
                    return expand_braces(pattern, open, i, text);
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
        i += 1;
    }
    fnmatch(pattern, text)
}

fn expand_braces(pattern: &str, open: usize, close: usize, text: &str) -> bool {
    let prefix = &pattern[..open];
    let body = &pattern[open + 1..close];
    let postfix = &pattern[close + 1..];
    let mut depth = 0usize;
    let mut last = 0usize;
    let bytes = body.as_bytes();
    for i in 0..=bytes.len() {
        let at_end = i == bytes.len();
        if !at_end {
            match bytes[i] {
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if at_end || (bytes[i] == b',' && depth == 0) {
            let candidate = format!("{prefix}{}{postfix}", &body[last..i]);
            if glob_match(&candidate, text) {
                return true;
            }
            last = i + 1;
        }
    }
    false
}

/// `fnmatch(3)` subset: `*`, `?`, `[...]` with `!`/`^` negation and
/// ranges, backslash escapes.
fn fnmatch(pattern: &str, text: &str) -> bool {
    fnmatch_chars(&pattern.chars().collect::<Vec<_>>(), &text.chars().collect::<Vec<_>>())
}

fn fnmatch_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            // Collapse the star and try every split point.
            for skip in 0..=text.len() {
                if fnmatch_chars(&pattern[1..], &text[skip..]) {
                    return true;
                }
            }
            false
        }
        Some('?') => !text.is_empty() && fnmatch_chars(&pattern[1..], &text[1..]),
        Some('[') => {
            let Some(&c) = text.first() else { return false };
            match bracket_match(&pattern[1..], c) {
                Some((matched, consumed)) => {
                    matched && fnmatch_chars(&pattern[1 + consumed..], &text[1..])
                }
                // Unterminated set matches a literal '['.
                None => c == '[' && fnmatch_chars(&pattern[1..], &text[1..]),
            }
        }
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && fnmatch_chars(&pattern[2..], &text[1..])
        }
        Some(&p) => text.first() == Some(&p) && fnmatch_chars(&pattern[1..], &text[1..]),
    }
}

/// Match `c` against a bracket expression body (after the `[`).
///
/// Returns `(matched, chars consumed including the closing bracket)`, or
/// `None` when the expression is unterminated.
fn bracket_match(body: &[char], c: char) -> Option<(bool, usize)> {
    let mut i = 0;
    let negated = matches!(body.first(), Some('!' | '^'));
    if negated {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < body.len() {
        if body[i] == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' {
            if body[i] <= c && c <= body[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if body[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
