//! Lenient reader for shell-style `KEY=VALUE` target files.
//!
//! The format is the one the OpenWRT build scripts have always accepted:
//! full-line and trailing `#` comments, optional single or double quotes, and
//! quoted values continued over several lines with a trailing `\`. Lines that
//! do not look like an assignment are skipped rather than rejected.
//!
//! Values are limited to word characters, whitespace, `-` and `.`. Anything
//! else ends the value, quoted or not, so `URL=http://x` yields `http`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use crate::error::{Error, Result};

/// Keys and values of one target file. Later assignments win.
pub type RawConfig = BTreeMap<String, String>;

/// Read and parse a target file. A missing file is not an error here: it
/// yields an empty map and the required-key validation reports it.
pub fn parse_file(path: &Path) -> Result<RawConfig> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(parse_str(&data)),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "target config not found; treating as empty");
            Ok(RawConfig::new())
        }
        Err(e) => Err(Error::from(e).context(format!("failed to read {}", path.display()))),
    }
}

pub fn parse_str(input: &str) -> RawConfig {
    let text = fold_quoted(&strip_comments(input));

    let mut out = RawConfig::new();
    for line in text.lines() {
        let Some((key, value)) = match_assignment(line) else {
            continue;
        };
        out.insert(collapse_whitespace(key), collapse_whitespace(value));
    }
    out
}

// Comment lines go entirely; a `#` ends every other physical line, quoted or
// not. Must run before `fold_quoted`.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let code = line.find('#').map_or(line, |i| &line[..i]);
        out.push_str(code);
        out.push('\n');
    }
    out
}

// Folds quoted values onto one line.
//
// A quote only opens a value when it directly follows `=`, and only when the
// same quote character closes it before the next `=`. An unmatched quote is
// left as a plain character.
fn fold_quoted(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' if i > 0 && chars[i - 1] == '=' => match closing_quote(&chars, i) {
                Some(end) => {
                    out.push(c);
                    push_folded(&mut out, &chars[i + 1..end]);
                    out.push(c);
                    i = end + 1;
                }
                None => {
                    out.push(c);
                    i += 1;
                }
            },
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn closing_quote(chars: &[char], open: usize) -> Option<usize> {
    let quote = chars[open];
    for (off, &c) in chars[open + 1..].iter().enumerate() {
        if c == quote {
            return Some(open + 1 + off);
        }
        if c == '=' {
            return None;
        }
    }
    None
}

fn push_folded(out: &mut String, body: &[char]) {
    let mut in_run = false;
    for &c in body {
        if c == '\\' || c.is_whitespace() {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn is_value_char(c: char) -> bool {
    is_key_char(c) || c.is_whitespace()
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

fn match_assignment(line: &str) -> Option<(&str, &str)> {
    let key_len = line
        .char_indices()
        .find(|&(_, c)| !is_key_char(c))
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    if key_len == 0 {
        return None;
    }
    let key = &line[..key_len];

    let rest = line[key_len..].strip_prefix('=')?;
    let rest = rest.strip_prefix(is_quote).unwrap_or(rest);
    let value_len = rest
        .char_indices()
        .find(|&(_, c)| !is_value_char(c))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());

    let leftover = rest[value_len..].trim_start_matches(is_quote).trim();
    if !leftover.is_empty() {
        tracing::warn!(
            key,
            leftover,
            "value truncated at an unsupported character (allowed: letters, digits, '_', '-', '.', spaces)"
        );
    }

    Some((key, &rest[..value_len]))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
