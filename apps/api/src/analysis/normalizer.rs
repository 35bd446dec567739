//! Turns raw model output into a JSON value.
//!
//! Models ignore "JSON only" often enough that a single `serde_json::from_str`
//! is not sufficient. Strategies run cheapest-first and the first one that
//! parses wins:
//!
//! 1. the whole text
//! 2. the contents of a markdown code fence
//! 3. the first balanced `{...}` / `[...]` substring
//! 4. the text with whitespace, BOM and zero-width characters trimmed

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const PREVIEW_CHARS: usize = 200;

/// Which bracket the balanced-substring search should look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
    /// Whichever of `{` or `[` appears first.
    Either,
}

impl JsonShape {
    fn opens_with(self, c: char) -> bool {
        match self {
            JsonShape::Object => c == '{',
            JsonShape::Array => c == '[',
            JsonShape::Either => c == '{' || c == '[',
        }
    }
}

#[derive(Debug, Error)]
#[error("no JSON value could be extracted from model output: {snippet}", snippet = preview(.raw))]
pub struct UnparsableResponseError {
    /// The untouched model output, kept for diagnostics.
    pub raw: String,
}

pub fn normalize(raw: &str, shape: JsonShape) -> Result<Value, UnparsableResponseError> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }

    if let Some(inner) = strip_code_fence(raw) {
        if let Ok(value) = serde_json::from_str(inner) {
            debug!("Normalized model output by stripping code fence");
            return Ok(value);
        }
    }

    if let Some(value) = find_balanced_json(raw, shape) {
        debug!("Normalized model output by balanced substring extraction");
        return Ok(value);
    }

    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || is_invisible(c));
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    Err(UnparsableResponseError {
        raw: raw.to_string(),
    })
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}')
}

/// Returns the body of the first ``` fence, without the language tag line.
/// An unterminated fence (truncated output) yields everything after it.
fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = match after_fence.find('\n') {
        Some(nl) if after_fence[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after_fence[body_start..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    Some(body.trim())
}

/// Scans for bracket-balanced substrings starting at each opening bracket of
/// the requested shape and returns the first one that parses. Brackets inside
/// string literals are ignored.
fn find_balanced_json(text: &str, shape: JsonShape) -> Option<Value> {
    for (start, c) in text.char_indices() {
        if !shape.opens_with(c) {
            continue;
        }
        if let Some(end) = balanced_end(&text[start..]) {
            let candidate = &text[start..start + end];
            if let Ok(value) = serde_json::from_str(candidate) {
                return Some(value);
            }
        }
    }
    None
}

/// Byte length of the balanced prefix of `text`, which starts with `{` or `[`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(raw: &str) -> String {
    let mut out: String = raw.chars().take(PREVIEW_CHARS).collect();
    if raw.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}
