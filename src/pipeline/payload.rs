//! Cleanup of free-form model output.
//!
//! Two entry points:
//!
//! * [`clean_text`]: for prose replies (questions, speech scripts, OCR).
//!   Strips fences, invisible characters, wrapping quotes and "Question:"
//!   style labels the model adds despite the prompt.
//! * [`extract_json`]: for structured replies (evaluations). Finds the JSON
//!   payload whether it is bare, fenced, or surrounded by chatter.
//!
//! Every rule is a pure `&str → String` pass so each can be tested alone.

use crate::error::ParseError;
use crate::pipeline::split::normalise_line_endings;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// ── Prose ────────────────────────────────────────────────────────────────

/// Apply the prose cleanup rules in order:
/// 1. Normalise line endings
/// 2. Strip an outer code fence
/// 3. Strip invisible Unicode
/// 4. Drop a leading label (`Question:`, `Script:`, …)
/// 5. Remove wrapping quotes
/// 6. Trim trailing whitespace per line and collapse blank runs
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = remove_invisible_chars(&s);
    let s = strip_leading_label(s.trim());
    let s = strip_wrapping_quotes(s.trim());
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Strip a single outer ```lang … ``` fence around the whole input.
pub fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCE.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

static RE_LEADING_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\*\*)?(?:question|audience question|script|speech|speaker notes)(?:\*\*)?\s*:(?:\*\*)?\s*")
        .unwrap()
});

fn strip_leading_label(input: &str) -> String {
    RE_LEADING_LABEL.replace(input, "").to_string()
}

fn strip_wrapping_quotes(input: &str) -> String {
    let pairs = [('"', '"'), ('\u{201C}', '\u{201D}'), ('\'', '\'')];
    for (open, close) in pairs {
        if input.len() >= 2 && input.starts_with(open) && input.ends_with(close) {
            let inner = &input[open.len_utf8()..input.len() - close.len_utf8()];
            if !inner.contains(open) && !inner.contains(close) {
                return inner.trim().to_string();
            }
        }
    }
    input.to_string()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Structured payloads ──────────────────────────────────────────────────

/// Extract the JSON payload from a model reply.
///
/// Tries, in order: the whole reply (after removing an outer fence), the
/// first fenced block anywhere in the reply, and finally the span from the
/// first `[`/`{` to its matching closer. Truncated payloads fail with
/// [`ParseError::Malformed`].
pub fn extract_json(input: &str) -> Result<Value, ParseError> {
    let normalised = remove_invisible_chars(&normalise_line_endings(input));
    let trimmed = normalised.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let unfenced = strip_outer_fence(trimmed);
    if let Ok(v) = serde_json::from_str::<Value>(&unfenced) {
        return Ok(v);
    }

    if let Some(block) = first_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(v);
        }
    }

    match balanced_span(&unfenced) {
        Some(span) => serde_json::from_str::<Value>(span)
            .map_err(|e| ParseError::Malformed(e.to_string())),
        None if unfenced.contains('[') || unfenced.contains('{') => Err(ParseError::Malformed(
            "unterminated JSON payload".to_string(),
        )),
        None => Err(ParseError::NoPayload),
    }
}

static RE_ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n(.*?)```").unwrap());

fn first_fenced_block(input: &str) -> Option<&str> {
    RE_ANY_FENCE
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Slice from the first `[` or `{` to its matching closer, honouring strings.
fn balanced_span(input: &str) -> Option<&str> {
    let start = input.find(['[', '{'])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&input[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────────────
