//! Response normalizer. Pulls a JSON object or array out of free-form
//! model text.
//!
//! Parsing is two-phase: a strict `serde_json` parse of the extracted
//! payload, then a best-effort repair pass for the usual LLM formatting
//! slips (trailing commas, unquoted keys, single quotes, comments, Python
//! literals, raw newlines in strings, truncated output).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ResponseShapeError;

/// Matches a fenced code block, capturing its interior. The closing fence is
/// optional so truncated output still yields the payload.
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)(?:```|\z)").expect("valid fence regex")
});

/// Parse model output into a JSON object or array.
///
/// Empty input yields an empty array. Bare scalars are rejected.
pub fn parse_json_from_model(content: &str) -> Result<Value, ResponseShapeError> {
    if content.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let normalized = normalize_escaped_newlines(content);
    let cleaned = extract_payload(&normalized);
    if cleaned.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => value,
        Err(strict_err) => {
            debug!(error = %strict_err, "Strict JSON parse failed, attempting repair");
            let repaired = repair_json(&cleaned);
            serde_json::from_str::<Value>(&repaired).map_err(|repair_err| {
                ResponseShapeError::Malformed {
                    reason: format!("{strict_err}; after repair: {repair_err}"),
                    cleaned: cleaned.clone(),
                }
            })?
        }
    };

    match value {
        Value::Array(_) | Value::Object(_) => Ok(value),
        other => Err(ResponseShapeError::InvalidShape {
            kind: value_kind(&other),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Turn literal `\n` escapes into newlines when the text has no real ones
/// (double-escaped model output).
fn normalize_escaped_newlines(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    if !text.contains('\n') && text.contains("\\n") {
        text.replace("\\r\\n", "\n").replace("\\n", "\n")
    } else {
        text
    }
}

/// Fenced block interior if present, else everything from the first `[` or `{`.
fn extract_payload(text: &str) -> String {
    if let Some(inner) = FENCE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim().to_string();
    }

    let trimmed = text.trim();
    match trimmed.find(['[', '{']) {
        Some(start) => trimmed[start..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Best-effort repair of near-valid JSON text.
///
/// Output is not guaranteed to parse; callers try and report failure.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut closers: Vec<char> = Vec::new();
    let mut opened = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '{' | '[' => {
                if matches!(last_significant(&out), Some('}' | ']')) {
                    out.push(',');
                }
                closers.push(if c == '{' { '}' } else { ']' });
                opened = true;
                out.push(c);
                i += 1;
            }
            '}' | ']' => {
                i += 1;
                let Some(pos) = closers.iter().rposition(|&x| x == c) else {
                    continue;
                };
                while closers.len() > pos {
                    if let Some(closer) = closers.pop() {
                        trim_trailing_comma(&mut out);
                        out.push(closer);
                    }
                }
                if closers.is_empty() && opened {
                    return out;
                }
            }
            c if (c.is_alphabetic() || c == '_' || c == '$')
                && matches!(last_significant(&out), None | Some('{' | '[' | ',' | ':')) =>
            {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = chars[i..]
                    .iter()
                    .find(|ch| !ch.is_whitespace())
                    .is_some_and(|&ch| ch == ':');

                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    match word.as_str() {
                        "true" | "True" => out.push_str("true"),
                        "false" | "False" => out.push_str("false"),
                        "null" | "None" | "undefined" | "NaN" => out.push_str("null"),
                        _ => {
                            out.push('"');
                            out.push_str(&word);
                            out.push('"');
                        }
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }
    out
}

/// Copy a quoted string starting at `start`, normalizing to double quotes and
/// escaping raw control characters. Returns the index after the string.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('\'') if quote == '\'' => out.push('\''),
                    Some(&next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => {}
                }
                i += 2;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => {
                out.push_str("\\\"");
                i += 1;
            }
            '\n' => {
                out.push_str("\\n");
                i += 1;
            }
            '\r' => {
                out.push_str("\\r");
                i += 1;
            }
            '\t' => {
                out.push_str("\\t");
                i += 1;
            }
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    // Unterminated string (truncated output).
    out.push('"');
    chars.len()
}

fn last_significant(out: &str) -> Option<char> {
    out.trim_end().chars().last()
}

fn trim_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    if out[..len].ends_with(',') {
        out.truncate(len - 1);
    }
}
