//! Turns captured answer text into the payload relayed to the caller.
//!
//! Free-form tasks pass the text through untouched. Structured tasks must yield
//! JSON; Ask Studio tends to wrap it in prose or code fences and often emits
//! slightly broken JSON, so each candidate span is tried as-is and then again
//! after [`fix_common_issues`]. Unparseable text is still forwarded, wrapped
//! in a failure payload.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ANCHOR_KEYS;
use crate::types::{CaptureResult, Payload};

pub const INVALID_STRUCTURED: &str = "invalid structured response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    CodeBlock,
    AnchoredObject,
    OutermostObject,
    ScheduleArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub value: Value,
    pub strategy: ParseStrategy,
    /// The span only parsed after [`fix_common_issues`].
    pub repaired: bool,
}

pub fn extract(text: &str, structured: bool) -> CaptureResult {
    if !structured {
        return CaptureResult {
            success: true,
            payload: Payload::Text(text.to_string()),
            error: None,
        };
    }

    match parse_structured(text) {
        Some(parsed) => {
            debug!(strategy = ?parsed.strategy, repaired = parsed.repaired, "structured response parsed");
            CaptureResult {
                success: true,
                payload: Payload::Structured(parsed.value),
                error: None,
            }
        }
        None => {
            warn!(len = text.len(), "captured text is not valid JSON");
            CaptureResult {
                success: false,
                payload: Payload::Structured(json!({
                    "error": INVALID_STRUCTURED,
                    "rawResponse": text,
                    "success": false,
                })),
                error: Some(INVALID_STRUCTURED.to_string()),
            }
        }
    }
}

pub fn parse_structured(text: &str) -> Option<Parsed> {
    let trimmed = text.trim();
    if let Some(parsed) = attempt(trimmed, ParseStrategy::Direct) {
        return Some(parsed);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Some(parsed) = attempt(block, ParseStrategy::CodeBlock) {
            return Some(parsed);
        }
    }

    // Outer spans first so a nested object never stands in for the answer.
    let anchored = anchored_objects(trimmed, ANCHOR_KEYS);
    for span in anchored.iter().rev() {
        if let Some(parsed) = attempt(span, ParseStrategy::AnchoredObject) {
            return Some(parsed);
        }
    }

    if let Some(object) = outermost(trimmed, '{', '}') {
        if let Some(parsed) = attempt(object, ParseStrategy::OutermostObject) {
            return Some(parsed);
        }
    }

    // A lone array is only trusted when no object claims the anchor keys;
    // otherwise it would be a fragment of a broken answer.
    if anchored.is_empty() && (trimmed.contains("schedule") || trimmed.contains("pillar")) {
        if let Some(array) = outermost(trimmed, '[', ']') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(array) {
                return Some(Parsed {
                    value: json!({ "schedule": items }),
                    strategy: ParseStrategy::ScheduleArray,
                    repaired: false,
                });
            }
        }
    }

    None
}

fn attempt(span: &str, strategy: ParseStrategy) -> Option<Parsed> {
    if let Ok(value) = serde_json::from_str::<Value>(span) {
        return Some(Parsed {
            value,
            strategy,
            repaired: false,
        });
    }
    serde_json::from_str::<Value>(&fix_common_issues(span))
        .ok()
        .map(|value| Parsed {
            value,
            strategy,
            repaired: true,
        })
}

static ZERO_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{200B}-\u{200D}\u{FEFF}]").expect("zero-width regex"));
static UNQUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("unquoted key regex"));

/// Line breaks where a comma was dropped between two members or elements.
static MISSING_COMMA_LINE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(")\s*\n\s*(")"#,
        r#"([}\]])\s*\n\s*([{"])"#,
        r#"(\d|true|false|null)\s*\n\s*(")"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("missing comma regex"))
    .collect()
});

static MISSING_COMMA_INLINE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r#"("[^"\n]*")[ \t]{2,}("[^"\n]+"\s*:)"#, r"(\})\s+(\{)", r"(\])\s+(\[)"]
        .iter()
        .map(|p| Regex::new(p).expect("missing comma regex"))
        .collect()
});

/// Repairs the JSON slips Ask Studio makes most: zero-width characters,
/// single-quoted strings, unquoted keys, missing commas between members,
/// doubled colons and trailing commas.
pub fn fix_common_issues(text: &str) -> String {
    let mut fixed = ZERO_WIDTH.replace_all(text, "").into_owned();

    if !fixed.contains('"') {
        fixed = fixed.replace('\'', "\"");
    }

    fixed = UNQUOTED_KEY.replace_all(&fixed, "${1}\"${2}\":").into_owned();

    for re in MISSING_COMMA_LINE.iter() {
        fixed = re.replace_all(&fixed, "${1},\n${2}").into_owned();
    }
    for re in MISSING_COMMA_INLINE.iter() {
        fixed = re.replace_all(&fixed, "${1}, ${2}").into_owned();
    }

    strip_trailing_commas(&fixed.replace("::", ":"))
}

/// Body of the first ``` fence, with an optional `json` tag removed.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn outermost(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = balanced_end(text, start, open, close)?;
    Some(&text[start..=end])
}

/// Byte index of the bracket closing the one at `start`, skipping brackets
/// inside JSON string literals. `None` while the span is still unbalanced.
pub(crate) fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Every closed object that spans the last anchor key, innermost first.
fn anchored_objects<'t>(text: &'t str, anchors: &[&str]) -> Vec<&'t str> {
    let Some(key) = anchors.iter().filter_map(|anchor| text.rfind(anchor)).max() else {
        return Vec::new();
    };

    let mut spans = Vec::new();
    let mut search_end = key;
    while let Some(open) = text[..search_end].rfind('{') {
        if let Some(close) = balanced_end(text, open, '{', '}') {
            if close > key {
                spans.push(&text[open..=close]);
            }
        }
        search_end = open;
    }
    spans
}

/// Innermost object around the last occurrence of any anchor key, provided
/// it is already closed.
pub(crate) fn last_anchored_object<'t>(text: &'t str, anchors: &[String]) -> Option<&'t str> {
    let key = anchors
        .iter()
        .filter_map(|anchor| text.rfind(anchor.as_str()))
        .max()?;

    let mut search_end = key;
    while let Some(open) = text[..search_end].rfind('{') {
        match balanced_end(text, open, '{', '}') {
            Some(close) if close > key => return Some(&text[open..=close]),
            Some(_) => search_end = open,
            None => return None,
        }
    }
    None
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}
