use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use shared::domain::Action;
use tracing::warn;

use crate::error::ActionError;

static ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[SYSTEM(?: CONTEXT)?:[\s\S]*?\]\s*").expect("annotation pattern")
});

static ANNOTATION_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[SYSTEM(?: CONTEXT)?:").expect("annotation opener pattern"));

static MARKER_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[<\[]UI_ACTION:").expect("marker pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub text: String,
    pub action: Option<Action>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MarkerSpan {
    start: usize,
    json_start: usize,
    json_end: usize,
    end: usize,
}

/// Splits finished assistant text into display text and at most one action.
///
/// An action whose JSON is unbalanced, invalid, or lacks `type`/`title` is
/// dropped; the text is still returned with annotations removed.
pub fn parse_ui_action(content: &str) -> ParsedMessage {
    if content.is_empty() {
        return ParsedMessage {
            text: String::new(),
            action: None,
        };
    }

    let cleaned = strip_annotations(content).trim().to_string();
    let Some(span) = find_marker(&cleaned) else {
        return ParsedMessage {
            text: cleaned,
            action: None,
        };
    };

    let json = cleaned[span.json_start..span.json_end].trim();
    match parse_action_json(json) {
        Ok(action) => {
            let before = cleaned[..span.start].trim();
            let after = cleaned[span.end..].trim();
            let text = match (before.is_empty(), after.is_empty()) {
                (_, true) => before.to_string(),
                (true, false) => after.to_string(),
                (false, false) => format!("{before}\n\n{after}"),
            };
            ParsedMessage {
                text,
                action: Some(action),
            }
        }
        Err(err) => {
            warn!(error = %err, json, "action: discarding malformed ui action");
            ParsedMessage {
                text: cleaned,
                action: None,
            }
        }
    }
}

/// Display-only rendering of text that may still be arriving: complete
/// markers are removed and everything from an unfinished marker onwards is
/// hidden.
pub fn strip_ui_action(content: &str) -> String {
    let mut cleaned = strip_annotations(content);
    if let Some(open) = ANNOTATION_OPEN.find(&cleaned) {
        cleaned.truncate(open.start());
    }

    while let Some(span) = find_marker(&cleaned) {
        cleaned.replace_range(span.start..span.end, "");
    }

    if let Some(open) = MARKER_OPEN.find(&cleaned) {
        cleaned.truncate(open.start());
    }

    cleaned.trim().to_string()
}

pub fn has_ui_action(content: &str) -> bool {
    MARKER_OPEN.is_match(content)
}

fn strip_annotations(content: &str) -> String {
    ANNOTATION.replace_all(content, "").into_owned()
}

fn find_marker(content: &str) -> Option<MarkerSpan> {
    let open = MARKER_OPEN.find(content)?;
    let bytes = content.as_bytes();
    let json_start = open.end();

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut json_end = None;

    for (offset, &byte) in bytes[json_start..].iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    json_end = Some(json_start + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let json_end = json_end?;
    let mut end = json_end;
    while end < bytes.len() {
        match bytes[end] {
            b']' | b'>' => {
                end += 1;
                break;
            }
            b' ' | b'\n' | b'\r' => end += 1,
            _ => break,
        }
    }

    Some(MarkerSpan {
        start: open.start(),
        json_start,
        json_end,
        end,
    })
}

fn parse_action_json(json: &str) -> Result<Action, ActionError> {
    let value: Value = serde_json::from_str(json)?;
    for field in ["type", "title"] {
        let present = value
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty());
        if !present {
            return Err(ActionError::MissingField(field));
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "tests/action_tests.rs"]
mod tests;
