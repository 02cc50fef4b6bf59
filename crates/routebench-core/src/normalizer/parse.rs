//! Locating the structured payload inside a raw reply.
//!
//! Providers wrap their answer in many ways: bare JSON, a Markdown code
//! fence, JSON embedded in prose, or a single endpoint label on its own line.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// ```json ... ``` (language tag optional)
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap();

    /// A bare endpoint label: one token, no whitespace, not ending in punctuation.
    static ref BARE_LABEL: Regex = Regex::new(r"^[A-Za-z0-9_.:/\-]*[A-Za-z0-9_]$").unwrap();
}

/// The recognizable shape found in a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    /// A JSON object; it may still lack an endpoint and every parameter.
    Object(Map<String, Value>),

    /// A single endpoint label; carries no parameters.
    Label(String),
}

/// Find the structured payload, or `None` if nothing is recognizable.
pub fn parse_reply(content: &str) -> Option<ParsedReply> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match value {
            Value::Object(map) => return Some(ParsedReply::Object(map)),
            Value::String(s) => return parse_label(&s),
            Value::Null => return Some(ParsedReply::Label("null".to_string())),
            _ => {}
        }
    }

    for caps in CODE_FENCE.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Some(map) = first_object(body.as_str()) {
                return Some(ParsedReply::Object(map));
            }
        }
    }

    if let Some(map) = first_object(trimmed) {
        return Some(ParsedReply::Object(map));
    }

    parse_label(trimmed)
}

fn parse_label(text: &str) -> Option<ParsedReply> {
    let label = text
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if label.lines().count() == 1 && BARE_LABEL.is_match(label) {
        Some(ParsedReply::Label(label.to_string()))
    } else {
        None
    }
}

/// The first balanced `{...}` block in `text` that parses as a JSON object.
///
/// Braces are paired in one forward pass; braces inside JSON string
/// literals are ignored once a block is open. Blocks are then tried in
/// order of their opening brace, so an outer object wins over its members.
fn first_object(text: &str) -> Option<Map<String, Value>> {
    let mut open = Vec::new();
    let mut blocks = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    blocks.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    blocks.sort_unstable_by_key(|&(start, _)| start);
    blocks
        .into_iter()
        .find_map(|(start, end)| match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}
