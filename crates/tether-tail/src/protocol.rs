//! Transcript record model and event extraction.
//!
//! The agent appends one JSON record per line: `assistant` records carry
//! content blocks (text, thinking, tool_use), `user` records carry tool
//! results, and the remaining kinds (`system`, `summary`, `progress`,
//! `file-history-snapshot`) are bookkeeping the bridge does not relay.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use tether_core::{AgentEvent, ToolStatus};

/// Upper bound for a tool argument summary.
const MAX_ARGS_SUMMARY: usize = 80;
/// Upper bound for a tool result summary.
const MAX_RESULT_SUMMARY: usize = 200;

/// The input field worth showing per tool; everything else is noise
/// at chat-message size.
const SALIENT_INPUT: &[(&str, &str)] = &[
    ("Read", "file_path"),
    ("Write", "file_path"),
    ("Edit", "file_path"),
    ("Glob", "pattern"),
    ("Grep", "pattern"),
    ("Bash", "command"),
    ("WebFetch", "url"),
    ("WebSearch", "query"),
    ("Task", "description"),
];

/// Transcript decode error.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown record kind: {0:?}")]
    UnknownKind(String),
}

#[derive(Debug, Deserialize)]
struct AssistantRecord {
    #[serde(default)]
    message: AssistantMessage,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    message: UserMessage,
}

#[derive(Debug, Default, Deserialize)]
struct UserMessage {
    #[serde(default)]
    content: Option<UserContent>,
}

/// A user record's content is a plain string for typed input and a
/// block list when it carries tool results.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserContent {
    Text(String),
    Blocks(Vec<UserBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UserBlock {
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Decode one transcript line into zero or more [`AgentEvent`]s.
///
/// Pure; blank lines yield an empty vector. One record may yield
/// several events (an assistant turn often mixes text and tool use).
///
/// # Errors
/// Returns [`ParseError`] for undecodable JSON or an unrecognized
/// record kind; the caller logs and skips the record, the cursor
/// still moves past it.
pub fn parse_line(line: &str) -> Result<Vec<AgentEvent>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(line)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    match kind.as_str() {
        "assistant" => {
            let record: AssistantRecord = serde_json::from_value(value)?;
            Ok(assistant_events(record))
        }
        "user" => {
            let record: UserRecord = serde_json::from_value(value)?;
            Ok(user_events(record))
        }
        "system" | "summary" | "progress" | "file-history-snapshot" => Ok(Vec::new()),
        _ => Err(ParseError::UnknownKind(kind)),
    }
}

fn assistant_events(record: AssistantRecord) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    for block in record.message.content {
        match block {
            ContentBlock::Text { text } => {
                if !text.trim().is_empty() {
                    events.push(AgentEvent::Narration { text });
                }
            }
            ContentBlock::Thinking { thinking } => {
                if !thinking.trim().is_empty() {
                    events.push(AgentEvent::Reasoning { text: thinking });
                }
            }
            ContentBlock::ToolUse { id, name, input } => {
                let args_summary = summarize_tool_input(&name, &input);
                let tool_name = if name.is_empty() {
                    "unknown".to_owned()
                } else {
                    name
                };
                events.push(AgentEvent::ToolStart {
                    tool_id: id,
                    tool_name,
                    args_summary,
                });
            }
            ContentBlock::Other => {}
        }
    }
    events
}

fn user_events(record: UserRecord) -> Vec<AgentEvent> {
    let Some(UserContent::Blocks(blocks)) = record.message.content else {
        return Vec::new();
    };
    blocks
        .into_iter()
        .filter_map(|block| match block {
            UserBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(AgentEvent::ToolResult {
                tool_id: tool_use_id,
                status: if is_error {
                    ToolStatus::Failed
                } else {
                    ToolStatus::Ok
                },
                summary: clamp(&result_text(&content), MAX_RESULT_SUMMARY),
            }),
            UserBlock::Other => None,
        })
        .collect()
}

/// Pick the salient input field for the tool, falling back to the
/// first non-empty string value.
fn summarize_tool_input(name: &str, input: &Value) -> String {
    let Some(fields) = input.as_object() else {
        return String::new();
    };
    let keyed = SALIENT_INPUT
        .iter()
        .find(|(tool, _)| *tool == name)
        .and_then(|(_, key)| fields.get(*key));
    if let Some(value) = keyed {
        return clamp(&scalar_text(value), MAX_ARGS_SUMMARY);
    }
    fields
        .values()
        .find_map(|value| value.as_str().filter(|s| !s.is_empty()))
        .map_or_else(String::new, |s| clamp(s, MAX_ARGS_SUMMARY))
}

/// Flatten a tool result's content, which arrives as a plain string or
/// as a list of text blocks.
fn result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate to `max` characters with a trailing ellipsis, never
/// splitting a codepoint.
fn clamp(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
