// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Normalization of provider completions into [`ParsedResponse`].
//!
//! Two tool-call encodings are recognized:
//!
//! 1. **Native** — the provider's structured tool-call list. Argument strings
//!    are parsed as JSON; a malformed argument string degrades to `{}` rather
//!    than failing the whole turn.
//! 2. **Embedded JSON** — a line in the assistant text of the form
//!    `{"tool": "<name>", "args": {…}}`. Models running without native
//!    tool-call support fall back to this; at most one is honored per
//!    message and the line is removed from the surviving text.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{Completion, ParsedResponse, ToolCallRequest};

/// Normalize a raw [`Completion`] into a [`ParsedResponse`].
pub fn parse_response(completion: Completion) -> ParsedResponse {
    let mut out = ParsedResponse {
        reasoning: completion.reasoning,
        ..Default::default()
    };

    for raw in completion.tool_calls {
        if raw.name.is_empty() {
            warn!(tool_call_id = %raw.id, "dropping tool call with empty name");
            continue;
        }
        let args = parse_args(&raw.name, &raw.id, &raw.arguments);
        let id = if raw.id.is_empty() {
            synthetic_id()
        } else {
            raw.id
        };
        out.tool_calls.push(ToolCallRequest {
            id,
            name: raw.name,
            args,
        });
    }

    if let Some(text) = completion.text {
        if out.tool_calls.is_empty() {
            // Only scan for the embedded-JSON form when the provider produced
            // no native tool calls; mixing the two would double-dispatch.
            let (remaining, embedded) = extract_embedded_call(&text);
            if let Some(call) = embedded {
                out.tool_calls.push(call);
            }
            if !remaining.is_empty() {
                out.text = Some(remaining);
            }
        } else if !text.is_empty() {
            out.text = Some(text);
        }
    }

    out
}

fn synthetic_id() -> String {
    format!("tc_{}", Uuid::new_v4().simple())
}

/// Parse a native argument string, substituting `{}` when it is empty or
/// not valid JSON. Providers occasionally truncate or mangle the argument
/// payload; the tool layer's schema validation produces the actionable
/// error message in that case.
fn parse_args(name: &str, id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(other) => {
            warn!(tool = name, tool_call_id = id, "non-object tool arguments: {other}");
            Value::Object(Default::default())
        }
        Err(e) => {
            warn!(tool = name, tool_call_id = id, error = %e, "invalid JSON tool arguments; substituting {{}}");
            Value::Object(Default::default())
        }
    }
}

/// Scan assistant text for one embedded tool call of the form
/// `{"tool": "<name>", "args": {…}}` occupying a whole line.
///
/// Returns the text with the matched line removed, and the extracted call.
fn extract_embedded_call(text: &str) -> (String, Option<ToolCallRequest>) {
    let mut kept: Vec<&str> = Vec::new();
    let mut found: Option<ToolCallRequest> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if found.is_none() && trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Some(call) = try_parse_embedded(trimmed) {
                found = Some(call);
                continue;
            }
        }
        kept.push(line);
    }

    (kept.join("\n").trim().to_string(), found)
}

fn try_parse_embedded(candidate: &str) -> Option<ToolCallRequest> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("tool")?.as_str()?;
    if name.is_empty() {
        return None;
    }
    let args = match obj.get("args") {
        Some(Value::Object(m)) => Value::Object(m.clone()),
        None => Value::Object(Default::default()),
        Some(_) => return None,
    };
    Some(ToolCallRequest {
        id: synthetic_id(),
        name: name.to_string(),
        args,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::RawToolCall;

    fn completion_with_text(text: &str) -> Completion {
        Completion {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let parsed = parse_response(completion_with_text("just an answer"));
        assert_eq!(parsed.text.as_deref(), Some("just an answer"));
        assert!(!parsed.has_tool_calls());
    }

    #[test]
    fn native_tool_call_is_normalized() {
        let c = Completion {
            tool_calls: vec![RawToolCall {
                id: "call-1".into(),
                name: "game_makeMove".into(),
                arguments: r#"{"row":1,"col":2}"#.into(),
            }],
            ..Default::default()
        };
        let parsed = parse_response(c);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "game_makeMove");
        assert_eq!(parsed.tool_calls[0].args, json!({"row": 1, "col": 2}));
    }

    #[test]
    fn malformed_native_args_degrade_to_empty_object() {
        let c = Completion {
            tool_calls: vec![RawToolCall {
                id: "call-1".into(),
                name: "t".into(),
                arguments: r#"{"row": 1,"#.into(),
            }],
            ..Default::default()
        };
        let parsed = parse_response(c);
        assert_eq!(parsed.tool_calls[0].args, json!({}));
    }

    #[test]
    fn empty_name_tool_call_is_dropped() {
        let c = Completion {
            tool_calls: vec![RawToolCall {
                id: "call-1".into(),
                name: String::new(),
                arguments: "{}".into(),
            }],
            ..Default::default()
        };
        assert!(!parse_response(c).has_tool_calls());
    }

    #[test]
    fn empty_id_gets_synthetic_replacement() {
        let c = Completion {
            tool_calls: vec![RawToolCall {
                id: String::new(),
                name: "t".into(),
                arguments: "{}".into(),
            }],
            ..Default::default()
        };
        let parsed = parse_response(c);
        assert!(parsed.tool_calls[0].id.starts_with("tc_"));
    }

    #[test]
    fn embedded_json_call_is_extracted() {
        let parsed = parse_response(completion_with_text(
            "I will check the board.\n{\"tool\": \"game_getBoard\", \"args\": {}}",
        ));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "game_getBoard");
        assert_eq!(parsed.text.as_deref(), Some("I will check the board."));
    }

    #[test]
    fn only_first_embedded_call_is_honored() {
        let parsed = parse_response(completion_with_text(
            "{\"tool\": \"a\", \"args\": {}}\n{\"tool\": \"b\", \"args\": {}}",
        ));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "a");
        // The second line survives as text.
        assert!(parsed.text.as_deref().unwrap_or("").contains("\"b\""));
    }

    #[test]
    fn embedded_form_ignored_when_native_calls_present() {
        let c = Completion {
            text: Some("{\"tool\": \"embedded\", \"args\": {}}".into()),
            tool_calls: vec![RawToolCall {
                id: "1".into(),
                name: "native".into(),
                arguments: "{}".into(),
            }],
            ..Default::default()
        };
        let parsed = parse_response(c);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "native");
    }

    #[test]
    fn json_without_tool_key_stays_text() {
        let parsed = parse_response(completion_with_text("{\"result\": 42}"));
        assert!(!parsed.has_tool_calls());
        assert_eq!(parsed.text.as_deref(), Some("{\"result\": 42}"));
    }

    #[test]
    fn reasoning_is_preserved() {
        let c = Completion {
            reasoning: Some("thinking...".into()),
            text: Some("answer".into()),
            ..Default::default()
        };
        let parsed = parse_response(c);
        assert_eq!(parsed.reasoning.as_deref(), Some("thinking..."));
    }
}
