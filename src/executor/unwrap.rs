// src/executor/unwrap.rs
// MCP tool-result envelope unwrapping

use serde_json::{Value, json};

use crate::protocol::ToolResult;

/// The unwrapped view of a tool response: a payload on success, a message on
/// tool-level error. Assertion paths navigate the payload, never the
/// envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum UnwrappedResponse {
    Ok(Value),
    Err { message: String },
}

impl UnwrappedResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, UnwrappedResponse::Err { .. })
    }

    /// The value assertions are evaluated against. Errors become an
    /// error-shaped object so error assertions have something to select on.
    pub fn payload(&self) -> Value {
        match self {
            UnwrappedResponse::Ok(payload) => payload.clone(),
            UnwrappedResponse::Err { message } => json!({
                "error": true,
                "isError": true,
                "message": message,
            }),
        }
    }
}

/// Unwrap a `tools/call` result envelope.
///
/// `structuredContent` wins when present. Text content is parsed as JSON
/// optimistically; non-JSON text stays a raw string. Multiple text blocks
/// become an array of their unwrapped values.
pub fn unwrap_tool_result(result: &Value) -> UnwrappedResponse {
    let Ok(envelope) = serde_json::from_value::<ToolResult>(result.clone()) else {
        // Not an MCP envelope at all; treat the raw result as the payload.
        return UnwrappedResponse::Ok(result.clone());
    };

    let texts: Vec<&str> = envelope
        .content
        .iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text.as_deref())
        .collect();

    if envelope.is_error {
        let message = if texts.is_empty() {
            "tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return UnwrappedResponse::Err { message };
    }

    if let Some(structured) = envelope.structured_content {
        return UnwrappedResponse::Ok(structured);
    }

    let payload = match texts.len() {
        0 => result.clone(),
        1 => parse_optimistic(texts[0]),
        _ => Value::Array(texts.iter().map(|t| parse_optimistic(t)).collect()),
    };
    UnwrappedResponse::Ok(payload)
}

fn parse_optimistic(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
