//! Result extraction: transport result objects to plain content.

use rmcp::model::CallToolResult;
use serde_json::Value;
use tracing::warn;

/// Normalize a tool result into a string or structured value.
///
/// Text-bearing content parts are newline-joined. A text that is itself a
/// serialized `{"type": "text", "text": ...}` wrapper is unwrapped. Results
/// with no text fall back to `structured_content`.
pub fn extract_content(result: &CallToolResult) -> Value {
    let text = joined_text(result);
    if !text.is_empty() {
        return unwrap_text_wrapper(Value::String(text));
    }
    match &result.structured_content {
        Some(structured) => unwrap_text_wrapper(structured.clone()),
        None => Value::String(String::new()),
    }
}

/// Text used to classify a failed result: every text part, then structured content.
pub fn error_text(result: &CallToolResult) -> String {
    let mut text = joined_text(result);
    if let Some(structured) = &result.structured_content {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&structured.to_string());
    }
    text
}

pub fn is_error(result: &CallToolResult) -> bool {
    result.is_error.unwrap_or(false)
}

fn joined_text(result: &CallToolResult) -> String {
    let parts = match serde_json::to_value(&result.content) {
        Ok(Value::Array(parts)) => parts,
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize tool result content");
            Vec::new()
        }
    };

    parts
        .iter()
        .filter_map(part_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text carried by one content part. Non-text parts render as compact JSON.
fn part_text(part: &Value) -> Option<String> {
    if let Some(text) = part.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    if let Some(text) = part
        .get("resource")
        .and_then(|r| r.get("text"))
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }
    match part {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn unwrap_text_wrapper(value: Value) -> Value {
    let mut current = value;
    // bounded: a wrapper nested deeper than this is left as is
    for _ in 0..4 {
        let inner = match &current {
            Value::Object(map) if is_text_wrapper(map) => map.get("text").cloned(),
            Value::String(s) if s.trim_start().starts_with('{') => {
                match serde_json::from_str::<Value>(s) {
                    Ok(Value::Object(map)) if is_text_wrapper(&map) => map.get("text").cloned(),
                    _ => None,
                }
            }
            _ => None,
        };
        match inner {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

fn is_text_wrapper(map: &serde_json::Map<String, Value>) -> bool {
    map.get("type").and_then(Value::as_str) == Some("text")
        && map.get("text").is_some_and(Value::is_string)
}

#[cfg(test)]
mod tests {
    use rmcp::model::Content;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_joins_text_parts() {
        let result = CallToolResult::success(vec![Content::text("one"), Content::text("two")]);
        assert_eq!(extract_content(&result), json!("one\ntwo"));
        assert!(!is_error(&result));
    }

    #[test]
    fn test_unwraps_serialized_wrapper() {
        let wrapped = json!({"type": "text", "text": "inner"}).to_string();
        let result = CallToolResult::success(vec![Content::text(wrapped)]);
        assert_eq!(extract_content(&result), json!("inner"));
    }

    #[test]
    fn test_json_text_is_not_unwrapped() {
        let result = CallToolResult::success(vec![Content::text(r#"{"rows": [1, 2]}"#)]);
        assert_eq!(extract_content(&result), json!(r#"{"rows": [1, 2]}"#));
    }

    #[test]
    fn test_structured_fallback() {
        let result = CallToolResult::structured(json!({"count": 3}));
        let content = extract_content(&result);
        // structured results also carry a text rendering of the same value
        let parsed = match content {
            Value::String(s) => serde_json::from_str::<Value>(&s).unwrap(),
            other => other,
        };
        assert_eq!(parsed, json!({"count": 3}));
    }

    #[test]
    fn test_error_text() {
        let result = CallToolResult::error(vec![Content::text("Missing required field: to")]);
        assert!(is_error(&result));
        assert_eq!(error_text(&result), "Missing required field: to");
    }

    #[test]
    fn test_empty_result() {
        let result = CallToolResult::success(vec![]);
        assert_eq!(extract_content(&result), json!(""));
    }
}
