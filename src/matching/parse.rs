/// Tolerant JSON extraction from model output.
///
/// Model text may wrap JSON in markdown fences or surround it with prose.
/// These helpers find the first well-formed value of the wanted shape and
/// never fail; "no usable JSON" is reported as `None`.
use serde_json::{Map, Value};

/// Maximum opening brackets tried before giving up.
const MAX_ATTEMPTS: usize = 32;

/// First JSON array in `text`. A top-level object with exactly one array
/// field (e.g. `{"matches": [...]}`) is unwrapped.
#[must_use]
pub fn extract_array(text: &str) -> Option<Vec<Value>> {
    first_value(text, |v| match v {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            let first = arrays.next()?;
            arrays.next().is_none().then_some(first)
        }
        _ => None,
    })
}

/// First JSON object in `text`.
#[must_use]
pub fn extract_object(text: &str) -> Option<Map<String, Value>> {
    first_value(text, |v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn first_value<T>(text: &str, accept: impl Fn(Value) -> Option<T>) -> Option<T> {
    let fenced = strip_fences(text);
    scan(fenced, &accept).or_else(|| {
        // The fence may hold prose, or close on the JSON's own line.
        if fenced.len() == text.len() {
            None
        } else {
            scan(text, &accept)
        }
    })
}

fn scan<T>(body: &str, accept: &impl Fn(Value) -> Option<T>) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
        if let Some(found) = accept(value) {
            return Some(found);
        }
    }

    body.char_indices()
        .filter(|(_, c)| matches!(c, '[' | '{'))
        .take(MAX_ATTEMPTS)
        .find_map(|(i, _)| {
            let mut values = serde_json::Deserializer::from_str(&body[i..]).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => accept(value),
                _ => None,
            }
        })
}

/// Contents of the first fenced code block, or the text unchanged.
fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Numeric field as `f64`; numeric strings are accepted.
#[must_use]
pub fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer field; floats with no fractional part are accepted.
#[must_use]
pub fn integer_field(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

#[must_use]
pub fn bool_field(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

#[must_use]
pub fn string_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_array() {
        let items = extract_array(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_fenced_array_with_prose() {
        let text = "Here is my analysis:\n```json\n[{\"question_id\": 3}]\n```\nLet me know.";
        let items = extract_array(text).unwrap();
        assert_eq!(items[0]["question_id"], 3);
    }

    #[test]
    fn test_array_embedded_in_noise() {
        let text = "Sure! [note] The matches are [{\"question_id\": 1}] and that's all.";
        let items = extract_array(text).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["question_id"], 1);
    }

    #[test]
    fn test_wrapped_array_is_unwrapped() {
        let items = extract_array(r#"{"matches": [{"question_id": 5}]}"#).unwrap();
        assert_eq!(items[0]["question_id"], 5);
    }

    #[test]
    fn test_json_on_fence_line_with_trailing_prose() {
        let text = "```json [{\"question_id\": 1, \"content_relevance\": 0.9}]```\nThat is all.";
        let items = extract_array(text).unwrap();
        assert_eq!(items[0]["question_id"], 1);
        assert_eq!(items[0]["content_relevance"], 0.9);
    }

    #[test]
    fn test_prose_fence_then_json() {
        let text = "```\nNo issues noted.\n```\n[{\"question_id\": 1, \"content_relevance\": 0.6}]";
        let items = extract_array(text).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["question_id"], 1);

        let map = extract_object("```\nsee below\n```\n{\"summary\": \"ok\"}").unwrap();
        assert_eq!(string_field(&map, "summary"), "ok");
    }

    #[test]
    fn test_no_json() {
        assert!(extract_array("I could not find any evidence.").is_none());
        assert!(extract_array("[unterminated").is_none());
        assert!(extract_object("no braces here").is_none());
    }

    #[test]
    fn test_object_after_prose() {
        let map = extract_object("Result: {\"content_relevance\": 0.8} done").unwrap();
        assert_eq!(number_field(&map, "content_relevance"), Some(0.8));
    }

    #[test]
    fn test_field_helpers() {
        let map = extract_object(
            r#"{"id": 4.0, "bad_id": 4.5, "s": "0.7", "b": "Yes", "t": "  text  "}"#,
        )
        .unwrap();
        assert_eq!(integer_field(&map, "id"), Some(4));
        assert_eq!(integer_field(&map, "bad_id"), None);
        assert_eq!(number_field(&map, "s"), Some(0.7));
        assert!(bool_field(&map, "b"));
        assert!(!bool_field(&map, "missing"));
        assert_eq!(string_field(&map, "t"), "text");
        assert_eq!(string_field(&map, "missing"), "");
    }
}
