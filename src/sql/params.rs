//! Convert serde_json::Value to the text form bound to PostgreSQL placeholders.
//!
//! Every placeholder carries an explicit `::type` cast, so one text encoding covers all columns.

use serde_json::Value;

pub fn bind_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_text() {
        assert_eq!(bind_text(&json!(null)), None);
        assert_eq!(bind_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(bind_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(bind_text(&json!("0.99")).as_deref(), Some("0.99"));
        assert_eq!(bind_text(&json!({"a": 1})).as_deref(), Some("{\"a\":1}"));
    }
}
