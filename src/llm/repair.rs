//! Repair of near-miss tool-call arguments.
//!
//! Models regularly wrap arguments in code fences, double-encode them as a
//! JSON string, leave trailing commas, or quote numbers. A
//! [`RepairStrategy`] turns such raw arguments into a JSON object before
//! schema validation; whatever it cannot fix is reported as a
//! [`RepairFailure`] and becomes an `InvalidToolArgs` error.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RepairFailure {
    pub message: String,
}

impl RepairFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns raw tool-call arguments into a JSON object.
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce an argument object for a tool with the given input schema.
    ///
    /// # Errors
    /// Returns [`RepairFailure`] when the arguments cannot be made into an object.
    fn repair_arguments(&self, raw: &Value, schema: &Value) -> Result<Value, RepairFailure>;

    /// Recover a single tool call from a text-only response.
    fn recover_tool_call(&self, _text: &str) -> Option<(String, Value)> {
        None
    }
}

/// Accepts only well-formed JSON objects.
pub struct StrictJson;

impl RepairStrategy for StrictJson {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn repair_arguments(&self, raw: &Value, _schema: &Value) -> Result<Value, RepairFailure> {
        match raw {
            Value::Object(_) => Ok(raw.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(v @ Value::Object(_)) => Ok(v),
                Ok(_) => Err(RepairFailure::new("arguments are not a JSON object")),
                Err(e) => Err(RepairFailure::new(format!("arguments are not valid JSON: {e}"))),
            },
            _ => Err(RepairFailure::new("arguments are not a JSON object")),
        }
    }
}

/// Default strategy: fixes common formatting mistakes and coerces scalar
/// types to what the schema declares.
pub struct LenientJsonRepair;

impl RepairStrategy for LenientJsonRepair {
    fn name(&self) -> &'static str {
        "lenient"
    }

    fn repair_arguments(&self, raw: &Value, schema: &Value) -> Result<Value, RepairFailure> {
        let parsed = match raw {
            Value::Object(_) => raw.clone(),
            Value::Null => Value::Object(Map::new()),
            Value::String(s) if s.trim().is_empty() => Value::Object(Map::new()),
            Value::String(s) => parse_lenient(s)
                .ok_or_else(|| RepairFailure::new(format!("could not parse arguments: {s}")))?,
            other => {
                return Err(RepairFailure::new(format!(
                    "arguments must be an object, got {other}"
                )));
            }
        };
        if !parsed.is_object() {
            return Err(RepairFailure::new("arguments are not a JSON object"));
        }
        Ok(coerce(parsed, schema))
    }

    /// Accepts `{"name": …, "input"|"arguments"|"parameters": {…}}` and
    /// `{"action": {"<tool>": {…}}}` written as plain text.
    fn recover_tool_call(&self, text: &str) -> Option<(String, Value)> {
        let Value::Object(mut obj) = parse_lenient(text)? else {
            return None;
        };

        if let Some(Value::String(name)) = obj.get("name").cloned() {
            let input = ["input", "arguments", "parameters"]
                .iter()
                .find_map(|k| obj.remove(*k))
                .unwrap_or_else(|| Value::Object(Map::new()));
            return Some((name, input));
        }

        if let Some(Value::Object(action)) = obj.remove("action")
            && action.len() == 1
        {
            let (name, mut input) = action.into_iter().next()?;
            // Reflection fields written next to the action still count.
            if let Value::Object(fields) = &mut input {
                for key in ["evaluation_previous_goal", "memory", "next_goal"] {
                    if let Some(v) = obj.remove(key) {
                        fields.entry(key.to_owned()).or_insert(v);
                    }
                }
            }
            return Some((name, input));
        }
        None
    }
}

/// Parse JSON that may be fenced, embedded in prose, double-encoded or
/// carrying trailing commas.
#[must_use]
pub fn parse_lenient(text: &str) -> Option<Value> {
    let text = strip_code_fence(text.trim());

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return match value {
            Value::String(inner) => serde_json::from_str::<Value>(inner.trim())
                .ok()
                .filter(Value::is_object),
            other => Some(other),
        };
    }

    let candidate = extract_object(text)?;
    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&remove_trailing_commas(candidate)).ok())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// First balanced `{…}` in `text`, ignoring braces inside strings.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Convert scalars to the types the schema asks for, recursively.
fn coerce(value: Value, schema: &Value) -> Value {
    let declared = schema.get("type").and_then(Value::as_str);
    match (declared, value) {
        (Some("object") | None, Value::Object(map)) => {
            let props = schema.get("properties").and_then(Value::as_object);
            let coerced = map
                .into_iter()
                .map(|(k, v)| {
                    let v = match props.and_then(|p| p.get(&k)) {
                        Some(prop_schema) => coerce(v, prop_schema),
                        None => v,
                    };
                    (k, v)
                })
                .collect();
            Value::Object(coerced)
        }
        (Some("array"), Value::Array(items)) => {
            let item_schema = schema.get("items").cloned().unwrap_or(Value::Null);
            Value::Array(items.into_iter().map(|v| coerce(v, &item_schema)).collect())
        }
        (Some("integer"), Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_or(Value::String(s), Value::from),
        (Some("integer"), Value::Number(n)) => match n.as_f64() {
            #[allow(clippy::cast_possible_truncation)]
            Some(f) if n.is_f64() && f.fract() == 0.0 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        (Some("number"), Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => serde_json::Number::from_f64(f).map_or(Value::String(s), Value::Number),
            Err(_) => Value::String(s),
        },
        (Some("boolean"), Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (Some("string"), Value::Number(n)) => Value::String(n.to_string()),
        (Some("string"), Value::Bool(b)) => Value::String(b.to_string()),
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn click_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer" },
                "down": { "type": "boolean" },
                "num_pages": { "type": "number" },
                "text": { "type": "string" }
            }
        })
    }

    #[test]
    fn object_passes_through() {
        let raw = json!({"index": 3});
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            raw
        );
    }

    #[test]
    fn fenced_json_with_trailing_comma() {
        let raw = Value::String("```json\n{\"index\": 3,}\n```".into());
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": 3})
        );
    }

    #[test]
    fn json_embedded_in_prose() {
        let raw = Value::String(r#"Sure! Here you go: {"index": 4, "text": "a } b"} hope it helps"#.into());
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": 4, "text": "a } b"})
        );
    }

    #[test]
    fn double_encoded_arguments() {
        let inner = serde_json::to_string(&json!({"index": 1})).unwrap();
        let raw = Value::String(serde_json::to_string(&inner).unwrap());
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": 1})
        );
    }

    #[test]
    fn scalars_are_coerced_per_schema() {
        let raw = json!({"index": "7", "down": "TRUE", "num_pages": "0.5", "text": 42});
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": 7, "down": true, "num_pages": 0.5, "text": "42"})
        );
        let raw = json!({"index": 2.0});
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": 2})
        );
    }

    #[test]
    fn uncoercible_values_are_left_for_validation() {
        let raw = json!({"index": "third"});
        assert_eq!(
            LenientJsonRepair.repair_arguments(&raw, &click_schema()).unwrap(),
            json!({"index": "third"})
        );
    }

    #[test]
    fn garbage_is_a_failure() {
        let raw = Value::String("click the third button".into());
        assert!(LenientJsonRepair.repair_arguments(&raw, &click_schema()).is_err());
        assert!(LenientJsonRepair.repair_arguments(&json!([1, 2]), &click_schema()).is_err());
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(
            LenientJsonRepair
                .repair_arguments(&Value::String(String::new()), &click_schema())
                .unwrap(),
            json!({})
        );
        assert_eq!(
            LenientJsonRepair.repair_arguments(&Value::Null, &click_schema()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn strict_rejects_what_lenient_fixes() {
        let raw = Value::String("{\"index\": 3,}".into());
        assert!(StrictJson.repair_arguments(&raw, &click_schema()).is_err());
        assert!(
            StrictJson
                .repair_arguments(&Value::String("{\"index\": 3}".into()), &click_schema())
                .is_ok()
        );
        assert!(StrictJson.recover_tool_call(r#"{"name": "done"}"#).is_none());
    }

    #[test]
    fn recovers_name_input_call_from_text() {
        let text = "I'll finish now.\n```json\n{\"name\": \"done\", \"input\": {\"text\": \"ok\"}}\n```";
        let (name, input) = LenientJsonRepair.recover_tool_call(text).unwrap();
        assert_eq!(name, "done");
        assert_eq!(input, json!({"text": "ok"}));
    }

    #[test]
    fn recovers_action_wrapped_call() {
        let text = r#"{"memory": "on login page", "action": {"click_element_by_index": {"index": 3}}}"#;
        let (name, input) = LenientJsonRepair.recover_tool_call(text).unwrap();
        assert_eq!(name, "click_element_by_index");
        assert_eq!(input, json!({"index": 3, "memory": "on login page"}));
    }

    #[test]
    fn prose_without_call_is_not_recovered() {
        assert!(LenientJsonRepair.recover_tool_call("I clicked the button.").is_none());
        assert!(LenientJsonRepair.recover_tool_call(r#"{"foo": 1}"#).is_none());
    }
}
