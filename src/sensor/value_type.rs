use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag carried by sensors, config keys and effector parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Object,
    Any,
}

impl ValueType {
    /// Coerce `value` to this type.
    ///
    /// Accepts the native JSON shape plus the string spellings a flat,
    /// string-keyed parameter set produces ("42", "true", "1.5").
    /// Null passes through for every type. Returns `None` on mismatch.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        if value.is_null() {
            return Some(value);
        }
        match self {
            ValueType::Any => Some(value),
            ValueType::String => match value {
                Value::String(_) => Some(value),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            ValueType::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n)),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| Value::from(f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            ValueType::Float => match value {
                Value::Number(_) => Some(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                _ => None,
            },
            ValueType::Boolean => match value {
                Value::Bool(_) => Some(value),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            ValueType::List => match value {
                Value::Array(_) => Some(value),
                _ => None,
            },
            ValueType::Object => match value {
                Value::Object(_) => Some(value),
                _ => None,
            },
        }
    }
}
