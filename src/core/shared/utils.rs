use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Renders a spreadsheet cell as text. Numbers and booleans keep their JSON
/// spelling; `null` becomes empty.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `deserialize_with` helper for text fields that imports often fill with numbers.
pub fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(cell_text(&Value::deserialize(deserializer)?))
}

pub fn optional_text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(cell_text(&other)),
    })
}
