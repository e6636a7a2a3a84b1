use serde_json::{Map, Value};

use crate::shared::utils::cell_text;

/// Spreadsheet header labels and the employee fields they map to.
const EMPLOYEE_LABELS: [(&str, &str); 6] = [
    ("รหัส", "id"),
    ("ชื่อ-นามสกุล", "name"),
    ("แผนก", "department"),
    ("ตำแหน่ง", "position"),
    ("ผู้บังคับบัญชา", "manager"),
    ("อีเมล", "email"),
];

fn is_employee_field(key: &str) -> bool {
    EMPLOYEE_LABELS.iter().any(|(_, field)| *field == key)
}

fn field_for_label(key: &str) -> &str {
    let trimmed = key.trim();
    EMPLOYEE_LABELS
        .iter()
        .find(|(label, _)| *label == trimmed)
        .map(|(_, field)| *field)
        .unwrap_or(key)
}

/// Renames Thai-labelled columns to employee fields. Keys that are already
/// English pass through. Numbers and booleans in employee fields become text.
pub fn remap_employee_record(record: &Value) -> Value {
    let Some(fields) = record.as_object() else {
        return record.clone();
    };

    let mut out = Map::with_capacity(fields.len());
    for (key, value) in fields {
        let field = field_for_label(key);
        // an explicit English key wins over its Thai label
        if field != key.as_str() && fields.contains_key(field) {
            continue;
        }
        let value = match value {
            Value::Number(_) | Value::Bool(_) if is_employee_field(field) => {
                Value::String(cell_text(value))
            }
            other => other.clone(),
        };
        out.insert(field.to_string(), value);
    }
    Value::Object(out)
}
