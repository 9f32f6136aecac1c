use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single row flowing through projectors. Columns are positional.
pub type Row = Vec<Value>;

/// Declared type of a column or symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Undefined,
    Boolean,
    Integer,
    Long,
    Double,
    String,
    Object,
    Array(Box<DataType>),
}

impl DataType {
    pub fn name(&self) -> String {
        match self {
            DataType::Undefined => "undefined".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Integer => "integer".to_string(),
            DataType::Long => "long".to_string(),
            DataType::Double => "double".to_string(),
            DataType::String => "string".to_string(),
            DataType::Object => "object".to_string(),
            DataType::Array(inner) => format!("{}_array", inner.name()),
        }
    }

    /// Whether values of this type have a total order usable by ORDER BY
    pub fn is_orderable(&self) -> bool {
        !matches!(self, DataType::Object | DataType::Array(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Long | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Rough heap footprint of a value, used for ram accounting.
pub fn estimate_value_size(value: &Value) -> u64 {
    match value {
        Value::Null | Value::Bool(_) => 8,
        Value::Number(_) => 16,
        Value::String(s) => 24 + s.len() as u64,
        Value::Array(items) => 24 + items.iter().map(estimate_value_size).sum::<u64>(),
        Value::Object(map) => {
            32 + map
                .iter()
                .map(|(k, v)| 24 + k.len() as u64 + estimate_value_size(v))
                .sum::<u64>()
        }
    }
}

pub fn estimate_row_size(row: &Row) -> u64 {
    24 + row.iter().map(estimate_value_size).sum::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names() {
        assert_eq!(DataType::Long.to_string(), "long");
        assert_eq!(
            DataType::Array(Box::new(DataType::String)).to_string(),
            "string_array"
        );
        assert!(!DataType::Object.is_orderable());
        assert!(DataType::Double.is_orderable());
    }

    #[test]
    fn test_row_size_grows_with_content() {
        let small = vec![json!(1)];
        let large = vec![json!(1), json!("a much longer string value")];
        assert!(estimate_row_size(&large) > estimate_row_size(&small));
    }
}
