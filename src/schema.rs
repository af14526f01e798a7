// SPDX-License-Identifier: MIT

//! Schema descriptors for action inputs and outputs
//!
//! Actions declare what they accept and produce with an explicit `Schema`
//! value; the registry validates both sides of every invocation against it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{FlowError, Result};

/// Shape of a JSON value an action accepts or produces
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchemaKind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array {
        items: Box<Schema>,
    },
    Object {
        properties: HashMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
    Any,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(flatten)]
    pub kind: SchemaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Schema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn any() -> Self {
        Self::new(SchemaKind::Any)
    }

    pub fn null() -> Self {
        Self::new(SchemaKind::Null)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaKind::Boolean)
    }

    pub fn integer() -> Self {
        Self::new(SchemaKind::Integer)
    }

    pub fn number() -> Self {
        Self::new(SchemaKind::Number)
    }

    pub fn string() -> Self {
        Self::new(SchemaKind::String)
    }

    pub fn array(items: Schema) -> Self {
        Self::new(SchemaKind::Array {
            items: Box::new(items),
        })
    }

    pub fn object(properties: Vec<(&str, Schema)>, required: Vec<&str>) -> Self {
        Self::new(SchemaKind::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            required: required.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate a value against this schema; errors carry a JSON-ish path
    pub fn validate(&self, value: &Value) -> Result<()> {
        let mut path = vec!["$".to_string()];
        validate_at(self, value, &mut path)
    }
}

fn mismatch(expected: &str, path: &[String]) -> FlowError {
    FlowError::Validation {
        message: format!("expected {}", expected),
        path: path.join("."),
    }
}

fn validate_at(schema: &Schema, value: &Value, path: &mut Vec<String>) -> Result<()> {
    match &schema.kind {
        SchemaKind::Any => {}
        SchemaKind::Null => {
            if !value.is_null() {
                return Err(mismatch("null", path));
            }
        }
        SchemaKind::Boolean => {
            if !value.is_boolean() {
                return Err(mismatch("boolean", path));
            }
        }
        SchemaKind::Integer => {
            if !value.is_i64() && !value.is_u64() {
                return Err(mismatch("integer", path));
            }
        }
        SchemaKind::Number => {
            if !value.is_number() {
                return Err(mismatch("number", path));
            }
        }
        SchemaKind::String => {
            if !value.is_string() {
                return Err(mismatch("string", path));
            }
        }
        SchemaKind::Array { items } => {
            let array = value.as_array().ok_or_else(|| mismatch("array", path))?;
            for (idx, element) in array.iter().enumerate() {
                path.push(idx.to_string());
                validate_at(items, element, path)?;
                path.pop();
            }
        }
        SchemaKind::Object {
            properties,
            required,
        } => {
            let object = value.as_object().ok_or_else(|| mismatch("object", path))?;
            for key in required {
                if !object.contains_key(key) {
                    return Err(FlowError::Validation {
                        message: format!("missing required property `{}`", key),
                        path: path.join("."),
                    });
                }
            }
            for (key, val) in object {
                if let Some(sub) = properties.get(key) {
                    path.push(key.clone());
                    validate_at(sub, val, path)?;
                    path.pop();
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_schemas() {
        assert!(Schema::string().validate(&json!("hi")).is_ok());
        assert!(Schema::string().validate(&json!(42)).is_err());
        assert!(Schema::integer().validate(&json!(42)).is_ok());
        assert!(Schema::integer().validate(&json!(4.2)).is_err());
        assert!(Schema::number().validate(&json!(4.2)).is_ok());
        assert!(Schema::boolean().validate(&json!(true)).is_ok());
        assert!(Schema::null().validate(&json!(null)).is_ok());
        assert!(Schema::any().validate(&json!({"anything": []})).is_ok());
    }

    #[test]
    fn array_schema_reports_element_path() {
        let schema = Schema::array(Schema::string());
        assert!(schema.validate(&json!(["a", "b"])).is_ok());

        let err = schema.validate(&json!(["a", 1])).unwrap_err();
        match err {
            FlowError::Validation { path, .. } => assert_eq!(path, "$.1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn object_schema_checks_required_and_properties() {
        let schema = Schema::object(
            vec![("name", Schema::string()), ("age", Schema::integer())],
            vec!["name"],
        );

        assert!(schema.validate(&json!({"name": "Ada"})).is_ok());
        assert!(schema.validate(&json!({"name": "Ada", "age": 36})).is_ok());
        assert!(schema.validate(&json!({"age": 36})).is_err());
        assert!(schema.validate(&json!({"name": "Ada", "age": "36"})).is_err());
        // Unknown properties are allowed
        assert!(schema
            .validate(&json!({"name": "Ada", "extra": true}))
            .is_ok());
    }

    #[test]
    fn schema_serializes_with_type_tag() {
        let schema = Schema::array(Schema::integer());
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "array");
        assert_eq!(json["items"]["type"], "integer");
    }
}
