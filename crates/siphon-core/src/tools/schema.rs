//! Declarative parameter schemas for tools
//!
//! A schema is a flat list of named fields. It renders to JSON Schema for
//! `tools/list` and validates an argument bag before a tool runs.

use serde_json::{Map, Value, json};
use thiserror::Error;

const JSON_SCHEMA_DRAFT: &str = "http://json-schema.org/draft-07/schema#";

/// Value type accepted by a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    /// Absolute URL, carried as a string
    Url,
}

/// A single named parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<String>,
    pub choices: Option<Vec<String>>,
    pub description: Option<String>,
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            choices: None,
            description: None,
        }
    }

    /// Required string field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// Required URL field
    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Url)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Value used when the caller omits the field. A defaulted field is
    /// never reported as required.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restrict the field to an enumerated set of values
    pub fn one_of<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether a caller must supply this field
    pub fn is_mandatory(&self) -> bool {
        self.required && self.default.is_none()
    }

    fn render(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!("string"));
        if self.kind == FieldKind::Url {
            prop.insert("format".into(), json!("uri"));
        }
        if let Some(choices) = &self.choices {
            prop.insert("enum".into(), json!(choices));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), json!(default));
        }
        if let Some(description) = &self.description {
            prop.insert("description".into(), json!(description));
        }
        Value::Object(prop)
    }

    fn check(&self, value: Value) -> Result<Value, SchemaError> {
        let text = match value {
            Value::String(s) => s,
            _ => return Err(SchemaError::NotAString(self.name.clone())),
        };

        if self.kind == FieldKind::Url && url::Url::parse(&text).is_err() {
            return Err(SchemaError::InvalidUrl {
                field: self.name.clone(),
                value: text,
            });
        }

        if let Some(choices) = &self.choices {
            if !choices.contains(&text) {
                return Err(SchemaError::NotAllowed {
                    field: self.name.clone(),
                    value: text,
                    allowed: choices.join(", "),
                });
            }
        }

        Ok(Value::String(text))
    }
}

/// Argument validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("arguments must be an object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    Missing(String),
    #[error("field '{0}' must be a string")]
    NotAString(String),
    #[error("field '{field}' is not a valid URL: {value}")]
    InvalidUrl { field: String, value: String },
    #[error("field '{field}' must be one of [{allowed}], got '{value}'")]
    NotAllowed {
        field: String,
        value: String,
        allowed: String,
    },
    #[error("unknown field '{0}'")]
    Unknown(String),
}

/// Ordered set of fields describing a tool's input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier field with the same name
    pub fn field(mut self, spec: FieldSpec) -> Self {
        match self.fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the fields a caller must supply, in declaration order
    pub fn required_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_mandatory())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Render as a draft-07 JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.render()))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_names(),
            "additionalProperties": false,
            "$schema": JSON_SCHEMA_DRAFT,
        })
    }

    /// Check an argument bag against the schema and fill in defaults.
    ///
    /// A missing bag (`null`) is treated as an empty object, and `null`
    /// field values count as absent.
    pub fn validate(&self, args: Value) -> Result<Value, SchemaError> {
        let mut input = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(SchemaError::NotAnObject),
        };

        if let Some(unknown) = input.keys().find(|k| self.get(k).is_none()) {
            return Err(SchemaError::Unknown(unknown.clone()));
        }

        let mut output = Map::new();
        for field in &self.fields {
            match input.remove(&field.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &field.default {
                        output.insert(field.name.clone(), Value::String(default.clone()));
                    } else if field.required {
                        return Err(SchemaError::Missing(field.name.clone()));
                    }
                }
                Some(value) => {
                    output.insert(field.name.clone(), field.check(value)?);
                }
            }
        }

        Ok(Value::Object(output))
    }
}
