//! JSON Schema generation and validation.
//!
//! Schemas are generated from the Rust types with `schemars`, so the schema
//! text shown to a model and the validator applied to its answer always
//! describe the same shape. Validation uses the `jsonschema` crate and
//! reports every violation with a field path.

use schemars::JsonSchema;
use serde_json::Value;
use thiserror::Error;

/// Errors from schema compilation.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    #[error("Failed to compile schema for {type_name}: {message}")]
    Compile { type_name: String, message: String },
}

/// Generate the JSON Schema of `T` as a JSON value.
pub fn schema_value<T: JsonSchema>() -> Value {
    schemars::schema_for!(T).to_value()
}

/// Generate the JSON Schema of `T` as pretty-printed text.
pub fn schema_text<T: JsonSchema>() -> String {
    let value = schema_value::<T>();
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

/// A compiled validator for the schema of one type.
pub struct SchemaValidator {
    type_name: String,
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    /// Compile the schema generated for `T`.
    pub fn for_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let type_name = T::schema_name().into_owned();
        let schema = schema_value::<T>();

        let validator = jsonschema::options()
            .build(&schema)
            .map_err(|e| SchemaError::Compile {
                type_name: type_name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            type_name,
            validator,
        })
    }

    /// Name of the validated type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Validate an instance.
    ///
    /// Returns every violation as `"<field path>: <message>"`.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| format!("{}: {}", field_path(&e.instance_path.to_string()), e))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Convert a JSON pointer (`/contradictions/0/impact`) into a dotted field
/// path (`contradictions[0].impact`). The empty pointer is the document root.
pub fn field_path(pointer: &str) -> String {
    let mut path = String::new();

    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }

    if path.is_empty() {
        "(root)".to_string()
    } else {
        path
    }
}
