//! JSON schema generation for tool parameters
//!
//! The typed parameter struct is the single source of truth: the same
//! type produces the provider-facing schema here and decodes the model's
//! arguments at dispatch time.

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{Map, Value};

/// Parameters schema for `P`, in the flat shape providers expect
///
/// Subschemas are inlined and the draft metadata (`$schema`, `title`,
/// `definitions`) is dropped. `properties` and `required` are always present.
pub fn parameters_schema<P: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|settings| {
            settings.option_add_null_type = false;
            settings.option_nullable = false;
            settings.inline_subschemas = true;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<P>();

    let mut schema = match serde_json::to_value(root) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for key in ["$schema", "title", "definitions", "description"] {
        schema.remove(key);
    }
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    schema
        .entry("required")
        .or_insert_with(|| Value::Array(Vec::new()));

    Value::Object(schema)
}
