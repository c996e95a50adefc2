use serde_json::{Map, Value};

use crate::error::DbError;
use crate::schema::types::{CollectionSchema, FieldType};

/// Pre-flight payload check against a compiled schema.
///
/// Collects every offending field before failing: declared `required`
/// fields whose key is absent, and declared `String`/`Number`/`Boolean`
/// fields whose supplied value has the wrong runtime type. Fields present
/// in the payload but absent from the schema always pass (loose-schema
/// invariant). Explicit nulls pass the type check; they read as an unset.
pub fn validate(schema: &CollectionSchema, payload: &Map<String, Value>) -> Result<(), DbError> {
    let mut offending: Vec<String> = Vec::new();

    for (name, field) in &schema.fields {
        match payload.get(name) {
            None => {
                if field.required {
                    offending.push(name.clone());
                }
            }
            Some(Value::Null) => {}
            Some(value) => {
                let ok = match field.field_type {
                    FieldType::String => value.is_string(),
                    FieldType::Number => value.is_number(),
                    FieldType::Boolean => value.is_boolean(),
                    // Date, Mixed, and ObjectId values are not shape-checked
                    // here; the store and id parsing enforce those.
                    FieldType::Date | FieldType::Mixed | FieldType::ObjectId => true,
                };
                if !ok {
                    offending.push(name.clone());
                }
            }
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        Err(DbError::validation(offending))
    }
}
