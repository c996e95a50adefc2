use crate::error::DbError;
use crate::schema::types::{CollectionSchema, CompiledField, FieldSpec, FieldType};

/// Compile a tenant-supplied field list into a collection schema.
///
/// Fails when a type tag falls outside the closed `FieldType` set, or when
/// `ref` is declared on a field that is not an `ObjectId`. Constraints are
/// carried only when set. Bounds (`min`/`max`) apply to `Number` fields
/// only and are dropped elsewhere.
pub fn compile(fields: &[FieldSpec]) -> Result<CollectionSchema, DbError> {
    let mut schema = CollectionSchema::default();

    for spec in fields {
        let field_type = FieldType::resolve(&spec.field_type)?;

        if spec.ref_model.is_some() && field_type != FieldType::ObjectId {
            return Err(DbError::SchemaError(format!(
                "field '{}' declares ref but is typed {}, not ObjectId",
                spec.name,
                field_type.as_str()
            )));
        }

        let (min, max) = if field_type == FieldType::Number {
            (spec.min, spec.max)
        } else {
            (None, None)
        };

        schema.fields.insert(
            spec.name.clone(),
            CompiledField {
                field_type,
                required: spec.required,
                unique: spec.unique,
                default: spec.default.clone(),
                ref_model: spec.ref_model.clone(),
                min,
                max,
            },
        );
    }

    Ok(schema)
}
