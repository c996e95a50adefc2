use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DbError;

/// Closed set of field types a tenant may declare.
///
/// Type names arrive as strings from tenant administrators and are resolved
/// through an explicit match, never through dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Mixed,
    ObjectId,
}

impl FieldType {
    pub fn resolve(name: &str) -> Result<Self, DbError> {
        match name {
            "String" => Ok(FieldType::String),
            "Number" => Ok(FieldType::Number),
            "Boolean" => Ok(FieldType::Boolean),
            "Date" => Ok(FieldType::Date),
            "Mixed" => Ok(FieldType::Mixed),
            "ObjectId" => Ok(FieldType::ObjectId),
            other => Err(DbError::SchemaError(format!(
                "unrecognized field type: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Mixed => "Mixed",
            FieldType::ObjectId => "ObjectId",
        }
    }
}

/// One field declaration as supplied by a tenant administrator.
///
/// The type tag stays a plain string here; `compile` resolves it into
/// `FieldType` and rejects anything outside the closed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Target model name; only meaningful when `type` is `ObjectId`.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_model: Option<String>,

    /// Lower bound; only meaningful when `type` is `Number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Upper bound; only meaningful when `type` is `Number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: false,
            unique: false,
            default: None,
            ref_model: None,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_ref(mut self, target: impl Into<String>) -> Self {
        self.ref_model = Some(target.into());
        self
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One compiled field constraint set.
///
/// Absent optional attributes stay absent when serialized; some store
/// drivers interpret the presence of a constraint key differently from an
/// explicit false value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledField {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Compiled schema for one collection.
///
/// Loose by design: declared fields get constraint enforcement, undeclared
/// fields pass through untyped. Tenants may evolve their data shape without
/// a migration step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: BTreeMap<String, CompiledField>,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Names of declared string-typed fields, in declaration-map order.
    pub fn string_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.field_type == FieldType::String)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Populate target for a field: the referenced model name, present only
    /// for declared `ObjectId` fields carrying a `ref`.
    pub fn reference(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| {
            if f.field_type == FieldType::ObjectId {
                f.ref_model.as_deref()
            } else {
                None
            }
        })
    }

    /// Declared fields with a default value, for write-path enrichment.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter_map(|(name, f)| f.default.as_ref().map(|d| (name.as_str(), d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_type_resolves_closed_set_only() {
        assert_eq!(FieldType::resolve("String").unwrap(), FieldType::String);
        assert_eq!(FieldType::resolve("ObjectId").unwrap(), FieldType::ObjectId);
        assert!(FieldType::resolve("string").is_err());
        assert!(FieldType::resolve("Function").is_err());
        assert!(FieldType::resolve("").is_err());
    }

    #[test]
    fn field_spec_deserializes_wire_shape() {
        let spec: FieldSpec = serde_json::from_value(json!({
            "name": "author",
            "type": "ObjectId",
            "ref": "User"
        }))
        .unwrap();
        assert_eq!(spec.field_type, "ObjectId");
        assert_eq!(spec.ref_model.as_deref(), Some("User"));
        assert!(!spec.required);
        assert!(spec.min.is_none());
    }

    #[test]
    fn compiled_field_omits_unset_attributes() {
        let field = CompiledField {
            field_type: FieldType::String,
            required: false,
            unique: false,
            default: None,
            ref_model: None,
            min: None,
            max: None,
        };
        let value = serde_json::to_value(&field).unwrap();
        let obj = value.as_object().unwrap();
        // Only the type tag survives; no `required: false` noise
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["type"], "String");
    }
}
