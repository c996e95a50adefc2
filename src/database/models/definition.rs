use serde::{Deserialize, Serialize};

use crate::schema::types::FieldSpec;

/// One model declaration owned by a tenant: a collection name plus the
/// field list its schema compiles from. A model named `User` in one tenant
/// is wholly independent of a model named `User` in another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self { name: name.into(), fields }
    }
}
