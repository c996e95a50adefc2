use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::database::models::ModelDefinition;
use crate::error::DbError;

/// Source of model definitions, implemented by the embedder over its
/// system-of-record. The manager reads definitions to compile schemas; it
/// never owns their persistence.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// All model definitions declared by a tenant.
    async fn definitions(&self, tenant_id: &str) -> Result<Vec<ModelDefinition>, DbError>;

    /// One definition by model name, if declared.
    async fn definition(
        &self,
        tenant_id: &str,
        model_name: &str,
    ) -> Result<Option<ModelDefinition>, DbError> {
        Ok(self
            .definitions(tenant_id)
            .await?
            .into_iter()
            .find(|d| d.name == model_name))
    }
}

/// In-memory definition source for tests and simple embedders.
#[derive(Debug, Default)]
pub struct StaticDefinitions {
    inner: RwLock<HashMap<String, Vec<ModelDefinition>>>,
}

impl StaticDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: impl Into<String>, definition: ModelDefinition) {
        let mut inner = self.inner.write().await;
        let definitions = inner.entry(tenant_id.into()).or_default();
        definitions.retain(|d| d.name != definition.name);
        definitions.push(definition);
    }

    pub async fn remove(&self, tenant_id: &str, model_name: &str) {
        let mut inner = self.inner.write().await;
        if let Some(definitions) = inner.get_mut(tenant_id) {
            definitions.retain(|d| d.name != model_name);
        }
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitions {
    async fn definitions(&self, tenant_id: &str) -> Result<Vec<ModelDefinition>, DbError> {
        Ok(self
            .inner
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
