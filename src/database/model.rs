use mongodb::Collection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use bson::Document;

use crate::database::connection::ConnectionEntry;
use crate::error::DbError;
use crate::schema::types::{CollectionSchema, FieldSpec};
use crate::schema::compile;

/// One bound model: a collection accessor plus the schema it was compiled
/// against. Valid only while its tenant's connection entry is valid.
#[derive(Clone, Debug)]
pub struct ModelEntry {
    pub tenant_id: String,
    pub model_name: String,
    pub collection: Collection<Document>,
    pub schema: CollectionSchema,
}

/// Cache of bound models keyed by (tenant id, model name).
///
/// Binding is synchronous and I/O-free, so cold keys are populated under
/// the write lock: the compiler runs exactly once per key and two
/// concurrent callers converge on the same entry.
pub struct ModelRegistry {
    models: RwLock<HashMap<String, HashMap<String, Arc<ModelEntry>>>>,
    compile_count: AtomicU64,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            compile_count: AtomicU64::new(0),
        }
    }

    /// Cached lookup, no I/O.
    pub async fn get(&self, tenant_id: &str, model_name: &str) -> Option<Arc<ModelEntry>> {
        let models = self.models.read().await;
        models.get(tenant_id).and_then(|m| m.get(model_name)).cloned()
    }

    /// Return the cached model or compile, bind, and cache one against the
    /// supplied connection.
    pub async fn get_or_create(
        &self,
        connection: &ConnectionEntry,
        model_name: &str,
        fields: &[FieldSpec],
    ) -> Result<Arc<ModelEntry>, DbError> {
        // Fast path: try read lock
        {
            let models = self.models.read().await;
            if let Some(entry) = models.get(&connection.tenant_id).and_then(|m| m.get(model_name))
            {
                tracing::debug!(
                    "model cache hit: {}/{}",
                    connection.tenant_id,
                    model_name
                );
                return Ok(entry.clone());
            }
        }

        let mut models = self.models.write().await;

        // Re-check under the write lock; a concurrent caller may have bound
        // the model while this one waited
        if let Some(entry) = models.get(&connection.tenant_id).and_then(|m| m.get(model_name)) {
            return Ok(entry.clone());
        }

        self.compile_count.fetch_add(1, Ordering::Relaxed);
        let schema = compile(fields)?;
        let collection = connection.database().collection::<Document>(model_name);

        let entry = Arc::new(ModelEntry {
            tenant_id: connection.tenant_id.clone(),
            model_name: model_name.to_string(),
            collection,
            schema,
        });

        models
            .entry(connection.tenant_id.clone())
            .or_default()
            .insert(model_name.to_string(), entry.clone());

        tracing::info!("bound model {}/{}", connection.tenant_id, model_name);
        Ok(entry)
    }

    /// Cached model names for a tenant; falls back to the live collection
    /// listing when the cache is cold (models created by a prior process).
    pub async fn list_names(
        &self,
        connection: &ConnectionEntry,
    ) -> Result<Vec<String>, DbError> {
        {
            let models = self.models.read().await;
            if let Some(tenant_models) = models.get(&connection.tenant_id) {
                if !tenant_models.is_empty() {
                    let mut names: Vec<String> = tenant_models.keys().cloned().collect();
                    names.sort();
                    return Ok(names);
                }
            }
        }

        let mut names = connection.database().list_collection_names().await?;
        names.sort();
        Ok(names)
    }

    /// Names currently cached for a tenant, without touching the store.
    pub async fn cached_names(&self, tenant_id: &str) -> Vec<String> {
        let models = self.models.read().await;
        let mut names: Vec<String> = models
            .get(tenant_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Drop one cached model. No-op when absent.
    pub async fn evict_model(&self, tenant_id: &str, model_name: &str) {
        let mut models = self.models.write().await;
        if let Some(tenant_models) = models.get_mut(tenant_id) {
            if tenant_models.remove(model_name).is_some() {
                tracing::info!("evicted model {}/{}", tenant_id, model_name);
            }
            if tenant_models.is_empty() {
                models.remove(tenant_id);
            }
        }
    }

    /// Drop every cached model for a tenant. Runs on connection eviction
    /// and tenant deletion.
    pub async fn evict_tenant(&self, tenant_id: &str) {
        let mut models = self.models.write().await;
        if let Some(tenant_models) = models.remove(tenant_id) {
            tracing::info!(
                "evicted {} cached model(s) for tenant {}",
                tenant_models.len(),
                tenant_id
            );
        }
    }

    /// Drop every cached model for every tenant (process shutdown).
    pub async fn clear(&self) {
        self.models.write().await.clear();
    }

    /// How many times the schema compiler has run. Observability; also
    /// what lets tests pin down cache convergence.
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::Relaxed)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eviction_is_safe_when_absent() {
        let registry = ModelRegistry::new();
        registry.evict_model("t1", "Post").await;
        registry.evict_tenant("t1").await;
        assert!(registry.get("t1", "Post").await.is_none());
        assert_eq!(registry.compile_count(), 0);
    }

    #[tokio::test]
    async fn cached_names_are_sorted_and_tenant_scoped() {
        let registry = ModelRegistry::new();
        assert!(registry.cached_names("t1").await.is_empty());
    }
}
