use serde_json::{Map, Value};
use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::ManagerConfig;
use crate::database::connection::{ConnectionEntry, ConnectionRegistry};
use crate::database::definitions::DefinitionSource;
use crate::database::executor::Executor;
use crate::database::model::{ModelEntry, ModelRegistry};
use crate::database::sweeper::{Sweeper, SweeperHandle};
use crate::error::DbError;
use crate::query::types::{DeleteData, FindData, UpdateData};
use crate::schema::types::FieldSpec;

/// Facade over the connection registry, model registry, and executor.
///
/// Constructed once per process and passed by handle to whatever serves
/// requests. All state it owns is in-memory cache, rebuildable from the
/// caller's system-of-record and disposable at any time.
pub struct DbManager {
    config: ManagerConfig,
    connections: Arc<ConnectionRegistry>,
    models: Arc<ModelRegistry>,
    executor: Executor,
}

impl DbManager {
    pub fn new(
        config: ManagerConfig,
        definitions: Arc<dyn DefinitionSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let models = Arc::new(ModelRegistry::new());
        let connections =
            Arc::new(ConnectionRegistry::new(config.connection.clone(), models.clone()));
        let executor = Executor::new(
            config.clone(),
            connections.clone(),
            models.clone(),
            definitions,
            audit,
        );

        Self { config, connections, models, executor }
    }

    /// Construct with environment-derived config and the diagnostic-only
    /// audit sink.
    pub fn from_env(definitions: Arc<dyn DefinitionSource>) -> Self {
        Self::new(
            crate::config::config().clone(),
            definitions,
            Arc::new(TracingAuditSink),
        )
    }

    /// Establish (or reuse) the tenant's connection. Fully installs the
    /// handle before returning; a subsequent model resolution for this
    /// tenant observes it.
    pub async fn connect(
        &self,
        tenant_id: &str,
        connection_url: &str,
    ) -> Result<Arc<ConnectionEntry>, DbError> {
        self.connections.connect(tenant_id, connection_url).await
    }

    /// Establish a connection from a tenant record supplied by the
    /// system-of-record.
    pub async fn connect_tenant(
        &self,
        tenant: &crate::database::models::Tenant,
    ) -> Result<Arc<ConnectionEntry>, DbError> {
        self.connections.connect(&tenant.id, &tenant.connection_url).await
    }

    /// Cached connection lookup, no I/O.
    pub async fn connection(&self, tenant_id: &str) -> Option<Arc<ConnectionEntry>> {
        self.connections.get(tenant_id).await
    }

    /// Resolve a bound model from explicit field specs, compiling and
    /// caching on first use. Requires a prior successful `connect`.
    pub async fn get_or_create_model(
        &self,
        tenant_id: &str,
        model_name: &str,
        fields: &[FieldSpec],
    ) -> Result<Arc<ModelEntry>, DbError> {
        let connection = self
            .connections
            .get(tenant_id)
            .await
            .ok_or_else(|| DbError::NotConnected(tenant_id.to_string()))?;
        self.models.get_or_create(&connection, model_name, fields).await
    }

    /// Model names for a tenant: the cache when warm, the live collection
    /// listing when cold-started.
    pub async fn list_model_names(&self, tenant_id: &str) -> Result<Vec<String>, DbError> {
        let connection = self
            .connections
            .get(tenant_id)
            .await
            .ok_or_else(|| DbError::NotConnected(tenant_id.to_string()))?;
        self.models.list_names(&connection).await
    }

    /// Drop one cached model binding (model definition deleted). No-op
    /// when absent.
    pub async fn evict_model(&self, tenant_id: &str, model_name: &str) {
        self.models.evict_model(tenant_id, model_name).await;
    }

    /// Full cascade eviction for a tenant: connection entry and every
    /// dependent model entry.
    pub async fn evict_tenant(&self, tenant_id: &str) {
        self.connections.evict(tenant_id).await;
    }

    /// Ping a tenant's connection on demand.
    pub async fn health_check(&self, tenant_id: &str) -> Result<(), DbError> {
        let connection = self
            .connections
            .get(tenant_id)
            .await
            .ok_or_else(|| DbError::NotConnected(tenant_id.to_string()))?;
        connection.ping(self.config.connection.ping_timeout()).await
    }

    pub async fn create(
        &self,
        tenant_id: &str,
        collection: &str,
        document: Map<String, Value>,
    ) -> Result<Value, DbError> {
        self.executor.create(tenant_id, collection, document).await
    }

    pub async fn find(
        &self,
        tenant_id: &str,
        collection: &str,
        data: FindData,
    ) -> Result<Value, DbError> {
        self.executor.find(tenant_id, collection, data).await
    }

    pub async fn update(
        &self,
        tenant_id: &str,
        collection: &str,
        data: UpdateData,
    ) -> Result<Value, DbError> {
        self.executor.update(tenant_id, collection, data).await
    }

    pub async fn delete(
        &self,
        tenant_id: &str,
        collection: &str,
        data: DeleteData,
    ) -> Result<Value, DbError> {
        self.executor.delete(tenant_id, collection, data).await
    }

    /// Start the background liveness sweeper, if enabled. Returns `None`
    /// when disabled by config.
    pub fn start_sweeper(&self) -> Option<SweeperHandle> {
        if !self.config.sweeper.enabled {
            tracing::info!("connection sweeper disabled by config");
            return None;
        }
        let sweeper = Sweeper::new(
            self.connections.clone(),
            &self.config.sweeper,
            self.config.connection.ping_timeout(),
        );
        Some(sweeper.spawn())
    }

    /// Close and remove all connections and model bindings (e.g., on
    /// shutdown).
    pub async fn close_all(&self) {
        self.connections.close_all().await;
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::database::definitions::StaticDefinitions;

    fn manager() -> DbManager {
        DbManager::new(
            ManagerConfig::development(),
            Arc::new(StaticDefinitions::new()),
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[tokio::test]
    async fn model_resolution_requires_a_connection() {
        let manager = manager();
        let err = manager
            .get_or_create_model("t1", "Post", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotConnected(_)));
    }

    #[tokio::test]
    async fn list_model_names_requires_a_connection() {
        let manager = manager();
        let err = manager.list_model_names("t1").await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected(_)));
    }

    #[tokio::test]
    async fn eviction_of_unknown_tenant_is_a_no_op() {
        let manager = manager();
        manager.evict_model("t1", "Post").await;
        manager.evict_tenant("t1").await;
        assert!(manager.connection("t1").await.is_none());
    }
}
