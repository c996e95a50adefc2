#![allow(dead_code)]

use std::sync::Arc;

use basin::audit::MemoryAuditSink;
use basin::config::ManagerConfig;
use basin::database::{DbManager, ModelDefinition, StaticDefinitions};
use basin::schema::FieldSpec;

/// Store URL for integration tests, e.g. `mongodb://localhost:27017`.
/// Tests that need a live store skip cleanly when this is unset.
pub fn store_url() -> Option<String> {
    std::env::var("BASIN_TEST_MONGODB_URL")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
}

pub struct TestContext {
    pub manager: Arc<DbManager>,
    pub definitions: Arc<StaticDefinitions>,
    pub audit: Arc<MemoryAuditSink>,
    pub tenant_id: String,
    pub tenant_url: String,
}

impl TestContext {
    /// Build a manager against a unique per-test tenant database, or `None`
    /// when no store URL is configured.
    pub async fn new() -> Option<Self> {
        let base = store_url()?;

        let unique = uuid::Uuid::new_v4().simple().to_string();
        // Tenant ids are opaque 24-hex identifiers in the reference deployment
        let tenant_id = unique[..24].to_string();
        let tenant_url = format!("{}/basin_test_{}", base, &unique[..8]);

        let definitions = Arc::new(StaticDefinitions::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let manager = Arc::new(DbManager::new(
            ManagerConfig::development(),
            definitions.clone(),
            audit.clone(),
        ));

        Some(Self { manager, definitions, audit, tenant_id, tenant_url })
    }

    /// Declare the stock `Post` model used across the executor tests.
    pub async fn declare_post_model(&self) {
        self.definitions
            .insert(
                &self.tenant_id,
                ModelDefinition::new(
                    "Post",
                    vec![
                        FieldSpec::new("title", "String").required(),
                        FieldSpec::new("body", "String"),
                        FieldSpec::new("views", "Number").with_default(serde_json::json!(0)),
                        FieldSpec::new("author", "ObjectId").with_ref("User"),
                    ],
                ),
            )
            .await;
    }

    /// Drop the per-test tenant database.
    pub async fn cleanup(&self) {
        if let Some(entry) = self.manager.connection(&self.tenant_id).await {
            let _ = entry.database().drop().await;
        }
        self.manager.close_all().await;
    }
}
