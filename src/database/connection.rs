use chrono::{DateTime, Utc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use bson::doc;

use crate::config::ConnectionConfig;
use crate::database::model::ModelRegistry;
use crate::error::DbError;

/// One live logical connection for a tenant.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub tenant_id: String,
    client: Client,
    database: Database,
    pub created_at: DateTime<Utc>,
}

impl ConnectionEntry {
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Liveness probe: a bounded `ping`. Any failure reads as dead.
    pub async fn ping(&self, timeout: Duration) -> Result<(), DbError> {
        match tokio::time::timeout(timeout, self.database.run_command(doc! { "ping": 1 })).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(DbError::Timeout(format!(
                "ping for tenant {} exceeded {:?}",
                self.tenant_id, timeout
            ))),
        }
    }
}

/// Reject empty and placeholder connection strings before any dial.
/// Template markers (`<host>`) and non-mongodb schemes are configuration
/// mistakes, not dial failures.
pub fn validate_connection_url(url: &str) -> Result<(), DbError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(DbError::InvalidConnectionString(
            "connection string is empty".to_string(),
        ));
    }
    if trimmed.eq_ignore_ascii_case("undefined") || trimmed.eq_ignore_ascii_case("null") {
        return Err(DbError::InvalidConnectionString(format!(
            "placeholder connection string: {}",
            trimmed
        )));
    }
    if trimmed.contains('<') || trimmed.contains('>') {
        return Err(DbError::InvalidConnectionString(
            "connection string still contains template markers".to_string(),
        ));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;
    match parsed.scheme() {
        "mongodb" | "mongodb+srv" => Ok(()),
        other => Err(DbError::InvalidConnectionString(format!(
            "unsupported scheme: {}",
            other
        ))),
    }
}

/// Cache of live connections keyed by tenant id, with at most one entry per
/// tenant. Lookups are read-lock map hits; dialing and eviction for the
/// same tenant are serialized through a per-tenant mutex so concurrent
/// callers observe exactly one dial and never a half-installed handle.
pub struct ConnectionRegistry {
    config: ConnectionConfig,
    connections: RwLock<HashMap<String, Arc<ConnectionEntry>>>,
    tenant_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    models: Arc<ModelRegistry>,
    dial_count: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig, models: Arc<ModelRegistry>) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            tenant_locks: Mutex::new(HashMap::new()),
            models,
            dial_count: AtomicU64::new(0),
        }
    }

    /// Cached lookup, no I/O.
    pub async fn get(&self, tenant_id: &str) -> Option<Arc<ConnectionEntry>> {
        let connections = self.connections.read().await;
        connections.get(tenant_id).cloned()
    }

    /// Connected tenant ids, for the sweeper and for diagnostics.
    pub async fn tenant_ids(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut ids: Vec<String> = connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get a live connection for the tenant, dialing if needed.
    ///
    /// Idempotent: a healthy existing entry is returned as-is. A dead entry
    /// is replaced, and replacing it resets the tenant's model cache (fresh
    /// connections invalidate previously bound models). The dial itself is
    /// bounded by the configured connect timeout; a timed-out dial installs
    /// nothing.
    pub async fn connect(
        &self,
        tenant_id: &str,
        connection_url: &str,
    ) -> Result<Arc<ConnectionEntry>, DbError> {
        validate_connection_url(connection_url)?;

        // Fast path: reuse a healthy existing entry without the tenant lock
        if let Some(entry) = self.get(tenant_id).await {
            if entry.ping(self.config.ping_timeout()).await.is_ok() {
                tracing::debug!("reusing live connection for tenant {}", tenant_id);
                return Ok(entry);
            }
        }

        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        // Re-check under the tenant lock; a concurrent caller may have
        // installed a fresh handle while this one waited
        if let Some(entry) = self.get(tenant_id).await {
            if entry.ping(self.config.ping_timeout()).await.is_ok() {
                return Ok(entry);
            }
        }

        let entry = Arc::new(self.dial(tenant_id, connection_url).await?);

        // Clear dependent model entries before the new handle becomes
        // visible, then install. Readers either see the old world or the
        // fully installed new one.
        self.models.evict_tenant(tenant_id).await;
        {
            let mut connections = self.connections.write().await;
            connections.insert(tenant_id.to_string(), entry.clone());
        }

        tracing::info!("connected tenant {} ({})", tenant_id, entry.database.name());
        Ok(entry)
    }

    async fn dial(&self, tenant_id: &str, connection_url: &str) -> Result<ConnectionEntry, DbError> {
        let connect_timeout = self.config.connect_timeout();
        let parsed = tokio::time::timeout(connect_timeout, ClientOptions::parse(connection_url))
            .await
            .map_err(|_| {
                DbError::Timeout(format!("parsing connection options for tenant {}", tenant_id))
            })?;
        let mut options =
            parsed.map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;
        options.connect_timeout = Some(connect_timeout);
        options.server_selection_timeout = Some(connect_timeout);

        self.dial_count.fetch_add(1, Ordering::Relaxed);
        let client = Client::with_options(options)
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database("test"));

        let entry = ConnectionEntry {
            tenant_id: tenant_id.to_string(),
            client,
            database,
            created_at: Utc::now(),
        };

        // The driver dials lazily; prove the deployment is reachable before
        // anything gets installed
        match tokio::time::timeout(connect_timeout, entry.database.run_command(doc! { "ping": 1 }))
            .await
        {
            Ok(Ok(_)) => Ok(entry),
            Ok(Err(e)) => Err(DbError::ConnectionError(e.to_string())),
            Err(_) => Err(DbError::Timeout(format!(
                "dial for tenant {} exceeded {:?}",
                tenant_id, connect_timeout
            ))),
        }
    }

    /// Remove a tenant's entry and cascade-evict its model entries.
    /// Takes the same per-tenant lock as `connect`; safe when absent.
    pub async fn evict(&self, tenant_id: &str) {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;
        self.remove_entry(tenant_id).await;
    }

    /// Evict only if the cached entry is still the one the caller probed.
    /// The sweeper uses this so a dead-ping verdict can never tear down a
    /// fresh handle installed by a concurrent `connect`.
    pub async fn evict_if_current(&self, tenant_id: &str, probed: &Arc<ConnectionEntry>) -> bool {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let current = {
            let connections = self.connections.read().await;
            connections.get(tenant_id).cloned()
        };
        match current {
            Some(entry) if Arc::ptr_eq(&entry, probed) => {
                self.remove_entry(tenant_id).await;
                true
            }
            _ => false,
        }
    }

    async fn remove_entry(&self, tenant_id: &str) {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(tenant_id)
        };
        if removed.is_some() {
            self.models.evict_tenant(tenant_id).await;
            tracing::info!("evicted connection for tenant {}", tenant_id);
        }
    }

    /// Drop every entry and every dependent model (process shutdown).
    /// The driver tears down its pools when the last handle drops.
    pub async fn close_all(&self) {
        let drained: Vec<String> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(tenant_id, _)| tenant_id).collect()
        };
        self.models.clear().await;
        for tenant_id in drained {
            tracing::info!("closed connection for tenant {}", tenant_id);
        }
    }

    /// How many dials have been attempted. Observability; also what lets
    /// tests pin down the single-flight property.
    pub fn dial_count(&self) -> u64 {
        self.dial_count.load(Ordering::Relaxed)
    }

    async fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.tenant_locks.lock().await;
        locks.entry(tenant_id.to_string()).or_default().clone()
    }
}
