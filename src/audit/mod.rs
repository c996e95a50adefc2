// Audit and metering events emitted on every executor call.
// The sink is a collaborator: the embedding application owns storage of the
// log and the per-tenant counters; this crate only emits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Endpoint kind of an executor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Find,
    Update,
    Delete,
}

impl OperationKind {
    /// Conventional HTTP verb equivalent for the audit record. Find is POST:
    /// filter payloads travel in a request body, not a query string.
    pub fn method(&self) -> &'static str {
        match self {
            OperationKind::Create => "POST",
            OperationKind::Find => "POST",
            OperationKind::Update => "PATCH",
            OperationKind::Delete => "DELETE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Find => "find",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// One audit record. Emitted for every executor call, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub collection: String,
    pub operation: OperationKind,
    pub method: &'static str,
    pub status: OutcomeStatus,
    pub status_code: u16,
    pub duration_ms: u64,
    pub request_summary: Option<String>,
    pub response_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink failure: {0}")]
    Sink(String),
}

/// Outbound audit/metering contract, implemented by the embedder over its
/// system-of-record. Failures here never affect the primary operation; the
/// executor swallows them after logging to the diagnostic channel.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    async fn bump_request_count(&self, tenant_id: &str) -> Result<(), AuditError>;
}

/// Default sink: diagnostic logging only, no storage.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            tenant = %event.tenant_id,
            collection = %event.collection,
            operation = event.operation.as_str(),
            status_code = event.status_code,
            duration_ms = event.duration_ms,
            "audit event"
        );
        Ok(())
    }

    async fn bump_request_count(&self, tenant_id: &str) -> Result<(), AuditError> {
        tracing::debug!(tenant = %tenant_id, "request counter increment");
        Ok(())
    }
}

/// In-memory sink for tests and simple embedders.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    counts: Mutex<HashMap<String, u64>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit events lock").clone()
    }

    pub fn request_count(&self, tenant_id: &str) -> u64 {
        self.counts
            .lock()
            .expect("audit counts lock")
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.lock().expect("audit events lock").push(event);
        Ok(())
    }

    async fn bump_request_count(&self, tenant_id: &str) -> Result<(), AuditError> {
        *self
            .counts
            .lock()
            .expect("audit counts lock")
            .entry(tenant_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}
