use bson::{doc, Bson, Document};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use serde_json::{json, Map, Value};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditEvent, AuditSink, OperationKind, OutcomeStatus};
use crate::config::ManagerConfig;
use crate::database::connection::ConnectionRegistry;
use crate::database::definitions::DefinitionSource;
use crate::database::model::{ModelEntry, ModelRegistry};
use crate::error::DbError;
use crate::query::builder::{build_create, build_delete, build_find, build_update, query_pipeline};
use crate::query::types::{DeleteData, FindData, FindPlan, UpdateData, WriteTarget};

const SUMMARY_MAX_CHARS: usize = 240;

/// Runs create/find/update/delete requests against a tenant's bound models.
///
/// Every call, success or failure, emits one audit event and one per-tenant
/// request counter increment before returning. Sink failures are logged to
/// the diagnostic channel and swallowed; observability never becomes a
/// reliability hazard for the primary operation.
pub struct Executor {
    config: ManagerConfig,
    connections: Arc<ConnectionRegistry>,
    models: Arc<ModelRegistry>,
    definitions: Arc<dyn DefinitionSource>,
    audit: Arc<dyn AuditSink>,
}

impl Executor {
    pub fn new(
        config: ManagerConfig,
        connections: Arc<ConnectionRegistry>,
        models: Arc<ModelRegistry>,
        definitions: Arc<dyn DefinitionSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { config, connections, models, definitions, audit }
    }

    /// Insert one document. Returns the stored document, including its
    /// generated identifier and timestamps.
    pub async fn create(
        &self,
        tenant_id: &str,
        collection: &str,
        document: Map<String, Value>,
    ) -> Result<Value, DbError> {
        let started = Instant::now();
        let request = self.summarize(&Value::Object(document.clone()));
        let result = self.create_inner(tenant_id, collection, document).await;
        self.finish(tenant_id, collection, OperationKind::Create, request, started, &result)
            .await;
        result
    }

    /// Run a read request: aggregation, distinct, count, point read, or a
    /// bounded filtered query.
    pub async fn find(
        &self,
        tenant_id: &str,
        collection: &str,
        data: FindData,
    ) -> Result<Value, DbError> {
        let started = Instant::now();
        let request = serde_json::to_value(&data).ok().and_then(|v| self.summarize(&v));
        let result = self.find_inner(tenant_id, collection, data).await;
        self.finish(tenant_id, collection, OperationKind::Find, request, started, &result)
            .await;
        result
    }

    /// Apply a set-style partial update by id or filters.
    pub async fn update(
        &self,
        tenant_id: &str,
        collection: &str,
        data: UpdateData,
    ) -> Result<Value, DbError> {
        let started = Instant::now();
        let request = serde_json::to_value(&data).ok().and_then(|v| self.summarize(&v));
        let result = self.update_inner(tenant_id, collection, data).await;
        self.finish(tenant_id, collection, OperationKind::Update, request, started, &result)
            .await;
        result
    }

    /// Delete by id, by filters in bulk, or a single filter match.
    pub async fn delete(
        &self,
        tenant_id: &str,
        collection: &str,
        data: DeleteData,
    ) -> Result<Value, DbError> {
        let started = Instant::now();
        let request = serde_json::to_value(&data).ok().and_then(|v| self.summarize(&v));
        let result = self.delete_inner(tenant_id, collection, data).await;
        self.finish(tenant_id, collection, OperationKind::Delete, request, started, &result)
            .await;
        result
    }

    async fn create_inner(
        &self,
        tenant_id: &str,
        collection: &str,
        document: Map<String, Value>,
    ) -> Result<Value, DbError> {
        let model = self.resolve(tenant_id, collection).await?;
        let planned = build_create(&model.schema, &document, Utc::now())?;

        let inserted = self.bounded("insert", model.collection.insert_one(&planned)).await?;

        let mut stored = planned;
        stored.insert("_id", inserted.inserted_id);
        Ok(Bson::Document(stored).into_relaxed_extjson())
    }

    async fn find_inner(
        &self,
        tenant_id: &str,
        collection: &str,
        data: FindData,
    ) -> Result<Value, DbError> {
        let model = self.resolve(tenant_id, collection).await?;

        match build_find(&model.schema, &self.config.find, &data)? {
            FindPlan::Aggregate { pipeline } => {
                let docs = self
                    .bounded("aggregate", async {
                        model
                            .collection
                            .aggregate(pipeline)
                            .await?
                            .try_collect::<Vec<Document>>()
                            .await
                    })
                    .await?;
                Ok(documents_to_json(docs))
            }
            FindPlan::Distinct { field, filter } => {
                let values =
                    self.bounded("distinct", model.collection.distinct(field, filter)).await?;
                Ok(Value::Array(
                    values.into_iter().map(Bson::into_relaxed_extjson).collect(),
                ))
            }
            FindPlan::Count { filter } => {
                let count =
                    self.bounded("count", model.collection.count_documents(filter)).await?;
                Ok(json!({ "count": count }))
            }
            FindPlan::ById { id } => {
                let found = self
                    .bounded("find_one", model.collection.find_one(doc! { "_id": id }))
                    .await?;
                match found {
                    Some(document) => Ok(Bson::Document(document).into_relaxed_extjson()),
                    None => Err(DbError::NotFound(format!(
                        "no {} document with id {}",
                        collection, id
                    ))),
                }
            }
            FindPlan::Query(plan) => {
                let docs = if plan.lookups.is_empty() {
                    let mut options = FindOptions::default();
                    options.sort = plan.sort.clone();
                    options.skip = Some(plan.skip);
                    options.limit = Some(plan.limit);
                    options.projection = plan.projection.clone();

                    self.bounded("find", async {
                        model
                            .collection
                            .find(plan.filter.clone())
                            .with_options(options)
                            .await?
                            .try_collect::<Vec<Document>>()
                            .await
                    })
                    .await?
                } else {
                    let pipeline = query_pipeline(&plan);
                    self.bounded("find", async {
                        model
                            .collection
                            .aggregate(pipeline)
                            .await?
                            .try_collect::<Vec<Document>>()
                            .await
                    })
                    .await?
                };
                Ok(documents_to_json(docs))
            }
        }
    }

    async fn update_inner(
        &self,
        tenant_id: &str,
        collection: &str,
        data: UpdateData,
    ) -> Result<Value, DbError> {
        let model = self.resolve(tenant_id, collection).await?;
        let plan = build_update(&model.schema, &data, Utc::now())?;

        let result = match plan.target {
            WriteTarget::Id(id) => {
                self.bounded("update", model.collection.update_one(doc! { "_id": id }, plan.update))
                    .await?
            }
            WriteTarget::Filter(filter) => {
                self.bounded("update", model.collection.update_many(filter, plan.update)).await?
            }
        };

        if result.matched_count == 0 {
            return Err(DbError::NotFound(format!(
                "update matched no {} documents",
                collection
            )));
        }
        Ok(json!({ "matched": result.matched_count, "modified": result.modified_count }))
    }

    async fn delete_inner(
        &self,
        tenant_id: &str,
        collection: &str,
        data: DeleteData,
    ) -> Result<Value, DbError> {
        let model = self.resolve(tenant_id, collection).await?;
        let plan = build_delete(&data)?;

        match (plan.target, plan.many) {
            (WriteTarget::Id(id), _) => {
                let result = self
                    .bounded("delete", model.collection.delete_one(doc! { "_id": id }))
                    .await?;
                if result.deleted_count == 0 {
                    return Err(DbError::NotFound(format!(
                        "no {} document with id {}",
                        collection, id
                    )));
                }
                Ok(json!({ "deleted": result.deleted_count }))
            }
            (WriteTarget::Filter(filter), true) => {
                // Zero matches is a valid empty batch delete
                let result =
                    self.bounded("delete", model.collection.delete_many(filter)).await?;
                Ok(json!({ "deleted": result.deleted_count }))
            }
            (WriteTarget::Filter(filter), false) => {
                let result =
                    self.bounded("delete", model.collection.delete_one(filter)).await?;
                if result.deleted_count == 0 {
                    return Err(DbError::NotFound(format!(
                        "delete matched no {} documents",
                        collection
                    )));
                }
                Ok(json!({ "deleted": result.deleted_count }))
            }
        }
    }

    /// Resolve the bound model for a request: live connection first, then
    /// the model cache, then a definition lookup + compile on cold keys.
    async fn resolve(&self, tenant_id: &str, collection: &str) -> Result<Arc<ModelEntry>, DbError> {
        let connection = self
            .connections
            .get(tenant_id)
            .await
            .ok_or_else(|| DbError::NotConnected(tenant_id.to_string()))?;

        if let Some(entry) = self.models.get(tenant_id, collection).await {
            return Ok(entry);
        }

        let definition = self
            .definitions
            .definition(tenant_id, collection)
            .await?
            .ok_or_else(|| {
                DbError::ModelNotFound(format!("{} (tenant {})", collection, tenant_id))
            })?;

        self.models.get_or_create(&connection, collection, &definition.fields).await
    }

    /// Bound a store round-trip by the configured operation timeout.
    /// Timed-out queries fail without touching registry state.
    async fn bounded<T, F>(&self, what: &'static str, op: F) -> Result<T, DbError>
    where
        F: IntoFuture<Output = Result<T, mongodb::error::Error>>,
    {
        match tokio::time::timeout(self.config.connection.operation_timeout(), op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(DbError::Timeout(what.to_string())),
        }
    }

    fn summarize(&self, value: &Value) -> Option<String> {
        if !self.config.audit.log_request_summaries {
            return None;
        }
        let mut rendered = value.to_string();
        if rendered.len() > SUMMARY_MAX_CHARS {
            rendered.truncate(
                rendered
                    .char_indices()
                    .take_while(|(i, _)| *i < SUMMARY_MAX_CHARS)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0),
            );
            rendered.push('…');
        }
        Some(rendered)
    }

    /// The logged stage: fires on every outcome.
    async fn finish(
        &self,
        tenant_id: &str,
        collection: &str,
        operation: OperationKind,
        request_summary: Option<String>,
        started: Instant,
        result: &Result<Value, DbError>,
    ) {
        let (status, status_code, response_summary) = match result {
            Ok(value) => (
                OutcomeStatus::Success,
                if operation == OperationKind::Create { 201 } else { 200 },
                self.summarize(value),
            ),
            Err(e) => (OutcomeStatus::Failure, e.status_code(), Some(e.to_string())),
        };

        let event = AuditEvent {
            tenant_id: tenant_id.to_string(),
            collection: collection.to_string(),
            operation,
            method: operation.method(),
            status,
            status_code,
            duration_ms: started.elapsed().as_millis() as u64,
            request_summary,
            response_summary,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.audit.record(event).await {
            tracing::warn!("audit sink failure (ignored): {}", e);
        }
        if let Err(e) = self.audit.bump_request_count(tenant_id).await {
            tracing::warn!("request counter failure (ignored): {}", e);
        }
    }
}

fn documents_to_json(docs: Vec<Document>) -> Value {
    Value::Array(
        docs.into_iter()
            .map(|d| Bson::Document(d).into_relaxed_extjson())
            .collect(),
    )
}
