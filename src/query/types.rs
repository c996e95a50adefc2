use bson::oid::ObjectId;
use bson::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Read-request payload as supplied by a request handler.
///
/// Everything is optional; `build_find` decides which of the mutually
/// exclusive shapes (pipeline, distinct, count, by-id, filtered query)
/// the request resolves to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindData {
    pub id: Option<String>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    pub search: Option<String>,
    pub fields: Option<Vec<String>>,
    pub populate: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub sort: Option<Map<String, Value>>,
    #[serde(default)]
    pub count_only: bool,
    pub distinct: Option<String>,
    pub pipeline: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateData {
    pub id: Option<String>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteData {
    pub id: Option<String>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub many: bool,
}

/// One `$lookup` relation resolution derived from `populate`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupStage {
    pub field: String,
    pub from: String,
}

/// Fully planned read, ready to execute against a bound collection.
#[derive(Debug, Clone)]
pub enum FindPlan {
    Aggregate { pipeline: Vec<Document> },
    Distinct { field: String, filter: Document },
    Count { filter: Document },
    ById { id: ObjectId },
    Query(QueryPlan),
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub filter: Document,
    pub sort: Option<Document>,
    pub skip: u64,
    pub limit: i64,
    pub projection: Option<Document>,
    pub lookups: Vec<LookupStage>,
}

/// Which documents a write addresses.
#[derive(Debug, Clone)]
pub enum WriteTarget {
    Id(ObjectId),
    Filter(Document),
}

#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub target: WriteTarget,
    pub update: Document,
}

#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub target: WriteTarget,
    pub many: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_data_defaults_from_empty_object() {
        let data: FindData = serde_json::from_value(json!({})).unwrap();
        assert!(data.id.is_none());
        assert!(data.filters.is_empty());
        assert!(!data.count_only);
        assert!(data.limit.is_none());
    }

    #[test]
    fn delete_data_defaults_many_false() {
        let data: DeleteData =
            serde_json::from_value(json!({"filters": {"status": "x"}})).unwrap();
        assert!(!data.many);
        assert_eq!(data.filters.len(), 1);
    }
}
