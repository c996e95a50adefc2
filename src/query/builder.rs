use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::FindConfig;
use crate::error::DbError;
use crate::query::types::{
    DeleteData, DeletePlan, FindData, FindPlan, LookupStage, QueryPlan, UpdateData, UpdatePlan,
    WriteTarget,
};
use crate::schema::types::{CollectionSchema, FieldType};
use crate::schema::validate;

/// Parse a document identifier, rejecting anything that is not 24 hex
/// characters before any store round-trip happens.
pub fn parse_object_id(id: &str) -> Result<ObjectId, DbError> {
    ObjectId::parse_str(id).map_err(|_| DbError::InvalidId(id.to_string()))
}

fn json_to_bson(value: &Value) -> Result<Bson, DbError> {
    bson::to_bson(value)
        .map_err(|e| DbError::BadRequest(format!("unsupported value in payload: {}", e)))
}

fn map_to_document(map: &Map<String, Value>) -> Result<Document, DbError> {
    bson::to_document(map)
        .map_err(|e| DbError::BadRequest(format!("unsupported value in payload: {}", e)))
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Coerce string values to numbers for filter keys declared `Number`.
/// HTTP query inputs arrive as strings; the store compares by BSON type.
/// Applies to direct values and to values one level inside operator objects
/// (`{"views": {"$gte": "5"}}`).
fn coerce_number_filters(
    schema: &CollectionSchema,
    filters: &Map<String, Value>,
) -> Map<String, Value> {
    let mut coerced = filters.clone();

    for (key, value) in coerced.iter_mut() {
        let declared_number = schema
            .field(key)
            .map(|f| f.field_type == FieldType::Number)
            .unwrap_or(false);
        if !declared_number {
            continue;
        }

        match value {
            Value::String(raw) => {
                if let Some(number) = parse_number(raw) {
                    *value = number;
                }
            }
            Value::Object(ops) => {
                for (_, op_value) in ops.iter_mut() {
                    if let Value::String(raw) = op_value {
                        if let Some(number) = parse_number(raw) {
                            *op_value = number;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    coerced
}

fn escape_regex(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Case-insensitive substring match against every declared string field.
/// Returns `None` when the schema declares no string fields; an empty `$or`
/// is not a valid store query.
fn search_clause(schema: &CollectionSchema, term: &str) -> Option<Vec<Document>> {
    let fields = schema.string_fields();
    if fields.is_empty() {
        return None;
    }
    let escaped = escape_regex(term);
    Some(
        fields
            .into_iter()
            .map(|field| {
                let mut clause = Document::new();
                clause.insert(field, doc! { "$regex": escaped.as_str(), "$options": "i" });
                clause
            })
            .collect(),
    )
}

fn build_filter(
    schema: &CollectionSchema,
    filters: &Map<String, Value>,
    search: Option<&str>,
) -> Result<Document, DbError> {
    let coerced = coerce_number_filters(schema, filters);
    let mut filter = map_to_document(&coerced)?;

    if let Some(term) = search {
        if let Some(clauses) = search_clause(schema, term) {
            filter.insert("$or", clauses);
        }
    }

    Ok(filter)
}

fn sort_document(sort: &Map<String, Value>) -> Result<Document, DbError> {
    let mut out = Document::new();
    for (field, direction) in sort {
        let resolved = match direction {
            Value::Number(n) => match n.as_i64() {
                Some(1) => 1,
                Some(-1) => -1,
                _ => {
                    return Err(DbError::BadRequest(format!(
                        "invalid sort direction for '{}': expected 1 or -1",
                        field
                    )))
                }
            },
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "asc" => 1,
                "desc" => -1,
                _ => {
                    return Err(DbError::BadRequest(format!(
                        "invalid sort direction for '{}': {}",
                        field, s
                    )))
                }
            },
            _ => {
                return Err(DbError::BadRequest(format!(
                    "invalid sort direction for '{}'",
                    field
                )))
            }
        };
        out.insert(field, resolved as i32);
    }
    Ok(out)
}

/// Plan a read request.
///
/// Shape precedence: `pipeline` wins outright, then `distinct`, then
/// `count_only`, then `id`, then the filtered query path. A filtered query
/// must be bounded by filters or search.
pub fn build_find(
    schema: &CollectionSchema,
    config: &FindConfig,
    data: &FindData,
) -> Result<FindPlan, DbError> {
    if let Some(stages) = &data.pipeline {
        let mut pipeline = Vec::with_capacity(stages.len());
        for stage in stages {
            match stage {
                Value::Object(map) => pipeline.push(map_to_document(map)?),
                _ => {
                    return Err(DbError::BadRequest(
                        "aggregation pipeline stages must be objects".to_string(),
                    ))
                }
            }
        }
        return Ok(FindPlan::Aggregate { pipeline });
    }

    if let Some(field) = &data.distinct {
        let filter = build_filter(schema, &data.filters, None)?;
        return Ok(FindPlan::Distinct { field: field.clone(), filter });
    }

    if data.count_only {
        let filter = build_filter(schema, &data.filters, None)?;
        return Ok(FindPlan::Count { filter });
    }

    if let Some(id) = &data.id {
        return Ok(FindPlan::ById { id: parse_object_id(id)? });
    }

    if data.filters.is_empty() && data.search.is_none() {
        return Err(DbError::BadRequest(
            "find must be bounded by an id, filters, or search".to_string(),
        ));
    }

    let filter = build_filter(schema, &data.filters, data.search.as_deref())?;

    let requested = data.limit.unwrap_or(config.default_limit);
    if requested < 0 {
        return Err(DbError::BadRequest("limit must be non-negative".to_string()));
    }
    let limit = if requested > config.max_limit {
        tracing::warn!("limit {} exceeds max {}, capping to max", requested, config.max_limit);
        config.max_limit
    } else {
        requested
    };

    let sort = match &data.sort {
        Some(spec) if !spec.is_empty() => Some(sort_document(spec)?),
        _ => None,
    };

    let projection = data.fields.as_ref().filter(|f| !f.is_empty()).map(|fields| {
        let mut doc = Document::new();
        for field in fields {
            doc.insert(field, 1);
        }
        doc
    });

    // Populate only declared relation fields; unknown targets are dropped,
    // not failed
    let lookups = data
        .populate
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|field| match schema.reference(field) {
            Some(target) => Some(LookupStage { field: field.clone(), from: target.to_string() }),
            None => {
                tracing::debug!("dropping populate target '{}': not a declared relation", field);
                None
            }
        })
        .collect();

    Ok(FindPlan::Query(QueryPlan {
        filter,
        sort,
        skip: data.skip.unwrap_or(0),
        limit,
        projection,
        lookups,
    }))
}

/// Lower a planned query to an aggregation pipeline. Used when `populate`
/// requires `$lookup` stages; plain queries run through `find` directly.
pub fn query_pipeline(plan: &QueryPlan) -> Vec<Document> {
    let mut pipeline = vec![doc! { "$match": plan.filter.clone() }];

    if let Some(sort) = &plan.sort {
        pipeline.push(doc! { "$sort": sort.clone() });
    }
    if plan.skip > 0 {
        pipeline.push(doc! { "$skip": plan.skip as i64 });
    }
    pipeline.push(doc! { "$limit": plan.limit });

    for lookup in &plan.lookups {
        pipeline.push(doc! {
            "$lookup": {
                "from": lookup.from.as_str(),
                "localField": lookup.field.as_str(),
                "foreignField": "_id",
                "as": lookup.field.as_str(),
            }
        });
        pipeline.push(doc! {
            "$unwind": {
                "path": format!("${}", lookup.field),
                "preserveNullAndEmptyArrays": true,
            }
        });
    }

    if let Some(projection) = &plan.projection {
        pipeline.push(doc! { "$project": projection.clone() });
    }

    pipeline
}

/// Plan a create: validate, apply declared defaults for absent fields, and
/// stamp timestamps. Returns the document ready to insert.
pub fn build_create(
    schema: &CollectionSchema,
    data: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<Document, DbError> {
    if data.is_empty() {
        return Err(DbError::BadRequest("create requires a non-empty document".to_string()));
    }

    validate(schema, data)?;

    let mut document = map_to_document(data)?;
    for (name, default) in schema.defaults() {
        if !document.contains_key(name) {
            document.insert(name, json_to_bson(default)?);
        }
    }

    let stamp = bson::DateTime::from_chrono(now);
    document.insert("created_at", stamp);
    document.insert("updated_at", stamp);

    Ok(document)
}

/// Plan a set-style partial update addressed by id (exactly one) or by
/// filters (possibly many).
pub fn build_update(
    schema: &CollectionSchema,
    data: &UpdateData,
    now: DateTime<Utc>,
) -> Result<UpdatePlan, DbError> {
    if data.data.is_empty() {
        return Err(DbError::BadRequest("update requires a non-empty data object".to_string()));
    }

    let target = match &data.id {
        Some(id) => WriteTarget::Id(parse_object_id(id)?),
        None if !data.filters.is_empty() => WriteTarget::Filter(map_to_document(&data.filters)?),
        None => {
            return Err(DbError::BadRequest("update requires an id or filters".to_string()))
        }
    };

    validate(schema, &data.data)?;

    let mut set = map_to_document(&data.data)?;
    set.insert("updated_at", bson::DateTime::from_chrono(now));

    Ok(UpdatePlan { target, update: doc! { "$set": set } })
}

/// Plan a delete addressed by id, by filters with `many`, or by filters
/// matching exactly one document.
pub fn build_delete(data: &DeleteData) -> Result<DeletePlan, DbError> {
    match &data.id {
        Some(id) => Ok(DeletePlan { target: WriteTarget::Id(parse_object_id(id)?), many: false }),
        None if !data.filters.is_empty() => Ok(DeletePlan {
            target: WriteTarget::Filter(map_to_document(&data.filters)?),
            many: data.many,
        }),
        None => Err(DbError::BadRequest("delete requires an id or filters".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::schema::types::FieldSpec;
    use serde_json::json;

    fn post_schema() -> CollectionSchema {
        compile(&[
            FieldSpec::new("title", "String").required(),
            FieldSpec::new("body", "String"),
            FieldSpec::new("views", "Number").with_default(json!(0)),
            FieldSpec::new("author", "ObjectId").with_ref("User"),
        ])
        .unwrap()
    }

    fn find_config() -> FindConfig {
        FindConfig { default_limit: 20, max_limit: 200 }
    }

    fn object(value: serde_json::Value) -> Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unbounded_find_is_rejected() {
        let err = build_find(&post_schema(), &find_config(), &FindData::default()).unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }

    #[test]
    fn limit_clamps_to_hard_cap() {
        let data = FindData {
            search: Some("a".to_string()),
            limit: Some(10_000),
            ..Default::default()
        };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => assert_eq!(plan.limit, 200),
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn limit_defaults_when_absent() {
        let data = FindData { filters: object(json!({"title": "x"})), ..Default::default() };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                assert_eq!(plan.limit, 20);
                assert_eq!(plan.skip, 0);
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn negative_limit_is_rejected() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            limit: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data),
            Err(DbError::BadRequest(_))
        ));
    }

    #[test]
    fn string_filter_values_coerce_for_number_fields() {
        let data = FindData { filters: object(json!({"views": "5"})), ..Default::default() };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                assert_eq!(plan.filter.get("views"), Some(&Bson::Int64(5)));
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn coercion_reaches_operator_objects() {
        let data = FindData {
            filters: object(json!({"views": {"$gte": "10"}})),
            ..Default::default()
        };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                let ops = plan.filter.get_document("views").unwrap();
                assert_eq!(ops.get("$gte"), Some(&Bson::Int64(10)));
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn coercion_leaves_string_fields_alone() {
        let data = FindData { filters: object(json!({"title": "5"})), ..Default::default() };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                assert_eq!(plan.filter.get_str("title").unwrap(), "5");
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn search_ors_across_string_fields_case_insensitively() {
        let data = FindData { search: Some("he(llo".to_string()), ..Default::default() };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                let clauses = plan.filter.get_array("$or").unwrap();
                // `body` and `title` are the declared string fields
                assert_eq!(clauses.len(), 2);
                let first = clauses[0].as_document().unwrap();
                let body = first.get_document("body").unwrap();
                assert_eq!(body.get_str("$regex").unwrap(), "he\\(llo");
                assert_eq!(body.get_str("$options").unwrap(), "i");
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn search_without_string_fields_yields_no_or_clause() {
        let schema = compile(&[FieldSpec::new("views", "Number")]).unwrap();
        let data = FindData { search: Some("x".to_string()), ..Default::default() };
        match build_find(&schema, &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => assert!(!plan.filter.contains_key("$or")),
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn unknown_populate_targets_are_dropped() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            populate: Some(vec!["author".to_string(), "nope".to_string(), "title".to_string()]),
            ..Default::default()
        };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                assert_eq!(
                    plan.lookups,
                    vec![LookupStage { field: "author".to_string(), from: "User".to_string() }]
                );
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn malformed_id_fails_before_planning_a_round_trip() {
        let data = FindData { id: Some("not-24-hex".to_string()), ..Default::default() };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data),
            Err(DbError::InvalidId(_))
        ));
    }

    #[test]
    fn well_formed_id_plans_a_point_read() {
        let data = FindData {
            id: Some("507f1f77bcf86cd799439011".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data).unwrap(),
            FindPlan::ById { .. }
        ));
    }

    #[test]
    fn pipeline_wins_over_everything_else() {
        let data = FindData {
            id: Some("not-even-checked".to_string()),
            pipeline: Some(vec![json!({"$match": {"title": "x"}})]),
            ..Default::default()
        };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Aggregate { pipeline } => assert_eq!(pipeline.len(), 1),
            other => panic!("expected aggregate plan, got {:?}", other),
        }
    }

    #[test]
    fn non_object_pipeline_stage_is_rejected() {
        let data = FindData { pipeline: Some(vec![json!("$match")]), ..Default::default() };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data),
            Err(DbError::BadRequest(_))
        ));
    }

    #[test]
    fn count_only_plans_a_count() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            count_only: true,
            ..Default::default()
        };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data).unwrap(),
            FindPlan::Count { .. }
        ));
    }

    #[test]
    fn sort_accepts_numbers_and_names() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            sort: Some(object(json!({"views": -1, "title": "asc"}))),
            ..Default::default()
        };
        match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => {
                let sort = plan.sort.unwrap();
                assert_eq!(sort.get_i32("views").unwrap(), -1);
                assert_eq!(sort.get_i32("title").unwrap(), 1);
            }
            other => panic!("expected query plan, got {:?}", other),
        }
    }

    #[test]
    fn invalid_sort_direction_is_rejected() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            sort: Some(object(json!({"views": 2}))),
            ..Default::default()
        };
        assert!(matches!(
            build_find(&post_schema(), &find_config(), &data),
            Err(DbError::BadRequest(_))
        ));
    }

    #[test]
    fn populate_lowers_to_lookup_and_unwind_stages() {
        let data = FindData {
            filters: object(json!({"title": "x"})),
            populate: Some(vec!["author".to_string()]),
            ..Default::default()
        };
        let plan = match build_find(&post_schema(), &find_config(), &data).unwrap() {
            FindPlan::Query(plan) => plan,
            other => panic!("expected query plan, got {:?}", other),
        };
        let pipeline = query_pipeline(&plan);
        // $match, $limit, $lookup, $unwind
        assert_eq!(pipeline.len(), 4);
        let lookup = pipeline[2].get_document("$lookup").unwrap();
        assert_eq!(lookup.get_str("from").unwrap(), "User");
        assert_eq!(lookup.get_str("localField").unwrap(), "author");
        let unwind = pipeline[3].get_document("$unwind").unwrap();
        assert_eq!(unwind.get_str("path").unwrap(), "$author");
    }

    #[test]
    fn create_rejects_empty_document() {
        let err = build_create(&post_schema(), &Map::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }

    #[test]
    fn create_applies_defaults_and_timestamps() {
        let doc =
            build_create(&post_schema(), &object(json!({"title": "Hello"})), Utc::now()).unwrap();
        assert_eq!(doc.get_str("title").unwrap(), "Hello");
        assert_eq!(doc.get("views"), Some(&Bson::Int64(0)));
        assert!(doc.get_datetime("created_at").is_ok());
        assert!(doc.get_datetime("updated_at").is_ok());
    }

    #[test]
    fn create_keeps_supplied_value_over_default() {
        let doc = build_create(
            &post_schema(),
            &object(json!({"title": "Hello", "views": 7})),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(doc.get("views"), Some(&Bson::Int64(7)));
    }

    #[test]
    fn create_passes_undeclared_fields_through() {
        let doc = build_create(
            &post_schema(),
            &object(json!({"title": "Hello", "extra": 42})),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(doc.get("extra"), Some(&Bson::Int64(42)));
    }

    #[test]
    fn create_surfaces_validation_failures() {
        let err =
            build_create(&post_schema(), &object(json!({"views": 5})), Utc::now()).unwrap_err();
        match err {
            DbError::ValidationError { fields } => assert_eq!(fields, vec!["title"]),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn update_requires_data_and_a_target() {
        let schema = post_schema();
        let err = build_update(&schema, &UpdateData::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));

        let err = build_update(
            &schema,
            &UpdateData { data: object(json!({"title": "x"})), ..Default::default() },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }

    #[test]
    fn update_wraps_data_in_set_with_updated_at() {
        let plan = build_update(
            &post_schema(),
            &UpdateData {
                filters: object(json!({"title": "Hello"})),
                data: object(json!({"title": "Hi"})),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();

        let set = plan.update.get_document("$set").unwrap();
        assert_eq!(set.get_str("title").unwrap(), "Hi");
        assert!(set.get_datetime("updated_at").is_ok());
        assert!(matches!(plan.target, WriteTarget::Filter(_)));
    }

    #[test]
    fn update_type_mismatch_is_a_validation_error() {
        let err = build_update(
            &post_schema(),
            &UpdateData {
                filters: object(json!({"title": "Hello"})),
                data: object(json!({"title": 123})),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::ValidationError { .. }));
    }

    #[test]
    fn delete_requires_a_target() {
        assert!(matches!(
            build_delete(&DeleteData::default()),
            Err(DbError::BadRequest(_))
        ));
    }

    #[test]
    fn delete_by_malformed_id_fails_before_any_round_trip() {
        let data = DeleteData { id: Some("xyz".to_string()), ..Default::default() };
        assert!(matches!(build_delete(&data), Err(DbError::InvalidId(_))));
    }

    #[test]
    fn delete_by_filters_carries_many_flag() {
        let data = DeleteData {
            filters: object(json!({"status": "x"})),
            many: true,
            ..Default::default()
        };
        let plan = build_delete(&data).unwrap();
        assert!(plan.many);
        assert!(matches!(plan.target, WriteTarget::Filter(_)));
    }
}
