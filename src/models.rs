//! Response envelope shapes and query-parameter partitioning.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;

/// The `@context` block carried by every response.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteContext {
    pub operation: String,
    pub entity: String,
    pub total_items: Option<u64>,
    pub retrieved_items: Option<u64>,
    pub validation_errors: Option<BTreeMap<String, Vec<String>>>,
    pub error: Option<String>,
}

impl RouteContext {
    #[must_use]
    pub fn new(operation: &str, entity: &str) -> Self {
        Self {
            operation: operation.to_string(),
            entity: entity.to_string(),
            ..Self::default()
        }
    }
}

/// Collections: `{"@context": ..., "items": [...]}` with counts inside
/// the context.
#[must_use]
pub fn collection_response(context: &RouteContext, items: Vec<Value>) -> Value {
    json!({ "@context": context, "items": items })
}

/// Single-entity reads/writes spread the entity props at the top level
/// next to `@context`.
#[must_use]
pub fn item_response(context: &RouteContext, item: Value) -> Value {
    let mut body = Map::new();
    body.insert("@context".to_string(), json!(context));
    if let Value::Object(props) = item {
        for (key, value) in props {
            body.insert(key, value);
        }
    }
    Value::Object(body)
}

/// Deletions: `{"@context": ..., "deleted": id|null}`.
#[must_use]
pub fn deleted_response(context: &RouteContext, id: Option<Value>) -> Value {
    json!({ "@context": context, "deleted": id.unwrap_or(Value::Null) })
}

/// Failures carry their detail inside `@context` only.
#[must_use]
pub fn error_response(context: &RouteContext) -> Value {
    json!({ "@context": context })
}

/// Query parameters split into the reserved pagination/ordering keys and
/// the remainder, which is fed to the filter engine untouched.
#[derive(Debug, Default)]
pub struct ListParams {
    pub take: Option<u64>,
    pub skip: Option<u64>,
    pub order_by: Option<String>,
    pub filters: Vec<(String, String)>,
}

#[must_use]
pub fn partition_query(pairs: Vec<(String, String)>) -> ListParams {
    let mut params = ListParams::default();
    for (key, value) in pairs {
        match key.as_str() {
            "take" => params.take = value.parse().ok(),
            "skip" => params.skip = value.parse().ok(),
            "orderBy" => params.order_by = Some(value),
            _ => params.filters.push((key, value)),
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_response_spreads_props_at_top_level() {
        let context = RouteContext::new("details", "user");
        let body = item_response(&context, json!({"id": 1, "name": "Alex"}));
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["name"], json!("Alex"));
        assert_eq!(body["@context"]["operation"], json!("details"));
        assert_eq!(body["@context"]["entity"], json!("user"));
    }

    #[test]
    fn context_omits_absent_fields() {
        let context = RouteContext::new("list", "user");
        let rendered = serde_json::to_value(&context).unwrap();
        assert!(rendered.get("totalItems").is_none());
        assert!(rendered.get("error").is_none());
    }

    #[test]
    fn reserved_keys_split_from_filters() {
        let params = partition_query(vec![
            ("take".to_string(), "20".to_string()),
            ("skip".to_string(), "40".to_string()),
            ("orderBy".to_string(), "name:desc".to_string()),
            ("name;contains".to_string(), "al".to_string()),
        ]);
        assert_eq!(params.take, Some(20));
        assert_eq!(params.skip, Some(40));
        assert_eq!(params.order_by.as_deref(), Some("name:desc"));
        assert_eq!(params.filters.len(), 1);
    }
}
