//! End-to-end requests through the assembled router, backed by an
//! in-memory persistence stub.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use entity_routes::{
    build_router, ApiError, EntityPersistence, ItemQuery, ListPage, ListQuery, Operation,
    WriteQuery,
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

fn user_row(id: i64) -> Value {
    json!({
        "id": id,
        "name": "Alex",
        "email": "alex@example.com",
        "age": 30,
        "isAdmin": true,
        "birthDate": "1996-01-02",
        "passwordHash": "not for clients",
        "role": {"id": 5, "identifier": "admin", "internalNote": "hidden"},
    })
}

#[derive(Debug, Clone, PartialEq)]
struct RecordedList {
    take: u64,
    skip: u64,
    parent: Option<(String, String, usize)>,
}

#[derive(Default)]
struct StubPersistence {
    last_list: Mutex<Option<RecordedList>>,
}

#[async_trait]
impl EntityPersistence for StubPersistence {
    async fn fetch_list(&self, query: &ListQuery) -> Result<ListPage, ApiError> {
        *self.last_list.lock().unwrap() = Some(RecordedList {
            take: query.take,
            skip: query.skip,
            parent: query
                .parent
                .as_ref()
                .map(|parent| (parent.entity.clone(), parent.id.clone(), parent.chain.len())),
        });
        let items = match query.entity.as_str() {
            "user" => vec![user_row(1), user_row(2)],
            "article" => vec![json!({"id": 10, "title": "Hello", "author": user_row(1)})],
            _ => Vec::new(),
        };
        Ok(ListPage { items, total: 7 })
    }

    async fn fetch_one(&self, query: &ItemQuery) -> Result<Option<Value>, ApiError> {
        if query.entity == "user" && query.id.as_deref() == Some("1") {
            return Ok(Some(user_row(1)));
        }
        Ok(None)
    }

    async fn insert(&self, _query: &WriteQuery, payload: Value) -> Result<Value, ApiError> {
        let mut created = payload;
        created["id"] = json!(99);
        Ok(created)
    }

    async fn update(
        &self,
        query: &WriteQuery,
        payload: Value,
    ) -> Result<Option<Value>, ApiError> {
        if query.id.as_deref() != Some("1") {
            return Ok(None);
        }
        let mut row = user_row(1);
        if let (Value::Object(target), Value::Object(changes)) = (&mut row, payload) {
            for (key, value) in changes {
                target.insert(key, value);
            }
        }
        Ok(Some(row))
    }

    async fn delete(&self, query: &WriteQuery) -> Result<Option<Value>, ApiError> {
        if query.id.as_deref() == Some("1") {
            Ok(Some(json!(1)))
        } else {
            Ok(None)
        }
    }

    async fn validate(
        &self,
        entity: &str,
        operation: &Operation,
        payload: &Value,
    ) -> Result<(), ApiError> {
        if entity == "user" && *operation == Operation::Create && payload.get("name").is_none() {
            let mut errors = BTreeMap::new();
            errors.insert(
                "user.name".to_string(),
                vec!["name must not be empty".to_string()],
            );
            return Err(ApiError::Validation { errors });
        }
        Ok(())
    }
}

fn app() -> (Router, Arc<StubPersistence>) {
    common::init_tracing();
    let stub = Arc::new(StubPersistence::default());
    (build_router(common::registry(), stub.clone()), stub)
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_body(method: &str, uri: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn list_wraps_cleaned_items_in_the_envelope() {
    let (app, _) = app();
    let response = app.oneshot(get("/user")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["operation"], json!("list"));
    assert_eq!(body["@context"]["entity"], json!("user"));
    assert_eq!(body["@context"]["totalItems"], json!(7));
    assert_eq!(body["@context"]["retrievedItems"], json!(2));

    let item = &body["items"][0];
    assert_eq!(item["name"], json!("Alex"));
    // email is details-only and passwordHash is never exposed.
    assert!(item.get("email").is_none());
    assert!(item.get("passwordHash").is_none());
    assert_eq!(item["role"], json!({"id": 5, "identifier": "admin"}));
}

#[tokio::test]
async fn take_and_skip_are_clamped_and_forwarded() {
    let (app, stub) = app();
    app.clone().oneshot(get("/user?take=9999")).await.unwrap();
    let recorded = stub.last_list.lock().unwrap().clone().unwrap();
    assert_eq!(recorded.take, 500);
    assert_eq!(recorded.skip, 0);

    app.oneshot(get("/user?take=5&skip=10")).await.unwrap();
    let recorded = stub.last_list.lock().unwrap().clone().unwrap();
    assert_eq!(recorded.take, 5);
    assert_eq!(recorded.skip, 10);
}

#[tokio::test]
async fn details_spreads_props_next_to_the_context() {
    let (app, _) = app();
    let response = app.oneshot(get("/user/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["operation"], json!("details"));
    assert_eq!(body["name"], json!("Alex"));
    assert_eq!(body["email"], json!("alex@example.com"));
    assert!(body.get("passwordHash").is_none());
}

#[tokio::test]
async fn missing_entity_is_a_404_envelope() {
    let (app, _) = app();
    let response = app.oneshot(get("/user/9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["error"], json!("user with id 9 not found"));
}

#[tokio::test]
async fn create_returns_201_with_the_cleaned_entity() {
    let (app, _) = app();
    let response = app
        .oneshot(with_body(
            "POST",
            "/user",
            &json!({"name": "Zoe", "email": "zoe@example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["operation"], json!("create"));
    assert_eq!(body["id"], json!(99));
    assert_eq!(body["name"], json!("Zoe"));
}

#[tokio::test]
async fn validation_failures_are_namespaced_in_the_envelope() {
    let (app, _) = app();
    let response = app
        .oneshot(with_body("POST", "/user", &json!({"email": "x@y"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(
        body["@context"]["validationErrors"]["user.name"][0],
        json!("name must not be empty")
    );
    assert!(body.get("items").is_none());
}

#[tokio::test]
async fn update_hits_and_misses() {
    let (app, _) = app();
    let response = app
        .clone()
        .oneshot(with_body("PUT", "/user/1", &json!({"name": "Renamed"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], json!("Renamed"));

    let response = app
        .oneshot(with_body("PUT", "/user/9", &json!({"name": "Renamed"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_reports_the_deleted_id() {
    let (app, _) = app();
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/user/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["operation"], json!("delete"));
    assert_eq!(body["deleted"], json!(1));
}

#[tokio::test]
async fn subresource_list_scopes_to_the_parent() {
    let (app, stub) = app();
    let response = app.oneshot(get("/user/1/articles")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["@context"]["entity"], json!("article"));
    assert_eq!(body["items"][0]["title"], json!("Hello"));

    let recorded = stub.last_list.lock().unwrap().clone().unwrap();
    assert_eq!(recorded.parent, Some(("user".to_string(), "1".to_string(), 1)));
}

#[tokio::test]
async fn mapping_endpoint_serves_raw_and_pretty_projections() {
    let (app, _) = app();
    let response = app.clone().oneshot(get("/user/list/mapping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["context"]["operation"], json!("list.mapping"));
    assert_eq!(body["context"]["entity"], json!("user"));
    assert!(body["routeMapping"]["selectProps"]
        .as_array()
        .unwrap()
        .contains(&json!("name")));

    let response = app
        .oneshot(get("/user/list/mapping?pretty=true"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["routeMapping"]["name"], json!("String"));
    assert_eq!(body["routeMapping"]["role"]["identifier"], json!("String"));
}

#[tokio::test]
async fn unknown_query_keys_never_fail_a_request() {
    let (app, _) = app();
    let response = app
        .oneshot(get("/user?bogus=1&name=Alex&notacolumn=zzz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
