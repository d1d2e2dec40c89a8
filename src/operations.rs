//! Request orchestration: the pipeline between the HTTP router and the
//! persistence collaborator.
//!
//! Every handler follows the same shape: resolve the entity and its
//! mapping, turn the query string into joins/conditions, call the
//! persistence trait, clean the rows against the mapping, and wrap the
//! result in the response envelope. Persistence is an external
//! collaborator behind [`EntityPersistence`]; nothing here talks to a
//! database directly.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::filtering::{build_query_filter, QueryFilter};
use crate::groups::Operation;
use crate::mapping::{pretty_mapping, MappingNode};
use crate::metadata::EntityRegistry;
use crate::models::{
    collection_response, deleted_response, error_response, item_response, partition_query,
    RouteContext,
};
use crate::routes::{RouteDescriptor, SubresourceLink};
use crate::serialize::clean_item;

/// Scope of a nested request: the root entity whose id anchors the chain,
/// plus the chain itself.
#[derive(Debug, Clone)]
pub struct ParentRef {
    /// Registry name of the entity owning the path root.
    pub entity: String,
    /// Raw id path segment of the root entity.
    pub id: String,
    pub chain: Vec<SubresourceLink>,
}

/// Everything the persistence layer needs to produce a page of rows.
#[derive(Debug)]
pub struct ListQuery {
    pub entity: String,
    pub mapping: Arc<MappingNode>,
    pub filter: QueryFilter,
    pub take: u64,
    pub skip: u64,
    pub parent: Option<ParentRef>,
}

/// A single-row read. `id` is absent when the row is reached purely
/// through a singular subresource chain.
#[derive(Debug)]
pub struct ItemQuery {
    pub entity: String,
    pub mapping: Arc<MappingNode>,
    pub id: Option<String>,
    pub parent: Option<ParentRef>,
}

/// Target of an insert, update or delete.
#[derive(Debug)]
pub struct WriteQuery {
    pub entity: String,
    pub id: Option<String>,
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Default)]
pub struct ListPage {
    pub items: Vec<Value>,
    /// Count before pagination.
    pub total: u64,
}

/// The persistence collaborator. Implementations receive the mapping and
/// the filter output as data and are responsible for turning them into
/// actual queries (`JoinSpec`s into joins, the condition into a WHERE).
#[async_trait]
pub trait EntityPersistence: Send + Sync {
    async fn fetch_list(&self, query: &ListQuery) -> Result<ListPage, ApiError>;

    /// `Ok(None)` means the lookup missed; the orchestrator turns it into
    /// a 404, never into a null body.
    async fn fetch_one(&self, query: &ItemQuery) -> Result<Option<Value>, ApiError>;

    async fn insert(&self, query: &WriteQuery, payload: Value) -> Result<Value, ApiError>;

    async fn update(&self, query: &WriteQuery, payload: Value)
        -> Result<Option<Value>, ApiError>;

    /// Returns the deleted id, or `None` when nothing matched.
    async fn delete(&self, query: &WriteQuery) -> Result<Option<Value>, ApiError>;

    /// Field-level payload validation before create/update. Errors should
    /// be keyed `<table>.<prop>` so the envelope groups them per entity.
    async fn validate(
        &self,
        _entity: &str,
        _operation: &Operation,
        _payload: &Value,
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Shared state captured by every route closure.
pub struct RequestContext {
    pub registry: Arc<EntityRegistry>,
    pub persistence: Arc<dyn EntityPersistence>,
    pub descriptor: RouteDescriptor,
}

type Reply = (StatusCode, Json<Value>);

pub async fn handle_list(ctx: Arc<RequestContext>, pairs: Vec<(String, String)>) -> Reply {
    match list(&ctx, pairs, None).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_details(ctx: Arc<RequestContext>, id: String) -> Reply {
    match details(&ctx, Some(id), None).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_create(ctx: Arc<RequestContext>, payload: Value) -> Reply {
    match create(&ctx, payload, None).await {
        Ok(body) => (StatusCode::CREATED, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_update(ctx: Arc<RequestContext>, id: String, payload: Value) -> Reply {
    match update(&ctx, Some(id), payload, None).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_delete(ctx: Arc<RequestContext>, id: String) -> Reply {
    match delete(&ctx, Some(id), None).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_subresource_list(
    ctx: Arc<RequestContext>,
    root_id: String,
    pairs: Vec<(String, String)>,
) -> Reply {
    let parent = parent_ref(&ctx, root_id);
    match list(&ctx, pairs, Some(parent)).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_subresource_details(ctx: Arc<RequestContext>, root_id: String) -> Reply {
    let parent = parent_ref(&ctx, root_id);
    match details(&ctx, None, Some(parent)).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_subresource_create(
    ctx: Arc<RequestContext>,
    root_id: String,
    payload: Value,
) -> Reply {
    let parent = parent_ref(&ctx, root_id);
    match create(&ctx, payload, Some(parent)).await {
        Ok(body) => (StatusCode::CREATED, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_subresource_update(
    ctx: Arc<RequestContext>,
    root_id: String,
    payload: Value,
) -> Reply {
    let parent = parent_ref(&ctx, root_id);
    match update(&ctx, None, payload, Some(parent)).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_subresource_delete(ctx: Arc<RequestContext>, root_id: String) -> Reply {
    let parent = parent_ref(&ctx, root_id);
    match delete(&ctx, None, Some(parent)).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn handle_mapping(ctx: Arc<RequestContext>, pairs: Vec<(String, String)>) -> Reply {
    match mapping_introspection(&ctx, &pairs) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => failure(&ctx, &err),
    }
}

fn parent_ref(ctx: &RequestContext, root_id: String) -> ParentRef {
    ParentRef {
        entity: ctx.descriptor.root.clone(),
        id: root_id,
        chain: ctx.descriptor.subresource_chain.clone(),
    }
}

async fn list(
    ctx: &RequestContext,
    pairs: Vec<(String, String)>,
    parent: Option<ParentRef>,
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;
    let config = registry
        .config(&entity.name)
        .ok_or_else(|| ApiError::config(format!("no route config for '{}'", entity.name)))?;

    let params = partition_query(pairs);
    let mapping = registry.mapping(&entity.name, &Operation::List)?;
    let filter = build_query_filter(registry, entity, &params.filters, params.order_by.as_deref());

    let take = params
        .take
        .unwrap_or(config.pagination.default_take)
        .min(config.pagination.max_take);
    let skip = params.skip.unwrap_or(0);

    let page = ctx
        .persistence
        .fetch_list(&ListQuery {
            entity: entity.name.clone(),
            mapping: mapping.clone(),
            filter,
            take,
            skip,
            parent,
        })
        .await?;

    let items: Vec<Value> = page
        .items
        .iter()
        .map(|row| clean_item(registry, entity, &mapping, row))
        .collect();

    let mut context = RouteContext::new(Operation::List.name(), &entity.name);
    context.total_items = Some(page.total);
    context.retrieved_items = Some(u64::try_from(items.len()).unwrap_or(u64::MAX));
    Ok(collection_response(&context, items))
}

async fn details(
    ctx: &RequestContext,
    id: Option<String>,
    parent: Option<ParentRef>,
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;
    let mapping = registry.mapping(&entity.name, &Operation::Details)?;

    let found = ctx
        .persistence
        .fetch_one(&ItemQuery {
            entity: entity.name.clone(),
            mapping: mapping.clone(),
            id: id.clone(),
            parent,
        })
        .await?;
    let raw = found.ok_or_else(|| ApiError::not_found(entity.name.clone(), id))?;

    let item = clean_item(registry, entity, &mapping, &raw);
    let context = RouteContext::new(Operation::Details.name(), &entity.name);
    Ok(item_response(&context, item))
}

async fn create(
    ctx: &RequestContext,
    payload: Value,
    parent: Option<ParentRef>,
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;

    ctx.persistence
        .validate(&entity.name, &Operation::Create, &payload)
        .await?;
    let created = ctx
        .persistence
        .insert(
            &WriteQuery {
                entity: entity.name.clone(),
                id: None,
                parent,
            },
            payload,
        )
        .await?;

    // Responses to writes are read back through the details mapping, so a
    // create never leaks more than a subsequent GET would.
    let mapping = registry.mapping(&entity.name, &Operation::Details)?;
    let item = clean_item(registry, entity, &mapping, &created);
    let context = RouteContext::new(Operation::Create.name(), &entity.name);
    Ok(item_response(&context, item))
}

async fn update(
    ctx: &RequestContext,
    id: Option<String>,
    payload: Value,
    parent: Option<ParentRef>,
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;

    ctx.persistence
        .validate(&entity.name, &Operation::Update, &payload)
        .await?;
    let updated = ctx
        .persistence
        .update(
            &WriteQuery {
                entity: entity.name.clone(),
                id: id.clone(),
                parent,
            },
            payload,
        )
        .await?;
    let raw = updated.ok_or_else(|| ApiError::not_found(entity.name.clone(), id))?;

    let mapping = registry.mapping(&entity.name, &Operation::Details)?;
    let item = clean_item(registry, entity, &mapping, &raw);
    let context = RouteContext::new(Operation::Update.name(), &entity.name);
    Ok(item_response(&context, item))
}

async fn delete(
    ctx: &RequestContext,
    id: Option<String>,
    parent: Option<ParentRef>,
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;

    let deleted = ctx
        .persistence
        .delete(&WriteQuery {
            entity: entity.name.clone(),
            id: id.clone(),
            parent,
        })
        .await?;
    let deleted_id = deleted.ok_or_else(|| ApiError::not_found(entity.name.clone(), id))?;

    let context = RouteContext::new(Operation::Delete.name(), &entity.name);
    Ok(deleted_response(&context, Some(deleted_id)))
}

fn mapping_introspection(
    ctx: &RequestContext,
    pairs: &[(String, String)],
) -> Result<Value, ApiError> {
    let registry = &ctx.registry;
    let entity = registry.require_entity(&ctx.descriptor.entity)?;
    let operation = &ctx.descriptor.operation;
    let mapping = registry.mapping(&entity.name, operation)?;

    let pretty = pairs
        .iter()
        .any(|(key, value)| key == "pretty" && matches!(value.as_str(), "true" | "1" | ""));
    let route_mapping = if pretty {
        pretty_mapping(registry, entity, &mapping)
    } else {
        serde_json::to_value(mapping.as_ref()).map_err(ApiError::internal)?
    };

    Ok(json!({
        "context": {
            "operation": format!("{operation}.mapping"),
            "entity": entity.name,
        },
        "routeMapping": route_mapping,
    }))
}

/// Single error boundary for every handler: log server-side, expose only
/// what the registry's mode allows.
fn failure(ctx: &RequestContext, err: &ApiError) -> Reply {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(route = %ctx.descriptor.name, error = %err, "request failed");
    } else {
        tracing::debug!(route = %ctx.descriptor.name, error = %err, "request rejected");
    }

    let mut context = RouteContext::new(ctx.descriptor.operation.name(), &ctx.descriptor.entity);
    context.error = Some(err.client_message(ctx.registry.expose_internal_errors));
    context.validation_errors = err.validation_errors().cloned();
    (status, Json(error_response(&context)))
}

