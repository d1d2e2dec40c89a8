//! Route table derivation and router assembly.
//!
//! The route table is plain data, derived once at startup and then turned
//! into an axum [`Router`]. Keeping the descriptor list separate from the
//! router makes the derivation testable without serving requests and
//! keeps route output deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::Method;
use axum::routing::{self, MethodRouter};
use axum::{Json, Router};
use serde_json::Value;

use crate::groups::Operation;
use crate::metadata::{Cardinality, EntityRegistry};
use crate::operations::{self, EntityPersistence, RequestContext};
use crate::subresources::derive_subresource_routes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// CRUD on the entity's own path.
    Entity,
    /// Nested under an owning entity's detail route.
    Subresource,
    /// Mapping introspection (`GET <path>/<operation>/mapping`).
    Mapping,
}

/// One link of a subresource chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubresourceLink {
    pub table: String,
    pub prop: String,
    pub cardinality: Cardinality,
}

/// One derived route. The full table is handed to the router assembly and
/// is also useful on its own for docs and route listings.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub kind: RouteKind,
    pub method: Method,
    pub path: String,
    /// Unique route name, `<table>_<chain props>_<operation>`.
    pub name: String,
    pub operation: Operation,
    /// Entity the operation acts on; for subresources, the chain target.
    pub entity: String,
    /// Entity owning the path root; equals `entity` except on subresources.
    pub root: String,
    pub subresource_chain: Vec<SubresourceLink>,
}

/// CRUD and mapping-introspection routes for one entity's own path.
/// Custom operations participate in groups and mappings but get no route.
#[must_use]
pub fn derive_entity_routes(registry: &EntityRegistry, entity_name: &str) -> Vec<RouteDescriptor> {
    let mut routes = Vec::new();
    let (Some(entity), Some(config)) = (registry.entity(entity_name), registry.config(entity_name))
    else {
        return routes;
    };

    for operation in &config.operations {
        let (method, path) = match operation {
            Operation::List => (Method::GET, config.path.clone()),
            Operation::Create => (Method::POST, config.path.clone()),
            Operation::Details => (Method::GET, format!("{}/{{id}}", config.path)),
            Operation::Update => (Method::PUT, format!("{}/{{id}}", config.path)),
            Operation::Delete => (Method::DELETE, format!("{}/{{id}}", config.path)),
            Operation::Custom(_) => continue,
        };
        routes.push(RouteDescriptor {
            kind: RouteKind::Entity,
            method,
            path,
            name: format!("{}_{operation}", entity.table_name),
            operation: operation.clone(),
            entity: entity.name.clone(),
            root: entity.name.clone(),
            subresource_chain: Vec::new(),
        });
        routes.push(RouteDescriptor {
            kind: RouteKind::Mapping,
            method: Method::GET,
            path: format!("{}/{operation}/mapping", config.path),
            name: format!("{}_{operation}_mapping", entity.table_name),
            operation: operation.clone(),
            entity: entity.name.clone(),
            root: entity.name.clone(),
            subresource_chain: Vec::new(),
        });
    }
    routes
}

/// The complete route table, in registration order per entity: own routes
/// first, then the entity's subresource routes.
#[must_use]
pub fn build_route_table(registry: &EntityRegistry) -> Vec<RouteDescriptor> {
    let mut table = Vec::new();
    for name in registry.entity_names() {
        table.extend(derive_entity_routes(registry, name));
        if let Some(entity) = registry.entity(name) {
            table.extend(derive_subresource_routes(registry, entity));
        }
    }
    table
}

/// Assemble the axum router for every derived route.
#[must_use]
pub fn build_router(
    registry: Arc<EntityRegistry>,
    persistence: Arc<dyn EntityPersistence>,
) -> Router {
    let mut paths: BTreeMap<String, MethodRouter> = BTreeMap::new();
    for descriptor in build_route_table(&registry) {
        tracing::info!(
            name = %descriptor.name,
            method = %descriptor.method,
            path = %descriptor.path,
            "route registered"
        );
        let ctx = Arc::new(RequestContext {
            registry: registry.clone(),
            persistence: persistence.clone(),
            descriptor: descriptor.clone(),
        });
        let handler = route_handler(ctx, &descriptor);
        let merged = paths
            .remove(&descriptor.path)
            .unwrap_or_default()
            .merge(handler);
        paths.insert(descriptor.path, merged);
    }

    let mut router = Router::new();
    for (path, methods) in paths {
        router = router.route(&path, methods);
    }
    router
}

fn route_handler(ctx: Arc<RequestContext>, descriptor: &RouteDescriptor) -> MethodRouter {
    match (descriptor.kind, &descriptor.operation) {
        (RouteKind::Mapping, _) => {
            routing::get(move |Query(pairs): Query<Vec<(String, String)>>| {
                operations::handle_mapping(ctx.clone(), pairs)
            })
        }
        (RouteKind::Entity, Operation::List) => {
            routing::get(move |Query(pairs): Query<Vec<(String, String)>>| {
                operations::handle_list(ctx.clone(), pairs)
            })
        }
        (RouteKind::Entity, Operation::Details) => routing::get(move |Path(id): Path<String>| {
            operations::handle_details(ctx.clone(), id)
        }),
        (RouteKind::Entity, Operation::Create) => routing::post(move |Json(payload): Json<Value>| {
            operations::handle_create(ctx.clone(), payload)
        }),
        (RouteKind::Entity, Operation::Update) => {
            routing::put(move |Path(id): Path<String>, Json(payload): Json<Value>| {
                operations::handle_update(ctx.clone(), id, payload)
            })
        }
        (RouteKind::Entity, Operation::Delete) => routing::delete(move |Path(id): Path<String>| {
            operations::handle_delete(ctx.clone(), id)
        }),
        (RouteKind::Subresource, Operation::List) => routing::get(
            move |Path(id): Path<String>, Query(pairs): Query<Vec<(String, String)>>| {
                operations::handle_subresource_list(ctx.clone(), id, pairs)
            },
        ),
        (RouteKind::Subresource, Operation::Details) => {
            routing::get(move |Path(id): Path<String>| {
                operations::handle_subresource_details(ctx.clone(), id)
            })
        }
        (RouteKind::Subresource, Operation::Create) => {
            routing::post(move |Path(id): Path<String>, Json(payload): Json<Value>| {
                operations::handle_subresource_create(ctx.clone(), id, payload)
            })
        }
        (RouteKind::Subresource, Operation::Update) => {
            routing::put(move |Path(id): Path<String>, Json(payload): Json<Value>| {
                operations::handle_subresource_update(ctx.clone(), id, payload)
            })
        }
        (RouteKind::Subresource, Operation::Delete) => {
            routing::delete(move |Path(id): Path<String>| {
                operations::handle_subresource_delete(ctx.clone(), id)
            })
        }
        // Derivation never emits Custom operations.
        (_, Operation::Custom(_)) => MethodRouter::new(),
    }
}
