//! Nested subresource route derivation.
//!
//! Runs once at startup, depth-first over each entity's declared
//! subresource props, and must be deterministic: the same configuration
//! yields the same route list, same order, on every run. Traversal
//! follows registration order and the final list is sorted by a stable
//! key, so no map iteration order can leak into the output.

use std::collections::HashSet;

use axum::http::Method;

use crate::groups::Operation;
use crate::metadata::{Cardinality, EntityMeta, EntityRegistry};
use crate::routes::{RouteDescriptor, RouteKind, SubresourceLink};

/// Declaration of one relation prop exposed as a nested route.
#[derive(Debug, Clone)]
pub struct SubresourceSpec {
    /// CRUD operations allowed on this subresource.
    pub operations: Vec<Operation>,
    /// Per-prop max chain depth below this subresource; falls back to the
    /// registry default.
    pub max_depth: Option<u32>,
    /// May this subresource continue another subresource chain?
    pub can_be_nested: bool,
    /// May other subresources be chained after this one?
    pub can_have_nested: bool,
}

impl SubresourceSpec {
    #[must_use]
    pub fn new(operations: &[Operation]) -> Self {
        Self {
            operations: operations.to_vec(),
            max_depth: None,
            can_be_nested: true,
            can_have_nested: true,
        }
    }

    #[must_use]
    pub fn max_depth(mut self, level: u32) -> Self {
        self.max_depth = Some(level);
        self
    }

    #[must_use]
    pub fn can_be_nested(mut self, allowed: bool) -> Self {
        self.can_be_nested = allowed;
        self
    }

    #[must_use]
    pub fn can_have_nested(mut self, allowed: bool) -> Self {
        self.can_have_nested = allowed;
        self
    }
}

struct ChainEntry {
    table: String,
    prop: String,
    cardinality: Cardinality,
    max_depth: u32,
}

/// Derive all nested routes under `root`'s detail route.
#[must_use]
pub fn derive_subresource_routes(
    registry: &EntityRegistry,
    root: &EntityMeta,
) -> Vec<RouteDescriptor> {
    let mut routes = Vec::new();
    let Some(config) = registry.config(&root.name) else {
        return routes;
    };
    let base_path = format!("{}/{{id}}", config.path);
    let mut chain = Vec::new();
    let mut seen_routes = HashSet::new();
    let mut seen_names = HashSet::new();
    walk(
        registry,
        root,
        root,
        &base_path,
        &mut chain,
        &mut routes,
        &mut seen_routes,
        &mut seen_names,
    );
    routes.sort_by(|a, b| {
        (a.path.as_str(), a.method.as_str(), a.name.as_str())
            .cmp(&(b.path.as_str(), b.method.as_str(), b.name.as_str()))
    });
    routes
}

#[allow(clippy::too_many_arguments)]
fn walk(
    registry: &EntityRegistry,
    root: &EntityMeta,
    parent: &EntityMeta,
    parent_path: &str,
    chain: &mut Vec<ChainEntry>,
    routes: &mut Vec<RouteDescriptor>,
    seen_routes: &mut HashSet<(Method, String)>,
    seen_names: &mut HashSet<String>,
) {
    let Some(parent_config) = registry.config(&parent.name) else {
        return;
    };
    for (prop, spec) in &parent_config.subresources {
        let Some(relation) = parent.relation(prop) else {
            continue;
        };
        // A candidate without a registered, route-capable target is skipped.
        let Some(target) = registry.relation_target(relation) else {
            continue;
        };
        let Some(target_config) = registry.config(&target.name) else {
            continue;
        };

        let revisits = target.table_name == root.table_name
            || chain.iter().any(|entry| entry.table == target.table_name);
        if revisits && !target_config.allow_circular_subresources {
            continue;
        }

        // Every ancestor's max depth is offset by its position: a deeper
        // relation's laxer limit never overrides a stricter one upstream.
        let candidate_relative_depth =
            |position: usize| u32::try_from(chain.len() - position).unwrap_or(u32::MAX);
        if chain
            .iter()
            .enumerate()
            .any(|(position, entry)| candidate_relative_depth(position) > entry.max_depth)
        {
            continue;
        }

        if !chain.is_empty() && !spec.can_be_nested {
            continue;
        }

        let path = format!("{parent_path}/{prop}");
        let name_prefix = std::iter::once(root.table_name.as_str())
            .chain(chain.iter().map(|entry| entry.prop.as_str()))
            .chain(std::iter::once(prop.as_str()))
            .collect::<Vec<_>>()
            .join("_");
        let plural_predecessor = chain
            .last()
            .is_some_and(|entry| entry.cardinality.is_to_many());

        let link_chain: Vec<SubresourceLink> = chain
            .iter()
            .map(|entry| SubresourceLink {
                table: entry.table.clone(),
                prop: entry.prop.clone(),
                cardinality: entry.cardinality,
            })
            .chain(std::iter::once(SubresourceLink {
                table: target.table_name.clone(),
                prop: prop.clone(),
                cardinality: relation.cardinality,
            }))
            .collect();

        for operation in &spec.operations {
            // A singular read directly after a plural segment is ambiguous:
            // there is no id to pick the intermediate element with.
            if *operation == Operation::Details && plural_predecessor {
                continue;
            }
            let method = match operation {
                Operation::List | Operation::Details => Method::GET,
                Operation::Create => Method::POST,
                Operation::Update => Method::PUT,
                Operation::Delete => Method::DELETE,
                Operation::Custom(_) => continue,
            };
            let name = format!("{name_prefix}_{operation}");
            if !seen_routes.insert((method.clone(), path.clone())) {
                continue;
            }
            if !seen_names.insert(name.clone()) {
                continue;
            }
            routes.push(RouteDescriptor {
                kind: RouteKind::Subresource,
                method,
                path: path.clone(),
                name,
                operation: operation.clone(),
                entity: target.name.clone(),
                root: root.name.clone(),
                subresource_chain: link_chain.clone(),
            });
        }

        if spec.can_have_nested {
            chain.push(ChainEntry {
                table: target.table_name.clone(),
                prop: prop.clone(),
                cardinality: relation.cardinality,
                max_depth: spec
                    .max_depth
                    .unwrap_or(registry.default_subresource_max_depth),
            });
            walk(
                registry,
                root,
                target,
                &path,
                chain,
                routes,
                seen_routes,
                seen_names,
            );
            chain.pop();
        }
    }
}
