//! Mapping construction: which props (including nested relation props)
//! are selected for a given root entity and operation.
//!
//! A mapping depends only on static metadata, so it is built once per
//! `(root entity, operation)` pair and cached indefinitely. Depth is
//! counted in table-name occurrences along the traversal path, not in
//! structural depth, so diamond-shaped relation graphs stay bounded.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::ApiError;
use crate::groups::Operation;
use crate::metadata::{EntityMeta, EntityRegistry};

/// One node of the mapping tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingNode {
    /// Column-backed scalar props to select at this depth.
    pub select_props: Vec<String>,
    /// Relation props exposed at this depth; each has an entry in
    /// `children`.
    pub relation_props: Vec<String>,
    /// `select_props` ∪ `relation_props`, in that order.
    pub exposed_props: Vec<String>,
    /// Method-backed props resolved during serialization.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub computed_props: Vec<String>,
    /// Set when recursion stopped here because of the depth policy. The
    /// relation still exists in the parent's `relation_props`; only the id
    /// is exposed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub circular: bool,
    pub children: BTreeMap<String, MappingNode>,
}

impl MappingNode {
    /// Whether the only thing exposed at this depth is the identifier;
    /// such nodes serialize as the raw id and pretty-print as `@id`.
    #[must_use]
    pub fn only_exposes_id(&self, id_prop: &str) -> bool {
        self.relation_props.is_empty()
            && self.computed_props.is_empty()
            && self.select_props.len() == 1
            && self.select_props[0] == id_prop
    }
}

/// Cache of built mappings, keyed by `(entity, operation)`. Population is
/// idempotent: a concurrent duplicate build is discarded, never a
/// partially-built entry observed.
#[derive(Debug, Default)]
pub struct MappingCache {
    cache: RwLock<HashMap<(String, Operation), Arc<MappingNode>>>,
}

impl EntityRegistry {
    /// The mapping for `(entity, operation)`, building and caching it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when the entity is not registered.
    pub fn mapping(
        &self,
        entity_name: &str,
        operation: &Operation,
    ) -> Result<Arc<MappingNode>, ApiError> {
        let key = (entity_name.to_string(), operation.clone());
        if let Some(cached) = self
            .mappings
            .cache
            .read()
            .expect("mapping cache poisoned")
            .get(&key)
        {
            return Ok(cached.clone());
        }

        let entity = self.require_entity(entity_name)?;
        let mut table_path = vec![entity.table_name.clone()];
        let built = Arc::new(build_node(
            self,
            entity,
            &entity.table_name,
            operation,
            &mut table_path,
        ));
        tracing::debug!(entity = entity_name, operation = %operation, "mapping built");

        let mut cache = self.mappings.cache.write().expect("mapping cache poisoned");
        Ok(cache.entry(key).or_insert_with(|| built.clone()).clone())
    }
}

fn build_node(
    registry: &EntityRegistry,
    entity: &EntityMeta,
    root_table: &str,
    operation: &Operation,
    table_path: &mut Vec<String>,
) -> MappingNode {
    let exposed = registry
        .groups
        .resolve(registry, entity, root_table, operation);

    let mut node = MappingNode {
        select_props: exposed.select_props.clone(),
        relation_props: exposed.relation_props.clone(),
        exposed_props: exposed
            .select_props
            .iter()
            .chain(exposed.relation_props.iter())
            .cloned()
            .collect(),
        computed_props: exposed.computed_props.clone(),
        circular: false,
        children: BTreeMap::new(),
    };

    for prop in &exposed.relation_props {
        let Some(relation) = entity.relation(prop) else {
            continue;
        };
        let Some(target) = registry.relation_target(relation) else {
            continue;
        };

        let occurrences = table_path
            .iter()
            .filter(|table| table.as_str() == target.table_name)
            .count();
        let child = if occurrences > 1 && depth_limit_reached(registry, entity, prop, target, occurrences)
        {
            id_only_node(target)
        } else {
            table_path.push(target.table_name.clone());
            let child = build_node(registry, target, root_table, operation, table_path);
            table_path.pop();
            child
        };
        node.children.insert(prop.clone(), child);
    }

    node
}

/// The circularity policy of §4.2, with the exact tie-break order:
/// relation-prop override, then the revisited class's own policy, then the
/// registry default.
fn depth_limit_reached(
    registry: &EntityRegistry,
    owner: &EntityMeta,
    prop: &str,
    target: &EntityMeta,
    occurrences: usize,
) -> bool {
    let limit = registry
        .config(&owner.name)
        .and_then(|config| config.prop_max_depths.get(prop).copied())
        .or_else(|| {
            registry.config(&target.name).and_then(|config| {
                config
                    .depth
                    .map(|policy| policy.level.unwrap_or(registry.default_max_depth))
            })
        })
        .unwrap_or(registry.default_max_depth);
    u32::try_from(occurrences).unwrap_or(u32::MAX) >= limit
}

/// Normal termination of recursion: the relation stays visible, exposing
/// only the identifier.
fn id_only_node(target: &EntityMeta) -> MappingNode {
    MappingNode {
        select_props: vec![target.id_prop.clone()],
        relation_props: Vec::new(),
        exposed_props: vec![target.id_prop.clone()],
        computed_props: Vec::new(),
        circular: true,
        children: BTreeMap::new(),
    }
}

/// Human-readable projection of a mapping for the introspection endpoint:
/// scalars map to their type name, relations to a nested object or to the
/// `"@id"` / `"@id[]"` sentinel when only the identifier is exposed.
#[must_use]
pub fn pretty_mapping(registry: &EntityRegistry, entity: &EntityMeta, node: &MappingNode) -> Value {
    let mut out = Map::new();
    for prop in &node.select_props {
        let type_name = entity
            .column(prop)
            .map_or("Unknown", |column| column.kind.type_name());
        out.insert(prop.clone(), json!(type_name));
    }
    for prop in &node.computed_props {
        out.insert(prop.clone(), json!("Computed"));
    }
    for prop in &node.relation_props {
        let Some(relation) = entity.relation(prop) else {
            continue;
        };
        let Some(target) = registry.relation_target(relation) else {
            continue;
        };
        let Some(child) = node.children.get(prop) else {
            continue;
        };
        let value = if child.only_exposes_id(&target.id_prop) {
            if relation.cardinality.is_to_many() {
                json!("@id[]")
            } else {
                json!("@id")
            }
        } else {
            pretty_mapping(registry, target, child)
        };
        out.insert(prop.clone(), value);
    }
    Value::Object(out)
}
