//! Mapping-driven cleaning of persistence rows.
//!
//! The mapping tree, not the data's shape, drives traversal: props absent
//! from the mapping are stripped, relation children recurse through their
//! mapping nodes, and relations whose mapping exposes only the id
//! collapse to the raw id value (or id array for to-many relations).

use serde_json::{Map, Value};

use crate::mapping::MappingNode;
use crate::metadata::{EntityMeta, EntityRegistry};

/// Clean one row against the mapping for its entity. Non-object input
/// (already-flattened ids, nulls) passes through untouched.
#[must_use]
pub fn clean_item(
    registry: &EntityRegistry,
    entity: &EntityMeta,
    node: &MappingNode,
    raw: &Value,
) -> Value {
    let Value::Object(source) = raw else {
        return raw.clone();
    };

    let mut out = Map::new();
    for prop in &node.select_props {
        if let Some(value) = source.get(prop) {
            out.insert(prop.clone(), value.clone());
        }
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
        let Some(value) = source.get(prop) else {
            continue;
        };
        let cleaned = if child.only_exposes_id(&target.id_prop) {
            flatten_to_id(value, &target.id_prop)
        } else {
            match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| clean_item(registry, target, child, item))
                        .collect(),
                ),
                Value::Object(_) => clean_item(registry, target, child, value),
                other => other.clone(),
            }
        };
        out.insert(prop.clone(), cleaned);
    }

    for name in &node.computed_props {
        if let Some(computed) = registry.computed_prop(entity, name) {
            out.insert(name.clone(), (computed.resolve)(raw));
        }
    }

    Value::Object(out)
}

fn flatten_to_id(value: &Value, id_prop: &str) -> Value {
    match value {
        Value::Object(object) => object.get(id_prop).cloned().unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| flatten_to_id(item, id_prop))
                .collect(),
        ),
        // Already an id scalar (or null).
        other => other.clone(),
    }
}
