//! Mapping construction: exposure groups, root-context scoping, computed
//! props and the max-depth/circularity policy with its override order.

use std::sync::Arc;

use entity_routes::{
    clean_item, pretty_mapping, Cardinality, ColumnKind, EntityBuilder, EntityRegistry,
    MappingNode, Operation,
};
use serde_json::json;

mod common;

/// Number of `articles -> author` expansions until the builder stops,
/// counting the terminal id-only node.
fn author_depth(root: &MappingNode) -> usize {
    let mut depth = 0;
    let mut node = root;
    loop {
        let Some(articles) = node.children.get("articles") else {
            return depth;
        };
        let Some(author) = articles.children.get("author") else {
            return depth;
        };
        depth += 1;
        if author.circular {
            return depth;
        }
        node = author;
    }
}

fn cycle_registry(
    global: u32,
    user_class_level: Option<u32>,
    author_override: Option<u32>,
) -> EntityRegistry {
    let mut user = EntityBuilder::new("user", "user")
        .column("id", ColumnKind::Int)
        .relation("articles", Cardinality::OneToMany, "article", None)
        .expose_always("id")
        .expose_always("articles");
    if let Some(level) = user_class_level {
        user = user.max_depth(level);
    }
    let mut article = EntityBuilder::new("article", "article")
        .column("id", ColumnKind::Int)
        .relation("author", Cardinality::ManyToOne, "user", None)
        .expose_always("id")
        .expose_always("author");
    if let Some(level) = author_override {
        article = article.prop_max_depth("author", level);
    }
    EntityRegistry::builder()
        .default_max_depth(global)
        .entity(user)
        .entity(article)
        .build()
        .expect("cycle registry builds")
}

#[test]
fn cycle_stops_at_global_default() {
    let registry = cycle_registry(2, None, None);
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(author_depth(&mapping), 2);
}

#[test]
fn circular_node_exposes_only_the_id() {
    let registry = cycle_registry(2, None, None);
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    let terminal = &mapping.children["articles"].children["author"].children["articles"]
        .children["author"];
    assert!(terminal.circular);
    assert_eq!(terminal.select_props, vec!["id"]);
    assert!(terminal.relation_props.is_empty());
    assert!(terminal.children.is_empty());
    assert!(terminal.only_exposes_id("id"));
}

#[test]
fn class_level_policy_overrides_global_default() {
    let registry = cycle_registry(2, Some(3), None);
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(author_depth(&mapping), 3);
}

#[test]
fn prop_override_beats_class_policy() {
    let registry = cycle_registry(2, Some(3), Some(2));
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(author_depth(&mapping), 2);
}

#[test]
fn raising_the_global_default_expands_the_cycle() {
    let registry = cycle_registry(3, None, None);
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(author_depth(&mapping), 3);
}

#[test]
fn mappings_are_cached_per_entity_and_operation() {
    let registry = common::registry();
    let first = registry.mapping("user", &Operation::List).unwrap();
    let second = registry.mapping("user", &Operation::List).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let details = registry.mapping("user", &Operation::Details).unwrap();
    assert!(!Arc::ptr_eq(&first, &details));
}

#[test]
fn operation_groups_select_different_props() {
    let registry = common::registry();

    let list = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(list.select_props, vec!["id", "name", "age", "isAdmin"]);
    assert_eq!(list.relation_props, vec!["role", "articles"]);
    assert_eq!(
        list.exposed_props,
        vec!["id", "name", "age", "isAdmin", "role", "articles"]
    );

    let details = registry.mapping("user", &Operation::Details).unwrap();
    assert!(details.select_props.contains(&"email".to_string()));
    assert!(details.select_props.contains(&"birthDate".to_string()));
}

#[test]
fn root_scoped_exposure_only_applies_under_that_root() {
    let registry = EntityRegistry::builder()
        .entity(
            EntityBuilder::new("post", "post")
                .column("id", ColumnKind::Int)
                .relation("tags", Cardinality::ManyToMany, "tag", None)
                .expose_always("id")
                .expose_always("tags"),
        )
        .entity(
            EntityBuilder::new("tag", "tag")
                .column("id", ColumnKind::Int)
                .column("label", ColumnKind::String)
                .expose_always("id")
                .expose_scoped("label", "post", &[Operation::List]),
        )
        .build()
        .unwrap();

    let standalone = registry.mapping("tag", &Operation::List).unwrap();
    assert_eq!(standalone.select_props, vec!["id"]);

    let under_post = registry.mapping("post", &Operation::List).unwrap();
    assert_eq!(under_post.children["tags"].select_props, vec!["id", "label"]);
}

#[test]
fn pretty_projection_uses_type_names_and_id_sentinels() {
    let registry = common::registry();
    let entity = registry.entity("user").unwrap();
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    let pretty = pretty_mapping(&registry, entity, &mapping);

    assert_eq!(pretty["name"], json!("String"));
    assert_eq!(pretty["isAdmin"], json!("Bool"));
    // role exposes more than its id, so it pretty-prints as an object.
    assert_eq!(pretty["role"]["identifier"], json!("String"));
    // The cycle terminates in an id-only singular relation.
    assert_eq!(
        pretty["articles"]["author"]["articles"]["author"],
        json!("@id")
    );
}

#[test]
fn computed_props_expose_under_accessor_derived_names() {
    let registry = EntityRegistry::builder()
        .entity(
            EntityBuilder::new("user", "user")
                .column("id", ColumnKind::Int)
                .column("firstName", ColumnKind::String)
                .column("lastName", ColumnKind::String)
                .expose_always("id")
                .expose_always("firstName")
                .expose_always("lastName")
                .computed(
                    "getFullName",
                    None,
                    &[Operation::List, Operation::Details],
                    Arc::new(|raw| {
                        let first = raw["firstName"].as_str().unwrap_or_default();
                        let last = raw["lastName"].as_str().unwrap_or_default();
                        json!(format!("{first} {last}"))
                    }),
                ),
        )
        .build()
        .unwrap();

    let entity = registry.entity("user").unwrap();
    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(mapping.computed_props, vec!["fullName"]);

    let cleaned = clean_item(
        &registry,
        entity,
        &mapping,
        &json!({"id": 1, "firstName": "Ada", "lastName": "Lovelace", "secret": "x"}),
    );
    assert_eq!(cleaned["fullName"], json!("Ada Lovelace"));
    assert!(cleaned.get("secret").is_none());
}

#[test]
fn ancestor_computed_props_merge_into_derived_mappings() {
    let registry = EntityRegistry::builder()
        .entity(
            EntityBuilder::new("person", "person")
                .column("id", ColumnKind::Int)
                .column("name", ColumnKind::String)
                .expose_always("id")
                .expose_always("name")
                .computed(
                    "getDisplayName",
                    None,
                    &[Operation::List],
                    Arc::new(|raw| json!(format!("~{}~", raw["name"].as_str().unwrap_or_default()))),
                ),
        )
        .entity(
            EntityBuilder::new("user", "user")
                .extends("person")
                .column("id", ColumnKind::Int)
                .column("name", ColumnKind::String)
                .expose_always("id")
                .expose_always("name"),
        )
        .build()
        .unwrap();

    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(mapping.computed_props, vec!["displayName"]);

    // The inherited callback resolves during cleaning too.
    let entity = registry.entity("user").unwrap();
    let cleaned = clean_item(&registry, entity, &mapping, &json!({"id": 1, "name": "Ada"}));
    assert_eq!(cleaned["displayName"], json!("~Ada~"));
}

#[test]
fn derived_computed_props_shadow_an_ancestor_declaration() {
    let registry = EntityRegistry::builder()
        .entity(
            EntityBuilder::new("person", "person")
                .column("id", ColumnKind::Int)
                .expose_always("id")
                .computed(
                    "getLabel",
                    None,
                    &[Operation::List],
                    Arc::new(|_| json!("base")),
                ),
        )
        .entity(
            EntityBuilder::new("user", "user")
                .extends("person")
                .column("id", ColumnKind::Int)
                .expose_always("id")
                .computed(
                    "getLabel",
                    None,
                    &[Operation::List],
                    Arc::new(|_| json!("derived")),
                ),
        )
        .build()
        .unwrap();

    let mapping = registry.mapping("user", &Operation::List).unwrap();
    assert_eq!(mapping.computed_props, vec!["label"]);

    let entity = registry.entity("user").unwrap();
    let cleaned = clean_item(&registry, entity, &mapping, &json!({"id": 1}));
    assert_eq!(cleaned["label"], json!("derived"));
}

#[test]
fn computed_method_without_accessor_prefix_fails_at_build() {
    let result = EntityRegistry::builder()
        .entity(
            EntityBuilder::new("user", "user")
                .column("id", ColumnKind::Int)
                .expose_always("id")
                .computed(
                    "fullName",
                    None,
                    &[Operation::List],
                    Arc::new(|_| json!(null)),
                ),
        )
        .build();
    assert!(result.is_err());
}

#[test]
fn relations_flattened_to_ids_when_only_id_is_exposed() {
    let registry = cycle_registry(2, None, None);
    let entity = registry.entity("user").unwrap();
    let mapping = registry.mapping("user", &Operation::List).unwrap();

    let raw = json!({
        "id": 1,
        "articles": [{
            "id": 10,
            "author": {
                "id": 1,
                "articles": [{
                    "id": 10,
                    "author": {"id": 1, "articles": []},
                }],
            },
        }],
    });
    let cleaned = clean_item(&registry, entity, &mapping, &raw);
    // The terminal circular author collapses to its raw id.
    assert_eq!(
        cleaned["articles"][0]["author"]["articles"][0]["author"],
        json!(1)
    );
}
