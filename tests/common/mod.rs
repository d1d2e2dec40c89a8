//! Shared entity graph for integration tests: users with a role, articles
//! and comments, wired with a relation cycle (user -> articles -> author).

use std::sync::Arc;

use entity_routes::{
    ApiError, Cardinality, ColumnKind, EntityBuilder, EntityRegistry, FilterScope, Operation,
    SubresourceSpec,
};

#[allow(dead_code)]
pub fn registry() -> Arc<EntityRegistry> {
    Arc::new(build().expect("fixture registry builds"))
}

/// Route registration and dropped-filter diagnostics are visible with
/// `RUST_LOG=debug`.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn build() -> Result<EntityRegistry, ApiError> {
    EntityRegistry::builder()
        .entity(
            EntityBuilder::new("user", "user")
                .column("id", ColumnKind::Int)
                .column("name", ColumnKind::String)
                .column("email", ColumnKind::String)
                .column("age", ColumnKind::Int)
                .column("isAdmin", ColumnKind::Bool)
                .column("birthDate", ColumnKind::Date)
                .relation("role", Cardinality::ManyToOne, "role", None)
                .relation("articles", Cardinality::OneToMany, "article", Some("author"))
                .expose_always("id")
                .expose_always("name")
                .expose(
                    "email",
                    &[Operation::Details, Operation::Create, Operation::Update],
                )
                .expose_always("age")
                .expose_always("isAdmin")
                .expose("birthDate", &[Operation::Details])
                .expose_always("role")
                .expose("articles", &[Operation::List, Operation::Details])
                .searchable(FilterScope::AllShallow)
                .subresource(
                    "articles",
                    SubresourceSpec::new(&[
                        Operation::List,
                        Operation::Details,
                        Operation::Create,
                    ]),
                ),
        )
        .entity(
            EntityBuilder::new("role", "role")
                .column("id", ColumnKind::Int)
                .column("identifier", ColumnKind::String)
                .expose_always("id")
                .expose_always("identifier"),
        )
        .entity(
            EntityBuilder::new("article", "article")
                .column("id", ColumnKind::Int)
                .column("title", ColumnKind::String)
                .relation("author", Cardinality::ManyToOne, "user", Some("articles"))
                .relation("comments", Cardinality::OneToMany, "comment", Some("article"))
                .expose_always("id")
                .expose_always("title")
                .expose_always("author")
                .expose("comments", &[Operation::Details])
                .searchable(FilterScope::AllNested)
                .subresource(
                    "comments",
                    SubresourceSpec::new(&[Operation::List, Operation::Details]),
                )
                .subresource("author", SubresourceSpec::new(&[Operation::Details])),
        )
        .entity(
            EntityBuilder::new("comment", "comment")
                .column("id", ColumnKind::Int)
                .column("body", ColumnKind::String)
                .relation("article", Cardinality::ManyToOne, "article", Some("comments"))
                .expose_always("id")
                .expose_always("body")
                .searchable(FilterScope::Props(vec!["body".to_string()])),
        )
        .build()
}
