//! Automatic REST route generation over a relational entity graph.
//!
//! Entities, their relations and their exposure rules are registered once
//! at startup through [`EntityBuilder`] and collected into an
//! [`EntityRegistry`]. From that registry the crate derives:
//!
//! - per-operation property **mappings** (which nested props to select,
//!   bounded by a max-depth/circularity policy),
//! - a query-string **filter engine** (strategies, comparison symbols,
//!   negation, AND/OR nesting, relation traversal with join aliasing),
//! - nested **subresource routes** under each entity's detail route, and
//! - an axum router wiring all of it to a persistence collaborator
//!   implementing [`EntityPersistence`].
//!
//! ```
//! use entity_routes::{ColumnKind, EntityBuilder, EntityRegistry};
//!
//! let registry = EntityRegistry::builder()
//!     .entity(
//!         EntityBuilder::new("user", "user")
//!             .column("id", ColumnKind::Uuid)
//!             .column("name", ColumnKind::String)
//!             .expose_always("id")
//!             .expose_always("name"),
//!     )
//!     .build()?;
//! assert!(registry.entity("user").is_some());
//! # Ok::<(), entity_routes::ApiError>(())
//! ```

pub mod errors;
pub mod filtering;
pub mod groups;
pub mod mapping;
pub mod metadata;
pub mod models;
pub mod operations;
pub mod routes;
pub mod serialize;
pub mod subresources;

pub use errors::ApiError;
pub use filtering::{
    build_query_filter, ComparisonSymbol, ConditionType, FilterParam, JoinSpec, OrderSpec,
    QueryFilter, WhereStrategy,
};
pub use groups::{Operation, PropGroups};
pub use mapping::{pretty_mapping, MappingNode};
pub use metadata::{
    Cardinality, ColumnKind, EntityBuilder, EntityMeta, EntityRegistry, EntityRegistryBuilder,
    FilterScope, PaginationConfig, RelationMeta, SearchConfig,
};
pub use models::RouteContext;
pub use operations::{
    EntityPersistence, ItemQuery, ListPage, ListQuery, ParentRef, RequestContext, WriteQuery,
};
pub use routes::{
    build_route_table, build_router, derive_entity_routes, RouteDescriptor, RouteKind,
    SubresourceLink,
};
pub use serialize::clean_item;
pub use subresources::{derive_subresource_routes, SubresourceSpec};
