//! Entity metadata and the explicit registration API.
//!
//! Instead of reading decorator metadata off classes at runtime, entities
//! are described once at startup through [`EntityBuilder`] and collected
//! into an [`EntityRegistry`]. The registry is the single cross-entity
//! lookup object; it is built once, validated eagerly (configuration
//! errors fail fast, before any request is served) and then shared as an
//! immutable `Arc` across requests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::filtering::strategy::WhereStrategy;
use crate::groups::{computed_exposed_name, GroupsResolver, GroupsSpec, Operation, PropGroups};
use crate::mapping::MappingCache;
use crate::subresources::SubresourceSpec;

/// Type tag of a column, used for filter-value coercion and the pretty
/// mapping projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Int,
    Float,
    Bool,
    String,
    Date,
    DateTime,
    Json,
}

impl ColumnKind {
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Uuid => "Uuid",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Bool => "Bool",
            Self::String => "String",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Json => "Json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// Whether the relation yields a collection on this side.
    #[must_use]
    pub fn is_to_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

#[derive(Debug, Clone)]
pub struct RelationMeta {
    /// Property name on the owning entity.
    pub prop: String,
    pub cardinality: Cardinality,
    /// Entity name (registry key) of the target.
    pub target: String,
    /// Property on the target pointing back, if the relation is
    /// bidirectional.
    pub inverse_prop: Option<String>,
}

/// Read-only description of one entity type. Relations reference their
/// target by registry key, so the relation graph may freely contain
/// cycles; every traversal in this crate is depth-bounded.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub name: String,
    pub table_name: String,
    pub id_prop: String,
    pub columns: Vec<ColumnMeta>,
    pub relations: Vec<RelationMeta>,
    /// Explicit inheritance chain, most-derived ancestor first.
    pub ancestors: Vec<String>,
}

impl EntityMeta {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|col| col.name == name)
    }

    #[must_use]
    pub fn relation(&self, prop: &str) -> Option<&RelationMeta> {
        self.relations.iter().find(|rel| rel.prop == prop)
    }
}

/// Which property paths the filter engine accepts for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterScope {
    /// Any resolvable path, joining through relations as needed.
    AllNested,
    /// Direct columns and bare relations (normalized to `.id`) only.
    AllShallow,
    /// An explicit allow-list of normalized property paths.
    Props(Vec<String>),
}

/// Filter configuration for one entity. Absent config disables filtering
/// entirely (unknown keys are dropped either way).
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub scope: FilterScope,
    pub default_strategy: WhereStrategy,
    /// Per-path strategy defaults, keyed by normalized property path.
    pub prop_strategies: BTreeMap<String, WhereStrategy>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            scope: FilterScope::AllShallow,
            default_strategy: WhereStrategy::Exact,
            prop_strategies: BTreeMap::new(),
        }
    }
}

/// List pagination bounds and default ordering.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub default_take: u64,
    pub max_take: u64,
    /// Default order directives as `(property path, descending)`.
    pub default_order: Vec<(String, bool)>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_take: 100,
            max_take: 500,
            default_order: Vec::new(),
        }
    }
}

/// Class-level circularity policy: presence enables the depth check, a
/// `None` level falls back to the registry-wide default.
#[derive(Debug, Clone, Copy)]
pub struct DepthPolicy {
    pub level: Option<u32>,
}

pub type ComputedFn = Arc<dyn Fn(&serde_json::Value) -> serde_json::Value + Send + Sync>;

/// A method-backed prop: the backing "method" is an explicit callback over
/// the raw row value, registered at startup.
#[derive(Clone)]
pub struct ComputedProp {
    pub method: String,
    pub alias: Option<String>,
    pub groups: PropGroups,
    pub resolve: ComputedFn,
}

impl ComputedProp {
    /// Exposed name: the alias, or the de-prefixed lower-camel method name.
    /// Validated at registration, so this cannot fail afterwards.
    #[must_use]
    pub fn exposed_name(&self) -> String {
        computed_exposed_name(&self.method, self.alias.as_deref())
            .unwrap_or_else(|_| self.method.clone())
    }
}

impl fmt::Debug for ComputedProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedProp")
            .field("method", &self.method)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Per-entity route configuration collected by the builder.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub path: String,
    pub operations: Vec<Operation>,
    pub groups: GroupsSpec,
    pub computed: Vec<ComputedProp>,
    pub subresources: Vec<(String, SubresourceSpec)>,
    /// Class-level max-depth policy (§4.2); `None` means not enabled.
    pub depth: Option<DepthPolicy>,
    /// Per-relation-prop depth overrides; take precedence over `depth`.
    pub prop_max_depths: BTreeMap<String, u32>,
    pub search: Option<SearchConfig>,
    pub pagination: PaginationConfig,
    /// Whether this entity may re-enter a subresource chain that already
    /// contains its table.
    pub allow_circular_subresources: bool,
}

/// Fluent registration for one entity: metadata, groups, subresources,
/// depth policy and filter configuration in one place.
pub struct EntityBuilder {
    meta: EntityMeta,
    config: RouteConfig,
}

impl EntityBuilder {
    #[must_use]
    pub fn new(name: &str, table_name: &str) -> Self {
        Self {
            meta: EntityMeta {
                name: name.to_string(),
                table_name: table_name.to_string(),
                id_prop: "id".to_string(),
                columns: Vec::new(),
                relations: Vec::new(),
                ancestors: Vec::new(),
            },
            config: RouteConfig {
                path: format!("/{table_name}"),
                operations: vec![
                    Operation::Create,
                    Operation::Update,
                    Operation::List,
                    Operation::Details,
                    Operation::Delete,
                ],
                ..RouteConfig::default()
            },
        }
    }

    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    #[must_use]
    pub fn id_prop(mut self, prop: &str) -> Self {
        self.meta.id_prop = prop.to_string();
        self
    }

    #[must_use]
    pub fn extends(mut self, ancestor: &str) -> Self {
        self.meta.ancestors.push(ancestor.to_string());
        self
    }

    #[must_use]
    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.meta.columns.push(ColumnMeta {
            name: name.to_string(),
            kind,
            nullable: false,
        });
        self
    }

    #[must_use]
    pub fn nullable_column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.meta.columns.push(ColumnMeta {
            name: name.to_string(),
            kind,
            nullable: true,
        });
        self
    }

    #[must_use]
    pub fn relation(
        mut self,
        prop: &str,
        cardinality: Cardinality,
        target: &str,
        inverse_prop: Option<&str>,
    ) -> Self {
        self.meta.relations.push(RelationMeta {
            prop: prop.to_string(),
            cardinality,
            target: target.to_string(),
            inverse_prop: inverse_prop.map(str::to_string),
        });
        self
    }

    /// Expose a prop under the given operations, regardless of root context.
    #[must_use]
    pub fn expose(mut self, prop: &str, operations: &[Operation]) -> Self {
        self.config
            .groups
            .declare(prop, PropGroups::for_operations(operations));
        self
    }

    /// Expose a prop under all current and future default operations.
    #[must_use]
    pub fn expose_always(mut self, prop: &str) -> Self {
        self.config.groups.declare(prop, PropGroups::always());
        self
    }

    /// Expose a prop only when read under the given root entity context.
    #[must_use]
    pub fn expose_scoped(mut self, prop: &str, root_table: &str, operations: &[Operation]) -> Self {
        let mut groups = PropGroups::default();
        groups
            .scoped
            .insert(root_table.to_string(), operations.to_vec());
        self.config.groups.declare(prop, groups);
        self
    }

    /// Register a method-backed prop. `method` must follow the
    /// `get*/is*/has*` convention unless `alias` is given; violations are
    /// reported by [`EntityRegistryBuilder::build`].
    #[must_use]
    pub fn computed(
        mut self,
        method: &str,
        alias: Option<&str>,
        operations: &[Operation],
        resolve: ComputedFn,
    ) -> Self {
        self.config.computed.push(ComputedProp {
            method: method.to_string(),
            alias: alias.map(str::to_string),
            groups: PropGroups::for_operations(operations),
            resolve,
        });
        self
    }

    #[must_use]
    pub fn subresource(mut self, prop: &str, spec: SubresourceSpec) -> Self {
        self.config.subresources.push((prop.to_string(), spec));
        self
    }

    #[must_use]
    pub fn operations(mut self, operations: &[Operation]) -> Self {
        self.config.operations = operations.to_vec();
        self
    }

    /// Enable the class-level depth check with the registry default limit.
    #[must_use]
    pub fn max_depth_enabled(mut self) -> Self {
        self.config.depth = Some(DepthPolicy { level: None });
        self
    }

    /// Enable the class-level depth check with an explicit limit.
    #[must_use]
    pub fn max_depth(mut self, level: u32) -> Self {
        self.config.depth = Some(DepthPolicy { level: Some(level) });
        self
    }

    /// Depth override for one relation prop; wins over the class policy.
    #[must_use]
    pub fn prop_max_depth(mut self, prop: &str, level: u32) -> Self {
        self.config.prop_max_depths.insert(prop.to_string(), level);
        self
    }

    #[must_use]
    pub fn searchable(mut self, scope: FilterScope) -> Self {
        self.config
            .search
            .get_or_insert_with(SearchConfig::default)
            .scope = scope;
        self
    }

    #[must_use]
    pub fn default_strategy(mut self, strategy: WhereStrategy) -> Self {
        self.config
            .search
            .get_or_insert_with(SearchConfig::default)
            .default_strategy = strategy;
        self
    }

    /// Default strategy for one normalized property path.
    #[must_use]
    pub fn prop_strategy(mut self, path: &str, strategy: WhereStrategy) -> Self {
        self.config
            .search
            .get_or_insert_with(SearchConfig::default)
            .prop_strategies
            .insert(path.to_string(), strategy);
        self
    }

    #[must_use]
    pub fn pagination(mut self, pagination: PaginationConfig) -> Self {
        self.config.pagination = pagination;
        self
    }

    #[must_use]
    pub fn allow_circular_subresources(mut self) -> Self {
        self.config.allow_circular_subresources = true;
        self
    }
}

/// Collects entity registrations and validates them into a registry.
pub struct EntityRegistryBuilder {
    entities: Vec<(EntityMeta, RouteConfig)>,
    default_max_depth: u32,
    default_subresource_max_depth: u32,
    expose_internal_errors: bool,
}

impl Default for EntityRegistryBuilder {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            default_max_depth: 2,
            default_subresource_max_depth: 2,
            expose_internal_errors: false,
        }
    }
}

impl EntityRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, builder: EntityBuilder) -> Self {
        self.entities.push((builder.meta, builder.config));
        self
    }

    /// Global fallback for the mapping depth policy (§4.2).
    #[must_use]
    pub fn default_max_depth(mut self, level: u32) -> Self {
        self.default_max_depth = level;
        self
    }

    /// Fallback max depth for subresource chains without a per-prop limit.
    #[must_use]
    pub fn default_subresource_max_depth(mut self, level: u32) -> Self {
        self.default_subresource_max_depth = level;
        self
    }

    /// Development mode: surface real error messages to clients.
    #[must_use]
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Validate every registration and produce the shared registry.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] for duplicate entities or route paths,
    /// dangling relation targets or ancestors, group declarations on unknown props,
    /// computed props that violate the accessor convention, and
    /// subresource or depth declarations on non-relation props.
    pub fn build(self) -> Result<EntityRegistry, ApiError> {
        let mut entities = HashMap::new();
        let mut configs = HashMap::new();
        let mut order = Vec::new();

        for (meta, config) in self.entities {
            if entities.contains_key(&meta.name) {
                return Err(ApiError::config(format!(
                    "entity '{}' registered twice",
                    meta.name
                )));
            }
            order.push(meta.name.clone());
            configs.insert(meta.name.clone(), config);
            entities.insert(meta.name.clone(), meta);
        }

        let registry = EntityRegistry {
            entities,
            configs,
            order,
            groups: GroupsResolver::default(),
            mappings: MappingCache::default(),
            default_max_depth: self.default_max_depth,
            default_subresource_max_depth: self.default_subresource_max_depth,
            expose_internal_errors: self.expose_internal_errors,
        };
        registry.validate()?;
        Ok(registry)
    }
}

/// All registered entities plus the shared caches. Read-only after
/// [`EntityRegistryBuilder::build`]; safe to share across requests.
pub struct EntityRegistry {
    entities: HashMap<String, EntityMeta>,
    configs: HashMap<String, RouteConfig>,
    order: Vec<String>,
    pub(crate) groups: GroupsResolver,
    pub(crate) mappings: MappingCache,
    pub default_max_depth: u32,
    pub default_subresource_max_depth: u32,
    pub expose_internal_errors: bool,
}

impl EntityRegistry {
    #[must_use]
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::new()
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityMeta> {
        self.entities.get(name)
    }

    pub fn require_entity(&self, name: &str) -> Result<&EntityMeta, ApiError> {
        self.entity(name)
            .ok_or_else(|| ApiError::config(format!("unknown entity '{name}'")))
    }

    #[must_use]
    pub fn config(&self, name: &str) -> Option<&RouteConfig> {
        self.configs.get(name)
    }

    /// Entity names in registration order; used wherever cross-entity
    /// iteration must be deterministic.
    #[must_use]
    pub fn entity_names(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn relation_target(&self, relation: &RelationMeta) -> Option<&EntityMeta> {
        self.entities.get(&relation.target)
    }

    /// A computed prop by exposed name, searching the entity's own
    /// declarations before its ancestors', most derived first.
    #[must_use]
    pub fn computed_prop(&self, entity: &EntityMeta, name: &str) -> Option<&ComputedProp> {
        std::iter::once(entity.name.as_str())
            .chain(entity.ancestors.iter().map(String::as_str))
            .filter_map(|owner| self.config(owner))
            .flat_map(|config| config.computed.iter())
            .find(|computed| computed.exposed_name() == name)
    }

    fn validate(&self) -> Result<(), ApiError> {
        let mut paths: HashMap<&str, &str> = HashMap::new();
        for name in &self.order {
            let config = &self.configs[name];
            if let Some(other) = paths.insert(config.path.as_str(), name.as_str()) {
                return Err(ApiError::config(format!(
                    "entities '{other}' and '{name}' share the route path '{}'",
                    config.path
                )));
            }
        }

        for name in &self.order {
            let meta = &self.entities[name];
            let config = &self.configs[name];

            for ancestor in &meta.ancestors {
                if !self.entities.contains_key(ancestor) {
                    return Err(ApiError::config(format!(
                        "entity '{name}' extends unregistered entity '{ancestor}'"
                    )));
                }
            }
            for relation in &meta.relations {
                let Some(target) = self.entities.get(&relation.target) else {
                    return Err(ApiError::config(format!(
                        "relation '{name}.{}' targets unregistered entity '{}'",
                        relation.prop, relation.target
                    )));
                };
                if let Some(inverse) = &relation.inverse_prop {
                    if target.relation(inverse).is_none() {
                        return Err(ApiError::config(format!(
                            "relation '{name}.{}' declares inverse '{}.{inverse}' which does not exist",
                            relation.prop, relation.target
                        )));
                    }
                }
            }
            for (prop, _) in config.groups.iter() {
                if meta.column(prop).is_none() && meta.relation(prop).is_none() {
                    return Err(ApiError::config(format!(
                        "groups declared on unknown prop '{name}.{prop}'"
                    )));
                }
            }
            for computed in &config.computed {
                computed_exposed_name(&computed.method, computed.alias.as_deref())?;
            }
            for (prop, _) in &config.subresources {
                if meta.relation(prop).is_none() {
                    return Err(ApiError::config(format!(
                        "subresource declared on non-relation prop '{name}.{prop}'"
                    )));
                }
            }
            for prop in config.prop_max_depths.keys() {
                if meta.relation(prop).is_none() {
                    return Err(ApiError::config(format!(
                        "max-depth override on non-relation prop '{name}.{prop}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.order)
            .field("default_max_depth", &self.default_max_depth)
            .finish_non_exhaustive()
    }
}
