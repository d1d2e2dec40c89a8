//! Exposure groups: which properties an entity shows under which operation.
//!
//! Group declarations are registered explicitly per entity (no runtime
//! reflection) and resolved once per `(entity, root context, operation)`
//! triple. Resolution merges declarations across the entity's ancestor
//! chain and across global/root-scoped declarations, then splits the
//! result into column-backed scalars, relations and computed props.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::errors::ApiError;
use crate::metadata::{EntityMeta, EntityRegistry};

/// Route operations. `Custom` operations participate in group resolution
/// and mapping like any other, but route derivation only emits the five
/// canonical operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    List,
    Details,
    Delete,
    Custom(String),
}

/// Operations a prop declared without an explicit list is exposed under.
pub const DEFAULT_OPERATIONS: [Operation; 4] = [
    Operation::Create,
    Operation::Update,
    Operation::List,
    Operation::Details,
];

impl Operation {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::List => "list",
            Self::Details => "details",
            Self::Delete => "delete",
            Self::Custom(name) => name,
        }
    }

    /// Operations that write a payload and run validation.
    #[must_use]
    pub fn is_persisting(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Operations that read and therefore need a select mapping.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        matches!(self, Self::List | Self::Details)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exposure declaration for one property.
#[derive(Debug, Clone, Default)]
pub struct PropGroups {
    /// Declared without an operation list: exposed under every default
    /// operation, current and future.
    pub always: bool,
    /// Exposed under these operations regardless of root context.
    pub operations: Vec<Operation>,
    /// Exposed under these operations only when read under the given root
    /// entity (keyed by root table name).
    pub scoped: BTreeMap<String, Vec<Operation>>,
}

impl PropGroups {
    #[must_use]
    pub fn always() -> Self {
        Self {
            always: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_operations(operations: &[Operation]) -> Self {
        Self {
            operations: operations.to_vec(),
            ..Self::default()
        }
    }

    /// Whether this prop is exposed for `operation` when read under
    /// `root_table`. Global and root-scoped declarations are unioned.
    #[must_use]
    pub fn exposes(&self, root_table: &str, operation: &Operation) -> bool {
        if self.always && DEFAULT_OPERATIONS.contains(operation) {
            return true;
        }
        if self.operations.contains(operation) {
            return true;
        }
        self.scoped
            .get(root_table)
            .is_some_and(|ops| ops.contains(operation))
    }

    /// Union the other declaration into this one (used when merging an
    /// ancestor's declaration for the same prop).
    pub fn merge(&mut self, other: &PropGroups) {
        self.always |= other.always;
        for op in &other.operations {
            if !self.operations.contains(op) {
                self.operations.push(op.clone());
            }
        }
        for (root, ops) in &other.scoped {
            let entry = self.scoped.entry(root.clone()).or_default();
            for op in ops {
                if !entry.contains(op) {
                    entry.push(op.clone());
                }
            }
        }
    }
}

/// All group declarations of one entity, in registration order.
#[derive(Debug, Clone, Default)]
pub struct GroupsSpec {
    props: Vec<(String, PropGroups)>,
}

impl GroupsSpec {
    pub fn declare(&mut self, prop: &str, groups: PropGroups) {
        if let Some((_, existing)) = self.props.iter_mut().find(|(name, _)| name == prop) {
            existing.merge(&groups);
        } else {
            self.props.push((prop.to_string(), groups));
        }
    }

    #[must_use]
    pub fn get(&self, prop: &str) -> Option<&PropGroups> {
        self.props
            .iter()
            .find(|(name, _)| name == prop)
            .map(|(_, g)| g)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropGroups)> {
        self.props.iter().map(|(name, g)| (name.as_str(), g))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// The resolved, ordered prop sets for one `(entity, root, operation)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposedProps {
    /// Column-backed scalar props, in declaration order.
    pub select_props: Vec<String>,
    /// Relation props.
    pub relation_props: Vec<String>,
    /// Computed props, by exposed (aliased) name.
    pub computed_props: Vec<String>,
}

impl ExposedProps {
    /// Scalar props namespaced with a SQL alias prefix, for SELECT lists.
    #[must_use]
    pub fn select_with_alias(&self, alias: &str) -> Vec<String> {
        self.select_props
            .iter()
            .map(|prop| format!("{alias}.{prop}"))
            .collect()
    }
}

type GroupsCacheKey = (String, String, Operation);

/// Resolves and caches exposed props. Read-only after population; cache
/// entries are immutable `Arc`s and population is idempotent, so a racing
/// duplicate computation is discarded harmlessly.
#[derive(Debug, Default)]
pub struct GroupsResolver {
    cache: RwLock<HashMap<GroupsCacheKey, Arc<ExposedProps>>>,
}

impl GroupsResolver {
    /// Exposed props of `entity` for `operation`, read under the root
    /// context `root_table` (the root entity's table name; equals the
    /// entity's own table when it is the root).
    pub fn resolve(
        &self,
        registry: &EntityRegistry,
        entity: &EntityMeta,
        root_table: &str,
        operation: &Operation,
    ) -> Arc<ExposedProps> {
        let key = (
            entity.name.clone(),
            root_table.to_string(),
            operation.clone(),
        );
        if let Some(cached) = self.cache.read().expect("groups cache poisoned").get(&key) {
            return cached.clone();
        }

        let resolved = Arc::new(Self::compute(registry, entity, root_table, operation));
        let mut cache = self.cache.write().expect("groups cache poisoned");
        cache
            .entry(key)
            .or_insert_with(|| resolved.clone())
            .clone()
    }

    fn compute(
        registry: &EntityRegistry,
        entity: &EntityMeta,
        root_table: &str,
        operation: &Operation,
    ) -> ExposedProps {
        let merged = merged_groups(registry, entity);

        let mut exposed = ExposedProps::default();
        for (prop, groups) in merged.iter() {
            if !groups.exposes(root_table, operation) {
                continue;
            }
            if entity.relation(prop).is_some() {
                exposed.relation_props.push(prop.to_string());
            } else if entity.column(prop).is_some() {
                exposed.select_props.push(prop.to_string());
            }
        }

        // Computed props merge across the ancestor chain too; a more
        // derived declaration of the same exposed name wins.
        for owner in std::iter::once(entity.name.as_str())
            .chain(entity.ancestors.iter().map(String::as_str))
        {
            let Some(config) = registry.config(owner) else {
                continue;
            };
            for computed in &config.computed {
                let name = computed.exposed_name();
                if computed.groups.exposes(root_table, operation)
                    && !exposed.computed_props.contains(&name)
                {
                    exposed.computed_props.push(name);
                }
            }
        }

        exposed
    }
}

/// Group declarations of `entity` merged with its ancestors', walking the
/// chain from most-derived to least. A prop already declared by a more
/// derived type absorbs the ancestor's declaration by list union, never by
/// overwrite.
#[must_use]
pub fn merged_groups(registry: &EntityRegistry, entity: &EntityMeta) -> GroupsSpec {
    let mut merged = GroupsSpec::default();
    if let Some(config) = registry.config(&entity.name) {
        for (prop, groups) in config.groups.iter() {
            merged.declare(prop, groups.clone());
        }
    }
    for ancestor in &entity.ancestors {
        if let Some(config) = registry.config(ancestor) {
            for (prop, groups) in config.groups.iter() {
                merged.declare(prop, groups.clone());
            }
        }
    }
    merged
}

/// Checks a computed-prop declaration at registration time. The backing
/// method must follow the accessor naming convention or carry an explicit
/// alias; anything else is a configuration error, reported before any
/// request is served.
pub(crate) fn computed_exposed_name(method: &str, alias: Option<&str>) -> Result<String, ApiError> {
    if let Some(alias) = alias {
        return Ok(alias.to_string());
    }
    for prefix in ["get", "is", "has"] {
        if let Some(rest) = method.strip_prefix(prefix) {
            if rest
                .chars()
                .next()
                .is_some_and(|first| first.is_ascii_uppercase())
            {
                let mut chars = rest.chars();
                let first = chars.next().map(|c| c.to_ascii_lowercase());
                return Ok(first.into_iter().chain(chars).collect());
            }
        }
    }
    Err(ApiError::config(format!(
        "computed prop method '{method}' does not match get*/is*/has* and has no alias"
    )))
}
