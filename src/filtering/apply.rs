//! Turns parsed filter params into join descriptors and SQL conditions.
//!
//! Joins are emitted as `(path, alias)` descriptors for the query-builder
//! collaborator; WHERE clauses are emitted as `sea_query` expressions with
//! bound parameters. Everything here is per-request state: the alias
//! registry and the condition list are created fresh for every query and
//! discarded afterwards.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sea_orm::sea_query::{Alias, BinOper, Expr, SimpleExpr};
use sea_orm::{Condition, Value};

use crate::metadata::{ColumnKind, ColumnMeta, EntityMeta, EntityRegistry, FilterScope, SearchConfig};

use super::nested::{sort_by_condition_type, split_filters, ConditionType, NestedConditionTree};
use super::parser::{parse_query_param, FilterParam};
use super::strategy::WhereStrategy;

/// Maps `(table, relation prop)` to a unique SQL alias so the same
/// relation path is joined at most once per query.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    aliases: HashMap<(String, String), String>,
}

impl AliasRegistry {
    /// Existing alias for the pair, or a freshly generated one. The bool
    /// is true when the alias (and therefore the join) is new.
    pub fn get_or_insert(&mut self, table: &str, prop: &str) -> (String, bool) {
        let key = (table.to_string(), prop.to_string());
        if let Some(existing) = self.aliases.get(&key) {
            return (existing.clone(), false);
        }
        let alias = format!("{table}_{prop}_{}", self.aliases.len() + 1);
        self.aliases.insert(key, alias.clone());
        (alias, true)
    }
}

/// One LEFT JOIN to perform, TypeORM-style: `path` is
/// `<parent alias>.<relation prop>` and `alias` the name to join under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub path: String,
    pub alias: String,
    pub target_table: String,
}

/// One ORDER BY target, already resolved to an alias and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub alias: String,
    pub column: String,
    pub descending: bool,
}

/// The per-request output of the filter engine.
#[derive(Debug, Default)]
pub struct QueryFilter {
    pub joins: Vec<JoinSpec>,
    /// Top-level WHERE list, stably sorted so AND conditions precede OR
    /// conditions (see [`sort_by_condition_type`]).
    pub conditions: Vec<(ConditionType, SimpleExpr)>,
    pub order: Vec<OrderSpec>,
}

impl QueryFilter {
    /// Fold the condition list left-to-right into one `Condition`
    /// (`a AND b OR c` folds as `(a AND b) OR c`).
    #[must_use]
    pub fn condition(&self) -> Condition {
        match fold_conditions(&self.conditions) {
            Some(expr) => Condition::all().add(expr),
            None => Condition::all(),
        }
    }
}

fn fold_conditions(conditions: &[(ConditionType, SimpleExpr)]) -> Option<SimpleExpr> {
    let mut iter = conditions.iter();
    let (_, first) = iter.next()?;
    let mut acc = first.clone();
    for (cond_type, expr) in iter {
        let op = match cond_type {
            ConditionType::And => BinOper::And,
            ConditionType::Or => BinOper::Or,
        };
        acc = acc.binary(op, expr.clone());
    }
    Some(acc)
}

/// Build joins, conditions and ordering for one request against `entity`.
///
/// `pairs` are the raw query parameters; keys that do not match the filter
/// grammar, paths that do not resolve, and paths outside the entity's
/// filter scope are silently dropped. `order_by` is the raw `orderBy`
/// directive string, if any.
#[must_use]
pub fn build_query_filter(
    registry: &EntityRegistry,
    entity: &EntityMeta,
    pairs: &[(String, String)],
    order_by: Option<&str>,
) -> QueryFilter {
    let mut query = QueryFilter::default();
    let mut aliases = AliasRegistry::default();
    let config = registry.config(&entity.name);
    let search = config.and_then(|c| c.search.as_ref());

    if let Some(search) = search {
        let params: Vec<FilterParam> = pairs
            .iter()
            .filter_map(|(key, value)| {
                let parsed = parse_query_param(key, value);
                if parsed.is_none() {
                    tracing::debug!(key, "query key does not match filter grammar, ignored");
                }
                parsed
            })
            .collect();

        let (flat, tree) = split_filters(params);
        for param in flat {
            if let Some(expr) =
                param_expr(registry, entity, search, &param, &mut aliases, &mut query.joins)
            {
                query.conditions.push((param.cond_type, expr));
            }
        }
        for child in tree.children.values() {
            if let Some(expr) =
                render_tree(registry, entity, search, child, &mut aliases, &mut query.joins)
            {
                query.conditions.push((child.cond_type, expr));
            }
        }
        sort_by_condition_type(&mut query.conditions);

        if let Some(order_by) = order_by {
            for directive in order_by.split(',') {
                let (path, direction) = directive.split_once(':').unwrap_or((directive, "asc"));
                let descending = direction.eq_ignore_ascii_case("desc");
                if !descending && !direction.eq_ignore_ascii_case("asc") {
                    continue;
                }
                let segments: Vec<String> = path.split('.').map(str::to_string).collect();
                let Some(resolved) = resolve_property_path(registry, entity, &segments) else {
                    continue;
                };
                if !path_allowed(&search.scope, &resolved) {
                    continue;
                }
                let alias = commit_joins(&resolved, &entity.table_name, &mut aliases, &mut query.joins);
                query.order.push(OrderSpec {
                    alias,
                    column: resolved.column.name.clone(),
                    descending,
                });
            }
        }
    }

    if query.order.is_empty() {
        if let Some(config) = config {
            // Configured default order is trusted, not scope-gated.
            for (path, descending) in &config.pagination.default_order {
                let segments: Vec<String> = path.split('.').map(str::to_string).collect();
                let Some(resolved) = resolve_property_path(registry, entity, &segments) else {
                    continue;
                };
                let alias = commit_joins(&resolved, &entity.table_name, &mut aliases, &mut query.joins);
                query.order.push(OrderSpec {
                    alias,
                    column: resolved.column.name.clone(),
                    descending: *descending,
                });
            }
        }
    }

    query
}

fn render_tree(
    registry: &EntityRegistry,
    entity: &EntityMeta,
    search: &SearchConfig,
    node: &NestedConditionTree,
    aliases: &mut AliasRegistry,
    joins: &mut Vec<JoinSpec>,
) -> Option<SimpleExpr> {
    let mut conditions: Vec<(ConditionType, SimpleExpr)> = Vec::new();
    for param in &node.params {
        if let Some(expr) = param_expr(registry, entity, search, param, aliases, joins) {
            conditions.push((param.cond_type, expr));
        }
    }
    for child in node.children.values() {
        if let Some(expr) = render_tree(registry, entity, search, child, aliases, joins) {
            conditions.push((child.cond_type, expr));
        }
    }
    sort_by_condition_type(&mut conditions);
    fold_conditions(&conditions)
}

struct Hop {
    owner_table: String,
    prop: String,
    target_table: String,
}

struct ResolvedPath {
    hops: Vec<Hop>,
    column: ColumnMeta,
    /// Final column is the terminal entity's id prop (bare relations
    /// normalize to this).
    ends_on_target_id: bool,
    /// Normalized dot path, with `.id` appended for bare relations.
    normalized: String,
}

/// Resolve a dot-delimited property path through relation metadata. Pure:
/// aliases and joins are only committed once the path passes the scope
/// check, so rejected paths leave no trace in the alias registry.
fn resolve_property_path(
    registry: &EntityRegistry,
    root: &EntityMeta,
    segments: &[String],
) -> Option<ResolvedPath> {
    let mut current = root;
    let mut hops = Vec::new();
    let mut normalized: Vec<String> = Vec::new();

    for (index, segment) in segments.iter().enumerate() {
        let is_last = index == segments.len() - 1;
        if let Some(column) = current.column(segment) {
            if !is_last {
                return None;
            }
            normalized.push(segment.clone());
            let ends_on_target_id = !hops.is_empty() && segment == &current.id_prop;
            return Some(ResolvedPath {
                hops,
                column: column.clone(),
                ends_on_target_id,
                normalized: normalized.join("."),
            });
        }
        let relation = current.relation(segment)?;
        let target = registry.relation_target(relation)?;
        hops.push(Hop {
            owner_table: current.table_name.clone(),
            prop: segment.clone(),
            target_table: target.table_name.clone(),
        });
        normalized.push(segment.clone());
        if is_last {
            // Bare relation: normalize by appending the target's id.
            let column = target.column(&target.id_prop)?;
            normalized.push(target.id_prop.clone());
            return Some(ResolvedPath {
                hops,
                column: column.clone(),
                ends_on_target_id: true,
                normalized: normalized.join("."),
            });
        }
        current = target;
    }
    None
}

/// Register the path's joins, reusing aliases for already-joined
/// relations, and return the alias qualifying the final column.
fn commit_joins(
    resolved: &ResolvedPath,
    root_table: &str,
    aliases: &mut AliasRegistry,
    joins: &mut Vec<JoinSpec>,
) -> String {
    let mut parent_alias = root_table.to_string();
    for hop in &resolved.hops {
        let (alias, created) = aliases.get_or_insert(&hop.owner_table, &hop.prop);
        if created {
            joins.push(JoinSpec {
                path: format!("{parent_alias}.{}", hop.prop),
                alias: alias.clone(),
                target_table: hop.target_table.clone(),
            });
        }
        parent_alias = alias;
    }
    parent_alias
}

fn path_allowed(scope: &FilterScope, resolved: &ResolvedPath) -> bool {
    match scope {
        FilterScope::AllNested => true,
        FilterScope::AllShallow => {
            resolved.hops.is_empty() || (resolved.hops.len() == 1 && resolved.ends_on_target_id)
        }
        FilterScope::Props(allowed) => allowed.iter().any(|entry| {
            entry == &resolved.normalized
                || (resolved.ends_on_target_id
                    && resolved
                        .normalized
                        .strip_suffix(".id")
                        .is_some_and(|bare| entry == bare))
        }),
    }
}

fn param_expr(
    registry: &EntityRegistry,
    root: &EntityMeta,
    search: &SearchConfig,
    param: &FilterParam,
    aliases: &mut AliasRegistry,
    joins: &mut Vec<JoinSpec>,
) -> Option<SimpleExpr> {
    let resolved = resolve_property_path(registry, root, &param.property_path)?;
    if !path_allowed(&search.scope, &resolved) {
        tracing::debug!(
            path = resolved.normalized,
            "filter path outside the entity's filter scope, ignored"
        );
        return None;
    }
    let alias = commit_joins(&resolved, &root.table_name, aliases, joins);
    let strategy = param
        .strategy
        .or_else(|| search.prop_strategies.get(&resolved.normalized).copied())
        .unwrap_or(search.default_strategy);
    strategy_expr(&alias, &resolved.column, strategy, param.negated, &param.values)
}

fn column_ref(alias: &str, column: &ColumnMeta) -> Expr {
    Expr::col((Alias::new(alias), Alias::new(column.name.as_str())))
}

/// Emit the SQL expression for one condition, honoring the documented
/// operator duals under negation.
fn strategy_expr(
    alias: &str,
    column: &ColumnMeta,
    strategy: WhereStrategy,
    negated: bool,
    values: &[String],
) -> Option<SimpleExpr> {
    let col = || column_ref(alias, column);
    match strategy {
        WhereStrategy::Exists => {
            // Negation is additionally inverted by the supplied boolean.
            let supplied = values.first().map_or(true, |v| parse_bool(v).unwrap_or(true));
            let not_null = supplied != negated;
            Some(if not_null {
                col().is_not_null()
            } else {
                col().is_null()
            })
        }
        WhereStrategy::Is => {
            let raw = values.first()?;
            if raw.eq_ignore_ascii_case("null") {
                return Some(if negated {
                    col().is_not_null()
                } else {
                    col().is_null()
                });
            }
            let value = parse_bool(raw)?;
            Some(if negated {
                col().ne(value)
            } else {
                col().eq(value)
            })
        }
        WhereStrategy::In => {
            let list: Vec<Value> = values
                .iter()
                .filter_map(|raw| column_value(column, raw, strategy, 0))
                .collect();
            if list.is_empty() {
                return None;
            }
            Some(if negated {
                col().is_not_in(list)
            } else {
                col().is_in(list)
            })
        }
        WhereStrategy::Between => {
            let low = column_value(column, values.first()?, strategy, 0)?;
            let high = column_value(column, values.get(1)?, strategy, 1)?;
            Some(if negated {
                col().not_between(low, high)
            } else {
                col().between(low, high)
            })
        }
        WhereStrategy::BetweenStrict => {
            // Strict open interval: per-bound operators, swapped (and the
            // conjunction flipped) under negation. Preserved exactly as
            // documented; do not re-derive.
            let low = column_value(column, values.first()?, strategy, 0)?;
            let high = column_value(column, values.get(1)?, strategy, 1)?;
            Some(if negated {
                col().lt(low).binary(BinOper::Or, col().gt(high))
            } else {
                col().gt(low).binary(BinOper::And, col().lt(high))
            })
        }
        _ => {
            // Single-value strategies: an array value fans out into its own
            // bracketed OR (AND when negated) sub-condition.
            let exprs: Vec<SimpleExpr> = values
                .iter()
                .filter_map(|raw| single_value_expr(alias, column, strategy, negated, raw))
                .collect();
            let mut iter = exprs.into_iter();
            let first = iter.next()?;
            let op = if negated { BinOper::And } else { BinOper::Or };
            Some(iter.fold(first, |acc, expr| acc.binary(op, expr)))
        }
    }
}

fn single_value_expr(
    alias: &str,
    column: &ColumnMeta,
    strategy: WhereStrategy,
    negated: bool,
    raw: &str,
) -> Option<SimpleExpr> {
    let col = || column_ref(alias, column);
    let pattern = match strategy {
        WhereStrategy::Contains => Some(format!("%{raw}%")),
        WhereStrategy::StartsWith => Some(format!("{raw}%")),
        WhereStrategy::EndsWith => Some(format!("%{raw}")),
        _ => None,
    };
    if let Some(pattern) = pattern {
        return Some(if negated {
            col().not_like(pattern)
        } else {
            col().like(pattern)
        });
    }

    let value = column_value(column, raw, strategy, 0)?;
    Some(match (strategy, negated) {
        (WhereStrategy::LessThan, false) | (WhereStrategy::GreaterThanOrEqual, true) => {
            col().lt(value)
        }
        (WhereStrategy::LessThanOrEqual, false) | (WhereStrategy::GreaterThan, true) => {
            col().lte(value)
        }
        (WhereStrategy::GreaterThan, false) | (WhereStrategy::LessThanOrEqual, true) => {
            col().gt(value)
        }
        (WhereStrategy::GreaterThanOrEqual, false) | (WhereStrategy::LessThan, true) => {
            col().gte(value)
        }
        (_, false) => col().eq(value),
        (_, true) => col().ne(value),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce a raw string value to the column's type. Uncoercible values
/// drop their condition rather than erroring.
fn column_value(
    column: &ColumnMeta,
    raw: &str,
    strategy: WhereStrategy,
    bound_index: usize,
) -> Option<Value> {
    match column.kind {
        ColumnKind::Uuid => uuid::Uuid::parse_str(raw).ok().map(Value::from),
        ColumnKind::Int => raw.parse::<i64>().ok().map(Value::from),
        ColumnKind::Float => raw.parse::<f64>().ok().map(Value::from),
        ColumnKind::Bool => parse_bool(raw).map(Value::from),
        ColumnKind::Date | ColumnKind::DateTime => date_value(raw, strategy, bound_index),
        ColumnKind::String | ColumnKind::Json => Some(Value::from(raw.to_string())),
    }
}

/// Date-only strings against date-typed columns get start-of-day or
/// end-of-day sentinel times so that `createdAt>2020-05-13` means "after
/// the last instant of that day" and `createdAt<` "before its first".
///
/// The boundary follows the effective operator after negation; since the
/// negation duals pair `>` with `<=` and `<` with `>=`, each pair shares
/// one boundary and the choice depends on the base strategy alone.
fn date_value(raw: &str, strategy: WhereStrategy, bound_index: usize) -> Option<Value> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Value::from(datetime));
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;

    let end_of_day = match strategy {
        WhereStrategy::GreaterThan | WhereStrategy::LessThanOrEqual => true,
        WhereStrategy::Between | WhereStrategy::BetweenStrict => bound_index == 1,
        _ => false,
    };
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)?
    };
    Some(Value::from(date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_registry_reuses_per_table_prop_pair() {
        let mut aliases = AliasRegistry::default();
        let (first, created_first) = aliases.get_or_insert("user", "role");
        let (second, created_second) = aliases.get_or_insert("user", "role");
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first, second);

        let (other, created_other) = aliases.get_or_insert("article", "author");
        assert!(created_other);
        assert_ne!(first, other);
    }

    #[test]
    fn date_only_values_get_day_boundaries() {
        let value = date_value("2020-05-13", WhereStrategy::GreaterThan, 0).unwrap();
        assert_eq!(
            value,
            Value::from(
                NaiveDate::from_ymd_opt(2020, 5, 13)
                    .unwrap()
                    .and_hms_opt(23, 59, 59)
                    .unwrap()
            )
        );

        let value = date_value("2020-05-13", WhereStrategy::LessThan, 0).unwrap();
        assert_eq!(
            value,
            Value::from(
                NaiveDate::from_ymd_opt(2020, 5, 13)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn full_timestamps_pass_through() {
        let value = date_value("2020-05-13T08:30:00", WhereStrategy::GreaterThan, 0).unwrap();
        assert_eq!(
            value,
            Value::from(
                NaiveDate::from_ymd_opt(2020, 5, 13)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap()
            )
        );
    }
}
