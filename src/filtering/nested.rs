//! AND/OR condition nesting with named groups.
//!
//! Raw filter params split into "flat" conditions (top level) and
//! "nested" conditions grouped under an AND/OR path such as
//! `or(mailCondition)and(x)`. The tree is rebuilt per request and
//! discarded afterwards.

use std::collections::BTreeMap;

use super::parser::FilterParam;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionType {
    #[default]
    And,
    Or,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// One token of a nested-condition prefix: an `and`/`or` connective with
/// an optional named group identifier. A bare parenthesized identifier is
/// an implicit AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedToken {
    pub cond_type: ConditionType,
    pub identifier: Option<String>,
}

/// Recursive grouping of filter params, keyed by group identifier (or the
/// connective name for anonymous groups). Several keys referencing the
/// same identifier accumulate into one bracketed sub-clause.
#[derive(Debug, Default)]
pub struct NestedConditionTree {
    pub cond_type: ConditionType,
    pub params: Vec<FilterParam>,
    pub children: BTreeMap<String, NestedConditionTree>,
}

impl NestedConditionTree {
    pub fn insert(&mut self, param: FilterParam) {
        let mut node = self;
        for token in &param.nested_path {
            let key = token
                .identifier
                .clone()
                .unwrap_or_else(|| token.cond_type.as_str().to_string());
            let cond_type = token.cond_type;
            node = node.children.entry(key).or_insert_with(|| Self {
                cond_type,
                ..Self::default()
            });
        }
        node.params.push(param);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.children.is_empty()
    }
}

/// Partition parsed params into flat (top-level) conditions and the
/// nested-condition tree.
#[must_use]
pub fn split_filters(params: Vec<FilterParam>) -> (Vec<FilterParam>, NestedConditionTree) {
    let mut flat = Vec::new();
    let mut tree = NestedConditionTree::default();
    for param in params {
        if param.is_nested() {
            tree.insert(param);
        } else {
            flat.push(param);
        }
    }
    (flat, tree)
}

/// Stable sort on condition type, AND before OR. Query builders that fold
/// a condition list left-to-right treat the first entry as a plain WHERE;
/// an OR iterated first would silently lose its type, so ANDs must come
/// first while preserving relative order within each type.
pub fn sort_by_condition_type<T>(conditions: &mut [(ConditionType, T)]) {
    conditions.sort_by_key(|(cond_type, _)| *cond_type);
}
