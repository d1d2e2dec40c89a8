//! The search/filter engine: query-key grammar, AND/OR nesting, relation
//! traversal and SQL emission.

pub mod apply;
pub mod nested;
pub mod parser;
pub mod strategy;

pub use apply::{build_query_filter, AliasRegistry, JoinSpec, OrderSpec, QueryFilter};
pub use nested::{ConditionType, NestedConditionTree, NestedToken};
pub use parser::{parse_query_param, FilterParam};
pub use strategy::{ComparisonSymbol, WhereStrategy};
