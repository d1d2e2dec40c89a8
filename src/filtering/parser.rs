//! Query-parameter key grammar:
//!
//! ```text
//! [<nestedConditionPrefix>:]<propertyPath>[;<strategyName>][<comparisonSymbol>][!]
//! ```
//!
//! A key that does not match the grammar is a no-op, never an error:
//! clients may send arbitrary extra query parameters safely. The grammar
//! is isolated here so nothing else in the engine touches raw key text.

use super::nested::{ConditionType, NestedToken};
use super::strategy::{ComparisonSymbol, WhereStrategy};

/// One resolved query condition, built fresh per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParam {
    /// Effective type at its nesting level (the last prefix token's type,
    /// AND when no prefix is given).
    pub cond_type: ConditionType,
    /// Parsed nested-condition prefix, outermost first. Empty for flat
    /// top-level conditions.
    pub nested_path: Vec<NestedToken>,
    /// Dot-delimited property path, unnormalized (bare relation names are
    /// normalized against entity metadata later).
    pub property_path: Vec<String>,
    /// Strategy requested by name or symbol; `None` falls back to the
    /// property's configured default.
    pub strategy: Option<WhereStrategy>,
    pub comparison_symbol: Option<ComparisonSymbol>,
    pub negated: bool,
    /// Comma-split raw values, IRI-like elements reduced to their id.
    pub values: Vec<String>,
}

impl FilterParam {
    /// Grouped conditions live in the nested tree; a lone bare `and`/`or`
    /// token keeps the condition at the top level with that type.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.nested_path.len() > 1
            || self
                .nested_path
                .first()
                .is_some_and(|token| token.identifier.is_some())
    }

    /// Joined property path, for diagnostics and allow-list checks.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.property_path.join(".")
    }
}

/// Parse one raw query pair. Returns `None` for keys that do not match
/// the grammar (silently ignored by the engine).
#[must_use]
pub fn parse_query_param(key: &str, value: &str) -> Option<FilterParam> {
    let (prefix, key_rest) = match key.split_once(':') {
        Some((prefix, rest)) => (Some(prefix), rest),
        None => (None, key),
    };

    let nested_path = match prefix {
        Some(prefix) => tokenize_prefix(prefix)?,
        None => Vec::new(),
    };
    let cond_type = nested_path
        .last()
        .map(|token| token.cond_type)
        .unwrap_or_default();

    let (key_rest, negated) = match key_rest.strip_suffix('!') {
        Some(rest) => (rest, true),
        None => (key_rest, false),
    };
    let (key_rest, comparison_symbol) = ComparisonSymbol::strip_suffix(key_rest);

    let (path_part, strategy) = match key_rest.split_once(';') {
        // A strategy segment that names no known strategy makes the whole
        // key fall out of the grammar.
        Some((path, name)) => (path, Some(WhereStrategy::from_query_name(name)?)),
        None => (key_rest, None),
    };

    let property_path: Vec<String> = path_part.split('.').map(str::to_string).collect();
    if property_path.is_empty() || !property_path.iter().all(|seg| is_identifier(seg)) {
        return None;
    }

    let strategy = strategy.or_else(|| comparison_symbol.map(ComparisonSymbol::strategy));
    let values = value
        .split(',')
        .map(|element| format_iri_to_id(element).to_string())
        .collect();

    Some(FilterParam {
        cond_type,
        nested_path,
        property_path,
        strategy,
        comparison_symbol,
        negated,
        values,
    })
}

/// Tokenize a nested-condition prefix such as `or(mailCondition)and(x)`.
/// A parenthesized identifier without a leading connective is implicitly
/// AND-ed.
fn tokenize_prefix(prefix: &str) -> Option<Vec<NestedToken>> {
    let mut rest = prefix;
    let mut tokens = Vec::new();
    while !rest.is_empty() {
        let cond_type = if let Some(after) = rest.strip_prefix("and") {
            rest = after;
            ConditionType::And
        } else if let Some(after) = rest.strip_prefix("or") {
            rest = after;
            ConditionType::Or
        } else if rest.starts_with('(') {
            ConditionType::And
        } else {
            return None;
        };

        let identifier = if let Some(after_open) = rest.strip_prefix('(') {
            let close = after_open.find(')')?;
            let identifier = &after_open[..close];
            if !is_identifier(identifier) {
                return None;
            }
            rest = &after_open[close + 1..];
            Some(identifier.to_string())
        } else {
            None
        };

        tokens.push(NestedToken {
            cond_type,
            identifier,
        });
    }
    if tokens.is_empty() {
        return None;
    }
    Some(tokens)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reduce an IRI-like value (`/users/123`) to its trailing identifier
/// when that identifier is numeric or a UUID; other values pass through.
fn format_iri_to_id(value: &str) -> &str {
    if !value.starts_with('/') {
        return value;
    }
    match value.rsplit_once('/') {
        Some((_, id))
            if !id.is_empty()
                && (id.chars().all(|c| c.is_ascii_digit()) || uuid::Uuid::parse_str(id).is_ok()) =>
        {
            id
        }
        _ => value,
    }
}
