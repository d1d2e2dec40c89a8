//! Comparison strategies and their operator semantics, including the
//! negation duals and the comparison-symbol shortcuts.

use std::fmt;

/// A named comparison mode selecting the SQL operator for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhereStrategy {
    Exact,
    In,
    Is,
    Exists,
    Contains,
    StartsWith,
    EndsWith,
    Between,
    BetweenStrict,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl WhereStrategy {
    /// Parse the `;strategyName` segment of a filter key. Both camel
    /// (`startsWith`) and screaming-snake (`STARTS_WITH`) spellings are
    /// accepted.
    #[must_use]
    pub fn from_query_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "exact" => Some(Self::Exact),
            "in" => Some(Self::In),
            "is" => Some(Self::Is),
            "exists" => Some(Self::Exists),
            "contains" => Some(Self::Contains),
            "startswith" => Some(Self::StartsWith),
            "endswith" => Some(Self::EndsWith),
            "between" => Some(Self::Between),
            "betweenstrict" => Some(Self::BetweenStrict),
            "lessthan" => Some(Self::LessThan),
            "lessthanorequal" => Some(Self::LessThanOrEqual),
            "greaterthan" => Some(Self::GreaterThan),
            "greaterthanorequal" => Some(Self::GreaterThanOrEqual),
            _ => None,
        }
    }

    /// Whether the strategy consumes its value list as a whole rather than
    /// fanning array elements out into separate sub-conditions.
    #[must_use]
    pub fn takes_value_list(self) -> bool {
        matches!(self, Self::In | Self::Between | Self::BetweenStrict)
    }
}

impl fmt::Display for WhereStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::In => "in",
            Self::Is => "is",
            Self::Exists => "exists",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Between => "between",
            Self::BetweenStrict => "betweenStrict",
            Self::LessThan => "lessThan",
            Self::LessThanOrEqual => "lessThanOrEqual",
            Self::GreaterThan => "greaterThan",
            Self::GreaterThanOrEqual => "greaterThanOrEqual",
        };
        f.write_str(name)
    }
}

/// Comparison-symbol shortcut at the end of a filter key, used when no
/// strategy name is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonSymbol {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    BetweenStrict,
    Between,
}

impl ComparisonSymbol {
    /// Strip a trailing comparison symbol off a key fragment. Two-char
    /// symbols are checked first so `<|` never parses as `<`.
    #[must_use]
    pub fn strip_suffix(fragment: &str) -> (&str, Option<Self>) {
        for (symbol, parsed) in [
            ("<|", Self::LessThanOrEqual),
            (">|", Self::GreaterThanOrEqual),
            ("<>", Self::BetweenStrict),
            ("><", Self::Between),
            ("<", Self::LessThan),
            (">", Self::GreaterThan),
        ] {
            if let Some(rest) = fragment.strip_suffix(symbol) {
                return (rest, Some(parsed));
            }
        }
        (fragment, None)
    }

    #[must_use]
    pub fn strategy(self) -> WhereStrategy {
        match self {
            Self::LessThan => WhereStrategy::LessThan,
            Self::LessThanOrEqual => WhereStrategy::LessThanOrEqual,
            Self::GreaterThan => WhereStrategy::GreaterThan,
            Self::GreaterThanOrEqual => WhereStrategy::GreaterThanOrEqual,
            Self::BetweenStrict => WhereStrategy::BetweenStrict,
            Self::Between => WhereStrategy::Between,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<|",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">|",
            Self::BetweenStrict => "<>",
            Self::Between => "><",
        }
    }
}
