//! Condition Types - structured where input and compiled predicate nodes

use std::fmt;

use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// Comparison operators understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Regex,
    NotRegex,
    /// Array/JSON containment (`@>`)
    Contains,
    /// Array/JSON containment (`<@`)
    ContainedBy,
    /// Array overlap (`&&`)
    Overlaps,
    /// Trigram similarity at or above a threshold
    Similar(SimilarityKind),
    /// Trigram similarity below a threshold
    NotSimilar(SimilarityKind),
}

/// pg_trgm similarity functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimilarityKind {
    Similarity,
    WordSimilarity,
    StrictWordSimilarity,
}

impl SimilarityKind {
    /// SQL function name
    pub fn function(self) -> &'static str {
        match self {
            SimilarityKind::Similarity => "similarity",
            SimilarityKind::WordSimilarity => "word_similarity",
            SimilarityKind::StrictWordSimilarity => "strict_word_similarity",
        }
    }
}

impl Operator {
    /// Inverse through the fixed inversion table. Containment and overlap
    /// operators have no inverse.
    pub fn inverse(self) -> Option<Operator> {
        use Operator::*;
        let inverse = match self {
            Equal => NotEqual,
            NotEqual => Equal,
            LessThan => GreaterThanOrEqual,
            GreaterThanOrEqual => LessThan,
            LessThanOrEqual => GreaterThan,
            GreaterThan => LessThanOrEqual,
            Like => NotLike,
            NotLike => Like,
            ILike => NotILike,
            NotILike => ILike,
            In => NotIn,
            NotIn => In,
            IsNull => IsNotNull,
            IsNotNull => IsNull,
            Regex => NotRegex,
            NotRegex => Regex,
            Similar(kind) => NotSimilar(kind),
            NotSimilar(kind) => Similar(kind),
            Contains | ContainedBy | Overlaps => return None,
        };
        Some(inverse)
    }

    /// Inverse or an `UnsupportedNegation` error
    pub fn try_inverse(self) -> ModelResult<Operator> {
        self.inverse().ok_or_else(|| ModelError::UnsupportedNegation {
            operator: self.to_string(),
        })
    }

    /// Parse an operator written the way it appears in SQL
    pub fn parse(raw: &str) -> ModelResult<Operator> {
        let operator = match raw.trim().to_ascii_lowercase().as_str() {
            "=" => Operator::Equal,
            "!=" | "<>" => Operator::NotEqual,
            "<" => Operator::LessThan,
            "<=" => Operator::LessThanOrEqual,
            ">" => Operator::GreaterThan,
            ">=" => Operator::GreaterThanOrEqual,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" => Operator::NotILike,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "~" => Operator::Regex,
            "!~" => Operator::NotRegex,
            "@>" => Operator::Contains,
            "<@" => Operator::ContainedBy,
            "&&" => Operator::Overlaps,
            other => {
                return Err(ModelError::Query(format!("Unsupported operator '{}'", other)));
            }
        };
        Ok(operator)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Equal => write!(f, "="),
            Operator::NotEqual => write!(f, "!="),
            Operator::LessThan => write!(f, "<"),
            Operator::LessThanOrEqual => write!(f, "<="),
            Operator::GreaterThan => write!(f, ">"),
            Operator::GreaterThanOrEqual => write!(f, ">="),
            Operator::Like => write!(f, "LIKE"),
            Operator::NotLike => write!(f, "NOT LIKE"),
            Operator::ILike => write!(f, "ILIKE"),
            Operator::NotILike => write!(f, "NOT ILIKE"),
            Operator::In => write!(f, "IN"),
            Operator::NotIn => write!(f, "NOT IN"),
            Operator::IsNull => write!(f, "IS NULL"),
            Operator::IsNotNull => write!(f, "IS NOT NULL"),
            Operator::Regex => write!(f, "~"),
            Operator::NotRegex => write!(f, "!~"),
            Operator::Contains => write!(f, "@>"),
            Operator::ContainedBy => write!(f, "<@"),
            Operator::Overlaps => write!(f, "&&"),
            Operator::Similar(kind) => write!(f, "{} >=", kind.function()),
            Operator::NotSimilar(kind) => write!(f, "{} <", kind.function()),
        }
    }
}

/// Right-hand side of a compiled comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (`IS NULL`)
    None,
    Value(Value),
    List(Vec<Value>),
    /// Similarity search text and minimum score
    Score { text: String, min_score: f64 },
}

/// Closed or half-open range; `exclude_end` makes the upper bound strict
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub exclude_end: bool,
}

impl Range {
    /// `start <= x <= end`
    pub fn between<S: Into<Value>, E: Into<Value>>(start: S, end: E) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            exclude_end: false,
        }
    }

    /// `start <= x < end`
    pub fn exclusive<S: Into<Value>, E: Into<Value>>(start: S, end: E) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            exclude_end: true,
        }
    }

    /// `start <= x`
    pub fn starting_at<S: Into<Value>>(start: S) -> Self {
        Self {
            start: Some(start.into()),
            end: None,
            exclude_end: false,
        }
    }

    /// `x <= end`
    pub fn ending_at<E: Into<Value>>(end: E) -> Self {
        Self {
            start: None,
            end: Some(end.into()),
            exclude_end: false,
        }
    }

    /// `x < end`
    pub fn ending_before<E: Into<Value>>(end: E) -> Self {
        Self {
            start: None,
            end: Some(end.into()),
            exclude_end: true,
        }
    }
}

/// An operator applied to a value, built through [`crate::conditions::ops`]
#[derive(Debug, Clone, PartialEq)]
pub struct OpStatement {
    pub operator: Operator,
    pub operand: Operand,
    pub negated: bool,
}

impl OpStatement {
    /// Flip the statement's own negation flag
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Right-hand side of one where entry
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    /// Equality against a scalar (`null` compiles to `IS NULL`, arrays to `IN`)
    Value(Value),
    Null,
    List(Vec<Value>),
    Range(Range),
    Op(OpStatement),
    /// Value taken from the caller's passthrough bag at compile time
    Passthrough(String),
    /// Conditions scoped to the joined alias named by the key
    Nested(WhereClause),
}

impl WhereValue {
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        WhereValue::List(values.into_iter().map(Into::into).collect())
    }

    pub fn passthrough(key: &str) -> Self {
        WhereValue::Passthrough(key.to_string())
    }
}

impl From<Value> for WhereValue {
    fn from(value: Value) -> Self {
        WhereValue::Value(value)
    }
}

impl From<&str> for WhereValue {
    fn from(value: &str) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<String> for WhereValue {
    fn from(value: String) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<i32> for WhereValue {
    fn from(value: i32) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<i64> for WhereValue {
    fn from(value: i64) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<f64> for WhereValue {
    fn from(value: f64) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<bool> for WhereValue {
    fn from(value: bool) -> Self {
        WhereValue::Value(Value::from(value))
    }
}

impl From<Range> for WhereValue {
    fn from(range: Range) -> Self {
        WhereValue::Range(range)
    }
}

impl From<OpStatement> for WhereValue {
    fn from(statement: OpStatement) -> Self {
        WhereValue::Op(statement)
    }
}

impl From<WhereClause> for WhereValue {
    fn from(clause: WhereClause) -> Self {
        WhereValue::Nested(clause)
    }
}

/// Ordered mapping from column name to condition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    entries: Vec<(String, WhereValue)>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; a later entry for the same column is ANDed with the earlier one
    pub fn with<V: Into<WhereValue>>(mut self, column: &str, value: V) -> Self {
        self.entries.push((column.to_string(), value.into()));
        self
    }

    pub fn push<V: Into<WhereValue>>(&mut self, column: &str, value: V) {
        self.entries.push((column.to_string(), value.into()));
    }

    /// AND another clause onto this one
    pub fn merge(mut self, other: WhereClause) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn entries(&self) -> &[(String, WhereValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Column reference, optionally qualified by a table alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: &str) -> Self {
        Self {
            alias: None,
            name: name.to_string(),
        }
    }

    pub fn qualified(alias: &str, name: &str) -> Self {
        Self {
            alias: Some(alias.to_string()),
            name: name.to_string(),
        }
    }

    /// Split `alias.column` keys; bare keys stay unqualified
    pub fn parse(key: &str) -> Self {
        match key.rsplit_once('.') {
            Some((alias, name)) if !alias.is_empty() && !name.is_empty() => {
                Self::qualified(alias, name)
            }
            _ => Self::new(key),
        }
    }

    /// Qualify with `alias` unless already qualified
    pub fn or_alias(mut self, alias: &str) -> Self {
        if self.alias.is_none() {
            self.alias = Some(alias.to_string());
        }
        self
    }
}

/// Dialect-neutral predicate node
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        operator: Operator,
        operand: Operand,
    },
    /// Column-to-column comparison, used for join keys and self-referential conditions
    Columns {
        left: ColumnRef,
        operator: Operator,
        right: ColumnRef,
    },
    Literal(bool),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(column: ColumnRef, operator: Operator, operand: Operand) -> Self {
        Predicate::Compare {
            column,
            operator,
            operand,
        }
    }

    pub fn columns_equal(left: ColumnRef, right: ColumnRef) -> Self {
        Predicate::Columns {
            left,
            operator: Operator::Equal,
            right,
        }
    }

    /// Logical inverse, flipping operators through the inversion table
    pub fn negate(&self) -> ModelResult<Predicate> {
        let negated = match self {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => Predicate::Compare {
                column: column.clone(),
                operator: operator.try_inverse()?,
                operand: operand.clone(),
            },
            Predicate::Columns {
                left,
                operator,
                right,
            } => Predicate::Columns {
                left: left.clone(),
                operator: operator.try_inverse()?,
                right: right.clone(),
            },
            Predicate::Literal(value) => Predicate::Literal(!value),
            Predicate::All(parts) => Predicate::Any(
                parts
                    .iter()
                    .map(Predicate::negate)
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
            Predicate::Any(parts) => Predicate::All(
                parts
                    .iter()
                    .map(Predicate::negate)
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
        };
        Ok(negated)
    }

    /// Qualify every unqualified column with `alias`
    pub fn with_default_alias(self, alias: &str) -> Predicate {
        match self {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => Predicate::Compare {
                column: column.or_alias(alias),
                operator,
                operand,
            },
            Predicate::Columns {
                left,
                operator,
                right,
            } => Predicate::Columns {
                left: left.or_alias(alias),
                operator,
                right: right.or_alias(alias),
            },
            Predicate::Literal(value) => Predicate::Literal(value),
            Predicate::All(parts) => Predicate::All(
                parts
                    .into_iter()
                    .map(|part| part.with_default_alias(alias))
                    .collect(),
            ),
            Predicate::Any(parts) => Predicate::Any(
                parts
                    .into_iter()
                    .map(|part| part.with_default_alias(alias))
                    .collect(),
            ),
        }
    }
}
