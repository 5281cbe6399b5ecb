//! Operator statements for where clauses
//!
//! ```ignore
//! WhereClause::new()
//!     .with("views", ops::greater_than(100))
//!     .with("title", ops::not::ilike("%draft%"))
//!     .with("body", ops::similarity_with_score("rust", 0.5)?);
//! ```

use serde_json::Value;

use super::types::{OpStatement, Operand, Operator, SimilarityKind};
use crate::error::{ModelError, ModelResult};

/// Default pg_trgm threshold
pub const DEFAULT_SIMILARITY_SCORE: f64 = 0.3;

fn statement(operator: Operator, operand: Operand) -> OpStatement {
    OpStatement {
        operator,
        operand,
        negated: false,
    }
}

fn scored(kind: SimilarityKind, text: &str, min_score: f64) -> ModelResult<OpStatement> {
    if !(0.0..=1.0).contains(&min_score) || min_score.is_nan() {
        return Err(ModelError::InvalidScore { score: min_score });
    }
    Ok(statement(
        Operator::Similar(kind),
        Operand::Score {
            text: text.to_string(),
            min_score,
        },
    ))
}

pub fn equal<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::Equal, Operand::Value(value.into()))
}

pub fn greater_than<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::GreaterThan, Operand::Value(value.into()))
}

pub fn greater_than_or_equal<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::GreaterThanOrEqual, Operand::Value(value.into()))
}

pub fn less_than<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::LessThan, Operand::Value(value.into()))
}

pub fn less_than_or_equal<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::LessThanOrEqual, Operand::Value(value.into()))
}

pub fn like(pattern: &str) -> OpStatement {
    statement(Operator::Like, Operand::Value(Value::from(pattern)))
}

pub fn ilike(pattern: &str) -> OpStatement {
    statement(Operator::ILike, Operand::Value(Value::from(pattern)))
}

pub fn regex(pattern: &str) -> OpStatement {
    statement(Operator::Regex, Operand::Value(Value::from(pattern)))
}

pub fn in_list<I, V>(values: I) -> OpStatement
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    statement(
        Operator::In,
        Operand::List(values.into_iter().map(Into::into).collect()),
    )
}

pub fn contains<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::Contains, Operand::Value(value.into()))
}

pub fn contained_by<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::ContainedBy, Operand::Value(value.into()))
}

pub fn overlaps<V: Into<Value>>(value: V) -> OpStatement {
    statement(Operator::Overlaps, Operand::Value(value.into()))
}

/// Trigram similarity at the default threshold
pub fn similarity(text: &str) -> OpStatement {
    statement(
        Operator::Similar(SimilarityKind::Similarity),
        Operand::Score {
            text: text.to_string(),
            min_score: DEFAULT_SIMILARITY_SCORE,
        },
    )
}

pub fn similarity_with_score(text: &str, min_score: f64) -> ModelResult<OpStatement> {
    scored(SimilarityKind::Similarity, text, min_score)
}

pub fn word_similarity(text: &str) -> OpStatement {
    statement(
        Operator::Similar(SimilarityKind::WordSimilarity),
        Operand::Score {
            text: text.to_string(),
            min_score: DEFAULT_SIMILARITY_SCORE,
        },
    )
}

pub fn word_similarity_with_score(text: &str, min_score: f64) -> ModelResult<OpStatement> {
    scored(SimilarityKind::WordSimilarity, text, min_score)
}

pub fn strict_word_similarity(text: &str) -> OpStatement {
    statement(
        Operator::Similar(SimilarityKind::StrictWordSimilarity),
        Operand::Score {
            text: text.to_string(),
            min_score: DEFAULT_SIMILARITY_SCORE,
        },
    )
}

pub fn strict_word_similarity_with_score(text: &str, min_score: f64) -> ModelResult<OpStatement> {
    scored(SimilarityKind::StrictWordSimilarity, text, min_score)
}

/// Comparison written as a raw operator string, e.g. `expression(">=", 3)`
pub fn expression<V: Into<Value>>(operator: &str, value: V) -> ModelResult<OpStatement> {
    let operator = Operator::parse(operator)?;
    let value = value.into();
    let operand = match (operator, value) {
        (Operator::In | Operator::NotIn, Value::Array(values)) => Operand::List(values),
        (Operator::In | Operator::NotIn, other) => Operand::List(vec![other]),
        (_, value) => Operand::Value(value),
    };
    Ok(statement(operator, operand))
}

/// Negated operator statements
pub mod not {
    use super::*;

    pub fn equal<V: Into<Value>>(value: V) -> OpStatement {
        super::equal(value).negate()
    }

    pub fn greater_than<V: Into<Value>>(value: V) -> OpStatement {
        super::greater_than(value).negate()
    }

    pub fn less_than<V: Into<Value>>(value: V) -> OpStatement {
        super::less_than(value).negate()
    }

    pub fn like(pattern: &str) -> OpStatement {
        super::like(pattern).negate()
    }

    pub fn ilike(pattern: &str) -> OpStatement {
        super::ilike(pattern).negate()
    }

    pub fn regex(pattern: &str) -> OpStatement {
        super::regex(pattern).negate()
    }

    pub fn in_list<I, V>(values: I) -> OpStatement
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        super::in_list(values).negate()
    }

    pub fn similarity(text: &str) -> OpStatement {
        super::similarity(text).negate()
    }

    pub fn similarity_with_score(text: &str, min_score: f64) -> ModelResult<OpStatement> {
        Ok(super::similarity_with_score(text, min_score)?.negate())
    }
}
