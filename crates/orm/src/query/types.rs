//! Query Builder Types - join requests, resolved joins and projections

use std::fmt;

use crate::conditions::{Predicate, WhereClause};

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// One edge of the requested join tree
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    /// Alias the edge is followed from; `None` for the root
    pub parent: Option<String>,
    /// Relationship name on the parent's entity
    pub relationship: String,
    pub alias: String,
    pub join_type: JoinType,
    /// Call-site conditions, ANDed
    pub conditions: Vec<WhereClause>,
}

/// A join ready to render
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJoin {
    pub join_type: JoinType,
    pub table: String,
    pub alias: String,
    pub entity: String,
    pub on: Vec<Predicate>,
}

/// A where entry as recorded by the builder
#[derive(Debug, Clone, PartialEq)]
pub enum WhereEntry {
    /// Every entry of the clause, each negated when `negate` is set
    All { clause: WhereClause, negate: bool },
    /// At least one of the clauses
    Any(Vec<WhereClause>),
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Max,
    Min,
    Sum,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count => write!(f, "COUNT"),
            Aggregate::Max => write!(f, "MAX"),
            Aggregate::Min => write!(f, "MIN"),
            Aggregate::Sum => write!(f, "SUM"),
        }
    }
}

/// What a SELECT returns
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Every column of the root entity
    Records,
    /// The listed columns, routed like where keys
    Columns(Vec<String>),
    /// A single aggregate over a column (the primary key when `None`)
    Aggregate(Aggregate, Option<String>),
    /// `SELECT 1`
    Exists,
}
