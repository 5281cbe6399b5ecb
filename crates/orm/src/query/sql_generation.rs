//! Query Builder SQL generation
//!
//! Statements are rendered for PostgreSQL: identifiers are double-quoted and
//! every value becomes a `$n` parameter. LIMIT and OFFSET are rendered as
//! literals since they are never caller strings.

use std::collections::HashMap;

use serde_json::Value;

use super::builder::QueryBuilder;
use super::joins::table_alias;
use super::ordering::OrderDirection;
use super::scopes::default_scope_predicates;
use super::types::*;
use crate::backends::CompiledStatement;
use crate::conditions::{ColumnRef, Operand, Operator, Predicate, SimilarityKind};
use crate::error::ModelResult;
use crate::model::{ColumnType, Entity};

/// Quote an identifier, doubling embedded quotes
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name part by part
pub(crate) fn quote_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Incremental statement writer tracking positional parameters
///
/// Parameters compared with a column of a declared alias are tagged with
/// that column's type so executors can bind them accordingly.
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    param_types: Vec<Option<ColumnType>>,
    column_types: HashMap<String, HashMap<String, ColumnType>>,
}

impl SqlWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the declared columns of `entity` known under `alias`
    pub(crate) fn declare(&mut self, alias: &str, entity: &Entity) -> &mut Self {
        let columns = self.column_types.entry(alias.to_string()).or_default();
        for column in entity.columns() {
            columns.insert(column.name.clone(), column.column_type);
        }
        self
    }

    fn column_type(&self, column: &ColumnRef) -> Option<ColumnType> {
        let alias = column.alias.as_deref().unwrap_or_default();
        self.column_types.get(alias)?.get(&column.name).copied()
    }

    pub(crate) fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Bind an untyped value and write its placeholder
    pub(crate) fn param(&mut self, value: Value) -> &mut Self {
        self.typed_param(value, None)
    }

    /// Bind a value destined for a column of `column_type`
    pub(crate) fn typed_param(&mut self, value: Value, column_type: Option<ColumnType>) -> &mut Self {
        self.params.push(value);
        self.param_types.push(column_type);
        let placeholder = format!("${}", self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    pub(crate) fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = quote_ident(name);
        self.sql.push_str(&quoted);
        self
    }

    pub(crate) fn column(&mut self, column: &ColumnRef) -> &mut Self {
        if let Some(alias) = &column.alias {
            self.ident(alias).push(".");
        }
        self.ident(&column.name)
    }

    /// Write `FROM`/`JOIN` table references, aliasing only when needed
    pub(crate) fn table(&mut self, table: &str, alias: &str) -> &mut Self {
        let quoted = quote_table(table);
        self.sql.push_str(&quoted);
        if table != alias {
            self.push(" AS ").ident(alias);
        }
        self
    }

    /// `(p1, p2, ...)` placeholder list
    pub(crate) fn param_list(&mut self, values: &[Value], column_type: Option<ColumnType>) -> &mut Self {
        self.push("(");
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            self.typed_param(value.clone(), column_type);
        }
        self.push(")")
    }

    /// Write predicates joined with AND; nothing is written for an empty list
    pub(crate) fn conjunction(&mut self, predicates: &[Predicate]) -> &mut Self {
        for (index, predicate) in predicates.iter().enumerate() {
            if index > 0 {
                self.push(" AND ");
            }
            self.predicate(predicate);
        }
        self
    }

    pub(crate) fn predicate(&mut self, predicate: &Predicate) -> &mut Self {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => self.comparison(column, *operator, operand),
            Predicate::Columns {
                left,
                operator,
                right,
            } => self
                .column(left)
                .push(&format!(" {} ", operator))
                .column(right),
            Predicate::Literal(true) => self.push("TRUE"),
            Predicate::Literal(false) => self.push("FALSE"),
            Predicate::All(parts) => self.group(parts, " AND ", "TRUE"),
            Predicate::Any(parts) => self.group(parts, " OR ", "FALSE"),
        }
    }

    fn group(&mut self, parts: &[Predicate], separator: &str, empty: &str) -> &mut Self {
        match parts {
            [] => self.push(empty),
            [single] => self.predicate(single),
            parts => {
                self.push("(");
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        self.push(separator);
                    }
                    self.predicate(part);
                }
                self.push(")")
            }
        }
    }

    fn comparison(&mut self, column: &ColumnRef, operator: Operator, operand: &Operand) -> &mut Self {
        let column_type = self.column_type(column);
        match (operator, operand) {
            (Operator::IsNull | Operator::IsNotNull, _) => {
                self.column(column).push(&format!(" {}", operator))
            }
            (Operator::In | Operator::NotIn, Operand::List(values)) => self
                .column(column)
                .push(&format!(" {} ", operator))
                .param_list(values, column_type),
            (Operator::Similar(kind), Operand::Score { text, min_score }) => {
                self.similarity(column, kind, text, *min_score, ">=")
            }
            (Operator::NotSimilar(kind), Operand::Score { text, min_score }) => {
                self.similarity(column, kind, text, *min_score, "<")
            }
            (operator, operand) => {
                self.column(column).push(&format!(" {} ", operator));
                match operand {
                    Operand::None => self.push("NULL"),
                    Operand::Value(value) => self.typed_param(value.clone(), column_type),
                    Operand::List(values) => self.param(Value::Array(values.clone())),
                    Operand::Score { text, .. } => self.param(Value::from(text.as_str())),
                }
            }
        }
    }

    fn similarity(
        &mut self,
        column: &ColumnRef,
        kind: SimilarityKind,
        text: &str,
        min_score: f64,
        comparison: &str,
    ) -> &mut Self {
        self.push(kind.function()).push("(");
        match kind {
            SimilarityKind::Similarity => {
                self.column(column).push(", ").param(Value::from(text));
            }
            // word similarity compares the search text against the column
            SimilarityKind::WordSimilarity | SimilarityKind::StrictWordSimilarity => {
                self.param(Value::from(text)).push(", ").column(column);
            }
        }
        self.push(&format!(") {} ", comparison)).param(Value::from(min_score))
    }

    pub(crate) fn finish(self) -> CompiledStatement {
        CompiledStatement::new(self.sql, self.params).with_param_types(self.param_types)
    }
}

/// Everything a SELECT over this builder needs, resolved once
pub(crate) struct Prepared {
    pub table: String,
    pub root_alias: String,
    pub joins: Vec<ResolvedJoin>,
    pub aliases: HashMap<String, String>,
    /// Default scopes of the root followed by the where entries
    pub filters: Vec<Predicate>,
}

impl QueryBuilder {
    /// Resolve joins, default scopes and where routing
    pub(crate) fn prepare(&self) -> ModelResult<Prepared> {
        let root = self.root_entity()?;
        let root_alias = table_alias(root.table()).to_string();
        let (joins, aliases) = self.resolve_joins()?;

        let mut filters =
            default_scope_predicates(root, &root_alias, &self.bypass, &self.context.passthrough)?;
        filters.extend(self.where_predicates(&root_alias, &aliases)?);

        Ok(Prepared {
            table: root.table().to_string(),
            root_alias,
            joins,
            aliases,
            filters,
        })
    }

    /// SELECT statement returning the root entity's rows
    pub fn to_statement(&self) -> ModelResult<CompiledStatement> {
        self.select_statement(&Projection::Records)
    }

    /// SQL text of [`QueryBuilder::to_statement`]
    pub fn to_sql(&self) -> ModelResult<String> {
        Ok(self.to_statement()?.sql)
    }

    /// SELECT statement with the given projection
    pub(crate) fn select_statement(&self, projection: &Projection) -> ModelResult<CompiledStatement> {
        let prepared = self.prepare()?;
        let mut writer = SqlWriter::new();
        for (alias, entity) in &prepared.aliases {
            writer.declare(alias, self.registry.entity(entity)?);
        }

        let windowed = self.limit.is_some() || self.offset.is_some();
        match projection {
            Projection::Aggregate(aggregate, column) if windowed => {
                // aggregate over the limited window, not the whole table
                let column = match column {
                    Some(column) => self.route_column(
                        &ColumnRef::parse(column),
                        &prepared.root_alias,
                        &prepared.aliases,
                    )?,
                    None => ColumnRef::qualified(
                        &prepared.root_alias,
                        self.root_entity()?.primary_key_column(),
                    ),
                };
                let outer = ColumnRef::qualified("limited", &column.name);
                writer.push("SELECT ");
                self.write_aggregate(&mut writer, *aggregate, &outer, &prepared.aliases, true)?;
                writer.push(" FROM (SELECT ");
                if self.distinct {
                    writer.push("DISTINCT ");
                }
                writer.column(&column);
                self.write_body(&mut writer, &prepared, true)?;
                writer.push(") AS ").ident("limited");
            }
            Projection::Aggregate(aggregate, column) => {
                let column = match column {
                    Some(column) => Some(self.route_column(
                        &ColumnRef::parse(column),
                        &prepared.root_alias,
                        &prepared.aliases,
                    )?),
                    None => None,
                };
                writer.push("SELECT ");
                match column {
                    Some(column) => self.write_aggregate(&mut writer, *aggregate, &column, &prepared.aliases, false)?,
                    None => {
                        let key = ColumnRef::qualified(
                            &prepared.root_alias,
                            self.root_entity()?.primary_key_column(),
                        );
                        self.write_aggregate(&mut writer, *aggregate, &key, &prepared.aliases, false)?
                    }
                }
                self.write_body(&mut writer, &prepared, false)?;
            }
            Projection::Exists => {
                writer.push("SELECT 1");
                self.write_body(&mut writer, &prepared, false)?;
                writer.push(" LIMIT 1");
            }
            Projection::Records => {
                writer.push("SELECT ");
                if self.distinct {
                    writer.push("DISTINCT ");
                }
                writer.ident(&prepared.root_alias).push(".*");
                self.write_body(&mut writer, &prepared, true)?;
            }
            Projection::Columns(columns) => {
                writer.push("SELECT ");
                if self.distinct {
                    writer.push("DISTINCT ");
                }
                for (index, column) in columns.iter().enumerate() {
                    if index > 0 {
                        writer.push(", ");
                    }
                    let routed = self.route_column(
                        &ColumnRef::parse(column),
                        &prepared.root_alias,
                        &prepared.aliases,
                    )?;
                    writer.column(&routed);
                }
                self.write_body(&mut writer, &prepared, true)?;
            }
        }

        Ok(writer.finish())
    }

    fn write_aggregate(
        &self,
        writer: &mut SqlWriter,
        aggregate: Aggregate,
        column: &ColumnRef,
        aliases: &HashMap<String, String>,
        windowed: bool,
    ) -> ModelResult<()> {
        match aggregate {
            Aggregate::Count if self.distinct && !windowed => {
                writer.push("COUNT(DISTINCT ").column(column).push(")");
            }
            Aggregate::Count => {
                writer.push("COUNT(").column(column).push(")");
            }
            Aggregate::Sum => {
                writer.push("SUM(").column(column).push(")");
                // SUM over bigint and numeric yields NUMERIC
                if self.sums_to_numeric(column, aliases) {
                    writer.push("::float8");
                }
            }
            other => {
                writer.push(&format!("{}(", other)).column(column).push(")");
            }
        }
        writer.push(" AS ").ident("aggregate");
        Ok(())
    }

    fn sums_to_numeric(&self, column: &ColumnRef, aliases: &HashMap<String, String>) -> bool {
        let entity = column
            .alias
            .as_ref()
            .and_then(|alias| aliases.get(alias))
            .and_then(|name| self.registry.entity(name).ok());
        !matches!(
            entity.and_then(|entity| entity.column_type(&column.name)),
            Some(ColumnType::SmallInt | ColumnType::Integer)
        )
    }

    /// FROM, JOIN, WHERE and optionally ORDER BY / LIMIT / OFFSET
    fn write_body(&self, writer: &mut SqlWriter, prepared: &Prepared, windowed: bool) -> ModelResult<()> {
        writer.push(" FROM ").table(&prepared.table, &prepared.root_alias);

        for join in &prepared.joins {
            writer
                .push(&format!(" {} ", join.join_type))
                .table(&join.table, &join.alias)
                .push(" ON ");
            if join.on.is_empty() {
                writer.push("TRUE");
            } else {
                writer.conjunction(&join.on);
            }
        }

        if !prepared.filters.is_empty() {
            writer.push(" WHERE ").conjunction(&prepared.filters);
        }

        if !windowed {
            return Ok(());
        }

        if !self.order.is_empty() {
            writer.push(" ORDER BY ");
            for (index, order) in self.order.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                let column = self.route_column(&order.column, &prepared.root_alias, &prepared.aliases)?;
                writer.column(&column).push(match order.direction {
                    OrderDirection::Asc => " ASC",
                    OrderDirection::Desc => " DESC",
                });
            }
        }
        if let Some(limit) = self.limit {
            writer.push(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            writer.push(&format!(" OFFSET {}", offset));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_table("public.users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_predicate_rendering() {
        let mut writer = SqlWriter::new();
        writer.predicate(&Predicate::Any(vec![
            Predicate::compare(
                ColumnRef::qualified("posts", "id"),
                Operator::In,
                Operand::List(vec![json!(1), json!(2)]),
            ),
            Predicate::compare(ColumnRef::qualified("posts", "deleted_at"), Operator::IsNull, Operand::None),
            Predicate::All(vec![]),
        ]));
        let statement = writer.finish();
        assert_eq!(
            statement.sql,
            "(\"posts\".\"id\" IN ($1, $2) OR \"posts\".\"deleted_at\" IS NULL OR TRUE)"
        );
        assert_eq!(statement.params, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_similarity_rendering() {
        let mut writer = SqlWriter::new();
        writer.predicate(&Predicate::compare(
            ColumnRef::new("title"),
            Operator::Similar(SimilarityKind::WordSimilarity),
            Operand::Score {
                text: "rust".to_string(),
                min_score: 0.5,
            },
        ));
        writer.push(" AND ");
        writer.predicate(&Predicate::compare(
            ColumnRef::new("title"),
            Operator::NotSimilar(SimilarityKind::Similarity),
            Operand::Score {
                text: "go".to_string(),
                min_score: 0.3,
            },
        ));
        let statement = writer.finish();
        assert_eq!(
            statement.sql,
            "word_similarity($1, \"title\") >= $2 AND similarity(\"title\", $3) < $4"
        );
        assert_eq!(statement.params, vec![json!("rust"), json!(0.5), json!("go"), json!(0.3)]);
    }

    #[test]
    fn test_declared_columns_type_their_parameters() {
        let posts = Entity::new("Post", "posts")
            .column("title", ColumnType::Text)
            .column("views", ColumnType::Integer);
        let mut writer = SqlWriter::new();
        writer.declare("posts", &posts);
        writer.predicate(&Predicate::All(vec![
            Predicate::compare(ColumnRef::qualified("posts", "title"), Operator::Equal, Operand::Value(json!("x"))),
            Predicate::compare(ColumnRef::qualified("posts", "views"), Operator::In, Operand::List(vec![json!(1)])),
            Predicate::compare(ColumnRef::qualified("drafts", "title"), Operator::Equal, Operand::Value(json!("y"))),
        ]));

        assert_eq!(
            writer.finish().param_types,
            vec![Some(ColumnType::Text), Some(ColumnType::Integer), None]
        );
    }

    #[test]
    fn test_empty_any_is_false() {
        let mut writer = SqlWriter::new();
        writer.predicate(&Predicate::Any(vec![]));
        assert_eq!(writer.finish().sql, "FALSE");
    }
}
