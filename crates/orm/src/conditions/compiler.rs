//! Where/Condition Compiler - turns a [`WhereClause`] into predicate nodes

use serde_json::Value;

use super::types::*;
use crate::error::{ModelError, ModelResult};
use crate::transaction::Passthrough;

/// Options for a single compile call
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions<'a> {
    /// Invert every entry through the operator inversion table
    pub negate: bool,
    /// Values for `WhereValue::Passthrough` entries
    pub passthrough: Option<&'a Passthrough>,
}

impl<'a> CompileOptions<'a> {
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn with_passthrough(mut self, passthrough: &'a Passthrough) -> Self {
        self.passthrough = Some(passthrough);
        self
    }
}

/// Compile a clause into predicates. Entries are ANDed; with `negate` each
/// entry is inverted individually.
pub fn compile(clause: &WhereClause, options: &CompileOptions<'_>) -> ModelResult<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(clause.len());

    for (key, value) in clause.entries() {
        if let WhereValue::Nested(nested) = value {
            for predicate in compile(nested, options)? {
                predicates.push(predicate.with_default_alias(key));
            }
            continue;
        }

        let predicate = compile_entry(ColumnRef::parse(key), value, options)?;
        predicates.push(if options.negate {
            predicate.negate()?
        } else {
            predicate
        });
    }

    Ok(predicates)
}

fn compile_entry(
    column: ColumnRef,
    value: &WhereValue,
    options: &CompileOptions<'_>,
) -> ModelResult<Predicate> {
    let predicate = match value {
        WhereValue::Value(value) => compile_scalar(column, value.clone()),
        WhereValue::Null => Predicate::compare(column, Operator::IsNull, Operand::None),
        WhereValue::List(values) => compile_list(column, values.clone()),
        WhereValue::Range(range) => compile_range(column, range),
        WhereValue::Op(statement) => {
            let predicate = match (&statement.operator, &statement.operand) {
                (Operator::In, Operand::List(values)) => compile_list(column, values.clone()),
                (Operator::NotIn, Operand::List(values)) => compile_list(column, values.clone()).negate()?,
                _ => Predicate::compare(column, statement.operator, statement.operand.clone()),
            };
            if statement.negated {
                predicate.negate()?
            } else {
                predicate
            }
        }
        WhereValue::Passthrough(key) => {
            let value = options
                .passthrough
                .and_then(|bag| bag.get(key))
                .ok_or_else(|| ModelError::MissingPassthrough(key.clone()))?;
            compile_scalar(column, value.clone())
        }
        WhereValue::Nested(_) => {
            return Err(ModelError::Query(format!(
                "nested conditions under '{}' must be routed to a join alias",
                column.name
            )));
        }
    };
    Ok(predicate)
}

fn compile_scalar(column: ColumnRef, value: Value) -> Predicate {
    match value {
        Value::Null => Predicate::compare(column, Operator::IsNull, Operand::None),
        Value::Array(values) => compile_list(column, values),
        value => Predicate::compare(column, Operator::Equal, Operand::Value(value)),
    }
}

fn compile_list(column: ColumnRef, values: Vec<Value>) -> Predicate {
    if values.is_empty() {
        // nothing is IN an empty set
        return Predicate::Literal(false);
    }
    Predicate::compare(column, Operator::In, Operand::List(values))
}

fn compile_range(column: ColumnRef, range: &Range) -> Predicate {
    let lower = range.start.clone().map(|start| {
        Predicate::compare(column.clone(), Operator::GreaterThanOrEqual, Operand::Value(start))
    });
    let upper = range.end.clone().map(|end| {
        let operator = if range.exclude_end {
            Operator::LessThan
        } else {
            Operator::LessThanOrEqual
        };
        Predicate::compare(column.clone(), operator, Operand::Value(end))
    });

    match (lower, upper) {
        (Some(lower), Some(upper)) => Predicate::All(vec![lower, upper]),
        (Some(bound), None) | (None, Some(bound)) => bound,
        (None, None) => Predicate::Literal(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ops;
    use serde_json::json;

    fn col(name: &str) -> ColumnRef {
        ColumnRef::new(name)
    }

    #[test]
    fn test_scalar_null_and_list() {
        let clause = WhereClause::new()
            .with("title", "hello")
            .with("deleted_at", WhereValue::Null)
            .with("id", WhereValue::list([1, 2]));

        let predicates = compile(&clause, &CompileOptions::default()).unwrap();
        assert_eq!(
            predicates,
            vec![
                Predicate::compare(col("title"), Operator::Equal, Operand::Value(json!("hello"))),
                Predicate::compare(col("deleted_at"), Operator::IsNull, Operand::None),
                Predicate::compare(col("id"), Operator::In, Operand::List(vec![json!(1), json!(2)])),
            ]
        );
    }

    #[test]
    fn test_negation_flips_each_entry() {
        let clause = WhereClause::new()
            .with("title", "hello")
            .with("deleted_at", WhereValue::Null)
            .with("id", WhereValue::list([1]));

        let predicates = compile(&clause, &CompileOptions::default().negated()).unwrap();
        assert_eq!(
            predicates,
            vec![
                Predicate::compare(col("title"), Operator::NotEqual, Operand::Value(json!("hello"))),
                Predicate::compare(col("deleted_at"), Operator::IsNotNull, Operand::None),
                Predicate::compare(col("id"), Operator::NotIn, Operand::List(vec![json!(1)])),
            ]
        );
    }

    #[test]
    fn test_double_negation_is_identity() {
        let clause = WhereClause::new()
            .with("views", Range::exclusive(10, 20))
            .with("title", ops::like("%rust%"))
            .with("body", ops::similarity("borrow"))
            .with("id", WhereValue::list(Vec::<i64>::new()))
            .with("score", ops::not::greater_than(3));

        let plain = compile(&clause, &CompileOptions::default()).unwrap();
        let negated = compile(&clause, &CompileOptions::default().negated()).unwrap();
        let restored: Vec<Predicate> = negated.iter().map(|p| p.negate().unwrap()).collect();

        assert_eq!(restored, plain);
        assert_ne!(negated, plain);
    }

    #[test]
    fn test_statement_negation_composes_with_outer_negation() {
        let clause = WhereClause::new().with("title", ops::not::equal("draft"));

        let plain = compile(&clause, &CompileOptions::default()).unwrap();
        assert_eq!(
            plain,
            vec![Predicate::compare(col("title"), Operator::NotEqual, Operand::Value(json!("draft")))]
        );

        let negated = compile(&clause, &CompileOptions::default().negated()).unwrap();
        assert_eq!(
            negated,
            vec![Predicate::compare(col("title"), Operator::Equal, Operand::Value(json!("draft")))]
        );
    }

    #[test]
    fn test_ranges() {
        let closed = compile(
            &WhereClause::new().with("age", Range::between(18, 65)),
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(
            closed,
            vec![Predicate::All(vec![
                Predicate::compare(col("age"), Operator::GreaterThanOrEqual, Operand::Value(json!(18))),
                Predicate::compare(col("age"), Operator::LessThanOrEqual, Operand::Value(json!(65))),
            ])]
        );

        let half_open = compile(
            &WhereClause::new().with("age", Range::ending_before(18)),
            &CompileOptions::default().negated(),
        )
        .unwrap();
        assert_eq!(
            half_open,
            vec![Predicate::compare(col("age"), Operator::GreaterThanOrEqual, Operand::Value(json!(18)))]
        );

        let negated_closed = compile(
            &WhereClause::new().with("age", Range::exclusive(18, 65)),
            &CompileOptions::default().negated(),
        )
        .unwrap();
        assert_eq!(
            negated_closed,
            vec![Predicate::Any(vec![
                Predicate::compare(col("age"), Operator::LessThan, Operand::Value(json!(18))),
                Predicate::compare(col("age"), Operator::GreaterThanOrEqual, Operand::Value(json!(65))),
            ])]
        );
    }

    #[test]
    fn test_empty_list_is_constant() {
        let clause = WhereClause::new().with("id", WhereValue::list(Vec::<i64>::new()));
        assert_eq!(
            compile(&clause, &CompileOptions::default()).unwrap(),
            vec![Predicate::Literal(false)]
        );
        assert_eq!(
            compile(&clause, &CompileOptions::default().negated()).unwrap(),
            vec![Predicate::Literal(true)]
        );
    }

    #[test]
    fn test_operator_without_inverse_fails_negation() {
        let clause = WhereClause::new().with("tags", ops::contains(json!(["rust"])));
        assert!(compile(&clause, &CompileOptions::default()).is_ok());
        assert!(matches!(
            compile(&clause, &CompileOptions::default().negated()),
            Err(ModelError::UnsupportedNegation { .. })
        ));
    }

    #[test]
    fn test_passthrough_substitution() {
        let clause = WhereClause::new().with("locale", WhereValue::passthrough("locale"));

        assert!(matches!(
            compile(&clause, &CompileOptions::default()),
            Err(ModelError::MissingPassthrough(key)) if key == "locale"
        ));

        let bag = Passthrough::new().with("locale", "es-ES");
        let predicates = compile(&clause, &CompileOptions::default().with_passthrough(&bag)).unwrap();
        assert_eq!(
            predicates,
            vec![Predicate::compare(col("locale"), Operator::Equal, Operand::Value(json!("es-ES")))]
        );
    }

    #[test]
    fn test_nested_and_dotted_keys_are_qualified() {
        let clause = WhereClause::new()
            .with("posts", WhereClause::new().with("title", "hi"))
            .with("c.body", WhereValue::Null);

        let predicates = compile(&clause, &CompileOptions::default()).unwrap();
        assert_eq!(
            predicates,
            vec![
                Predicate::compare(
                    ColumnRef::qualified("posts", "title"),
                    Operator::Equal,
                    Operand::Value(json!("hi"))
                ),
                Predicate::compare(ColumnRef::qualified("c", "body"), Operator::IsNull, Operand::None),
            ]
        );
    }
}
