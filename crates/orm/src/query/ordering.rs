//! Query Builder ORDER BY operations

use std::cmp::Ordering;

use serde_json::Value;

use super::builder::QueryBuilder;
use crate::conditions::ColumnRef;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn reverse(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// A sort key; `alias.column` keys sort by a joined alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: ColumnRef::parse(column),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: ColumnRef::parse(column),
            direction: OrderDirection::Desc,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            direction: self.direction.reverse(),
        }
    }
}

impl QueryBuilder {
    /// Add ORDER BY clause (ascending)
    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(OrderBy::asc(column));
        self
    }

    /// Add ORDER BY clause (descending)
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order.push(OrderBy::desc(column));
        self
    }

    /// Drop every ordering added so far
    pub fn reorder(mut self) -> Self {
        self.order.clear();
        self
    }
}

/// Compare two column values the way PostgreSQL sorts them ascending:
/// numbers numerically, strings lexically, NULL last
pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

/// Sort rows by `order`, reading each key's column name from `read`
pub(crate) fn sort_by_order<T, F>(items: &mut [T], order: &[OrderBy], read: F)
where
    F: Fn(&T, &str) -> Value,
{
    if order.is_empty() {
        return;
    }
    items.sort_by(|a, b| {
        for key in order {
            let ordering = compare_values(&read(a, &key.column.name), &read(b, &key.column.name));
            let ordering = match key.direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_values_sorts_nulls_last() {
        let mut values = vec![json!(3), Value::Null, json!(1), json!(2.5)];
        values.sort_by(compare_values);
        assert_eq!(values, vec![json!(1), json!(2.5), json!(3), Value::Null]);
    }

    #[test]
    fn test_sort_by_order_uses_every_key() {
        let mut rows = vec![
            json!({"a": 1, "b": "x"}),
            json!({"a": 2, "b": "y"}),
            json!({"a": 1, "b": "z"}),
        ];
        sort_by_order(
            &mut rows,
            &[OrderBy::asc("a"), OrderBy::desc("t.b")],
            |row, column| row[column].clone(),
        );
        assert_eq!(rows[0]["b"], json!("z"));
        assert_eq!(rows[1]["b"], json!("x"));
        assert_eq!(rows[2]["b"], json!("y"));
    }
}
