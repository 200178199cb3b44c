//! PostgREST-shaped table queries.
//!
//! A [`TableQuery`] renders to PostgREST query parameters for the HTTP client
//! and is evaluated directly against JSON rows by the in-memory backend.

use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// PostgREST operator expression, e.g. `eq.abc` or `is.null`.
    fn expression(&self) -> String {
        let value = filter_text(&self.value);
        match self.op {
            FilterOp::Eq => format!("eq.{value}"),
            FilterOp::Neq => format!("neq.{value}"),
            FilterOp::Gt => format!("gt.{value}"),
            FilterOp::Gte => format!("gte.{value}"),
            FilterOp::Lt => format!("lt.{value}"),
            FilterOp::Lte => format!("lte.{value}"),
            FilterOp::IsNull => "is.null".to_string(),
            FilterOp::NotNull => "not.is.null".to_string(),
        }
    }

    /// Evaluate against a row. Missing columns behave like SQL NULL.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        let cell = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::IsNull => cell.is_null(),
            FilterOp::NotNull => !cell.is_null(),
            _ if cell.is_null() => false,
            FilterOp::Eq => compare(cell, &self.value) == Some(Ordering::Equal),
            FilterOp::Neq => compare(cell, &self.value) != Some(Ordering::Equal),
            FilterOp::Gt => compare(cell, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(cell, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(cell, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(cell, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Select/update target: table plus filters, ordering and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl TableQuery {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    fn filter(mut self, column: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value.into())
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value.into())
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value.into())
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value.into())
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value.into())
    }

    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, FilterOp::IsNull, Value::Null)
    }

    pub fn not_null(self, column: &str) -> Self {
        self.filter(column, FilterOp::NotNull, Value::Null)
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query parameters for a GET.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];
        pairs.extend(self.filter_pairs());
        if let Some(order) = &self.order {
            let direction = if order.descending { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Filter parameters only (PATCH targets).
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|f| (f.column.clone(), f.expression()))
            .collect()
    }

    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Apply filters, order and limit to `rows`, cloning the survivors.
    pub fn apply<'a, I>(&self, rows: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a Map<String, Value>>,
    {
        let mut selected: Vec<&Map<String, Value>> =
            rows.into_iter().filter(|row| self.matches(row)).collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let left = a.get(&order.column).unwrap_or(&Value::Null);
                let right = b.get(&order.column).unwrap_or(&Value::Null);
                let ord = compare(left, right).unwrap_or(Ordering::Equal);
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        selected
            .into_iter()
            .take(limit)
            .map(|row| Value::Object(row.clone()))
            .collect()
    }
}

/// Value as it appears in a PostgREST filter expression.
pub fn filter_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (x, y) => Some(filter_text(x).cmp(&filter_text(y))),
    }
}
