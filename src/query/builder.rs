//! Parameterized SQL for the metering endpoint
//!
//! A [`PredicateBuilder`] accumulates `WHERE` clauses and their bind values,
//! numbering placeholders as it goes. The count and data statements each copy
//! the predicate parameters into their own list; the data statement then
//! appends its `LIMIT`/`OFFSET` values with placeholders numbered after the
//! predicate's.

use super::filter::UsageFilter;
use crate::schema::{USAGE_COLUMNS, USAGE_TABLE};

use chrono::NaiveDate;
use uuid::Uuid;

/// A bind value for a numbered placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Int(i64),
}

/// SQL text plus its bind values, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Accumulates `AND`-joined clauses with numbered placeholders.
#[derive(Debug, Default, Clone)]
pub struct PredicateBuilder {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause. `render` receives the placeholder (`$n`) reserved for
    /// `param` and returns the clause text.
    pub fn push(&mut self, param: SqlParam, render: impl FnOnce(&str) -> String) -> &mut Self {
        self.params.push(param);
        let placeholder = format!("${}", self.params.len());
        self.clauses.push(render(&placeholder));
        self
    }

    /// `column <op> $n`
    pub fn compare(&mut self, column: &str, op: &str, param: SqlParam) -> &mut Self {
        self.push(param, |p| format!("{} {} {}", column, op, p))
    }

    /// ` WHERE ...`, or an empty string when no clause was added.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

/// Count and page statements sharing one predicate
#[derive(Debug, Clone, PartialEq)]
pub struct UsageQuery {
    pub filter: UsageFilter,
    pub count: SqlStatement,
    pub data: SqlStatement,
}

impl UsageQuery {
    pub fn build(filter: UsageFilter) -> Self {
        let predicate = usage_predicate(&filter);
        let where_clause = predicate.where_clause();

        let count = SqlStatement {
            sql: format!("SELECT COUNT(*) FROM {}{}", USAGE_TABLE, where_clause),
            params: predicate.params().to_vec(),
        };

        let mut data_params = predicate.params().to_vec();
        data_params.push(SqlParam::Int(filter.limit));
        let limit_placeholder = data_params.len();
        data_params.push(SqlParam::Int(filter.offset));
        let offset_placeholder = data_params.len();

        let data = SqlStatement {
            sql: format!(
                "SELECT {} FROM {}{} ORDER BY date DESC, system_id ASC LIMIT ${} OFFSET ${}",
                USAGE_COLUMNS.join(", "),
                USAGE_TABLE,
                where_clause,
                limit_placeholder,
                offset_placeholder
            ),
            params: data_params,
        };

        Self {
            filter,
            count,
            data,
        }
    }
}

/// Date range first, then the optional filters in a fixed order.
fn usage_predicate(filter: &UsageFilter) -> PredicateBuilder {
    let mut predicate = PredicateBuilder::new();
    predicate
        .compare("date", ">=", SqlParam::Date(filter.start_date))
        .compare("date", "<=", SqlParam::Date(filter.end_date));

    if let Some(system_id) = filter.system_id {
        predicate.compare("system_id", "=", SqlParam::Uuid(system_id));
    }
    if let Some(org_id) = &filter.org_id {
        predicate.compare("org_id", "=", SqlParam::Text(org_id.clone()));
    }
    if let Some(pattern) = filter.display_name_pattern() {
        predicate.push(SqlParam::Text(pattern), |p| {
            format!("display_name ILIKE {} ESCAPE '\\'", p)
        });
    }
    predicate
}
