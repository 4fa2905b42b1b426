//! SQL dialect differences and a small statement builder
//!
//! Statements are assembled from static fragments plus bound parameters.
//! The builder numbers placeholders the way the target database expects.

use crate::error::{HistoryError, HistoryResult};
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;
use trendline_shared::ItemId;

/// Largest number of ids bound into a single `IN (...)` list.
pub const IN_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    /// Pick the dialect from a database URL scheme.
    pub fn from_url(url: &str) -> HistoryResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(HistoryError::config(format!(
                "Unsupported database scheme: {:?}",
                other
            ))),
        }
    }

    /// Placeholder for the `n`-th bound parameter (1-based).
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${}", n),
            Self::Sqlite | Self::MySql => "?".to_string(),
        }
    }

    /// Integer division that floors non-negative operands.
    pub fn int_div(self, lhs: &str, rhs: &str) -> String {
        match self {
            Self::MySql => format!("(({}) DIV ({}))", lhs, rhs),
            Self::Sqlite | Self::Postgres => format!("(({}) / ({}))", lhs, rhs),
        }
    }

    /// Cast an aggregate to a double so it decodes the same everywhere.
    pub fn to_double(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST({} AS REAL)", expr),
            Self::MySql => format!("CAST({} AS DOUBLE)", expr),
            Self::Postgres => format!("CAST({} AS DOUBLE PRECISION)", expr),
        }
    }

    /// Select expression for the unsigned `value` column.
    ///
    /// Postgres stores it as `numeric(20)`, which is read back as text.
    pub fn unsigned_value(self, column: &str) -> String {
        match self {
            Self::Postgres => format!("CAST({} AS TEXT)", column),
            Self::Sqlite | Self::MySql => column.to_string(),
        }
    }
}

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    /// Unsigned id, checked against the signed column range when bound
    Id(u64),
    Float(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for SqlParam {
    fn from(v: u64) -> Self {
        Self::Id(v)
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Append a placeholder and remember its value.
    pub fn bind(&mut self, value: impl Into<SqlParam>) -> &mut Self {
        self.params.push(value.into());
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// `column IN (?, ?, ...)`; an empty list renders a false condition.
    pub fn in_list(&mut self, column: &str, ids: &[ItemId]) -> &mut Self {
        if ids.is_empty() {
            return self.push("1=0");
        }
        self.push(column).push(" IN (");
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.bind(*id);
        }
        self.push(")")
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// A sqlx query with every parameter bound in order.
    ///
    /// Fails with `InvalidInput` when an id does not fit a signed 64-bit column.
    pub fn query(&self) -> HistoryResult<Query<'_, Any, AnyArguments<'_>>> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Id(v) => query.bind(i64::try_from(*v).map_err(|_| {
                    HistoryError::invalid_input(format!("id {} is out of range", v))
                })?),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
            };
        }
        Ok(query)
    }
}
