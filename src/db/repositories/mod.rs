//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles CRUD operations for a specific entity and
//! branches on the configured driver.

pub mod account;
pub mod project;

pub use account::{AccountRepository, SqlxAccountRepository};
pub use project::{ProjectRepository, SqlxProjectRepository};

use anyhow::{Context, Result};
use sqlx::{
    mysql::MySqlArguments, query::Query, sqlite::SqliteArguments, MySql, MySqlPool, Sqlite,
    SqlitePool,
};

use crate::db::DynDatabasePool;

pub(crate) fn sqlite_pool(pool: &DynDatabasePool) -> Result<&SqlitePool> {
    pool.as_sqlite()
        .context("database driver is sqlite but no sqlite pool is available")
}

pub(crate) fn mysql_pool(pool: &DynDatabasePool) -> Result<&MySqlPool> {
    pool.as_mysql()
        .context("database driver is mysql but no mysql pool is available")
}

/// True when the error chain contains a database unique-constraint violation
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

/// A value bound to a dynamically built statement
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Text(String),
    Int(i64),
}

/// AND-joined WHERE conditions with their positional `?` values.
///
/// Conditions are static SQL fragments; user input only ever travels
/// through `values`.
#[derive(Debug, Default)]
pub(crate) struct WhereClause {
    conditions: Vec<&'static str>,
    values: Vec<SqlValue>,
}

impl WhereClause {
    pub fn push(&mut self, condition: &'static str, values: impl IntoIterator<Item = SqlValue>) {
        self.conditions.push(condition);
        self.values.extend(values);
    }

    pub fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// Lowercased, newline-joined copy of the searchable fields of a row.
///
/// Stored alongside the row and matched with `like_pattern`; SQLite's
/// `LOWER()` only folds ASCII, so folding happens here.
pub(crate) fn search_text<'a>(fields: impl IntoIterator<Item = Option<&'a str>>) -> String {
    fields
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `%term%` for a `LIKE ... ESCAPE '!'` match, lowercased, with wildcards escaped
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
        };
    }
    query
}

pub(crate) fn bind_mysql<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    values: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for value in values {
        query = match value {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
        };
    }
    query
}
