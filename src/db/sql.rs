//! Portable SQL statements.
//!
//! Statements are rendered once with the placeholder style of the active
//! provider and carry their bind values, so a staged mutation can be kept in
//! a unit of work and replayed when the context is saved.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Row};

use super::entity::EntityId;
use super::provider::Provider;
use crate::{Result, SciError};

/// A typed bind value.
///
/// NULLs keep their type so that strictly typed backends accept them.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Bool(Option<bool>),
    Int(Option<i64>),
    Text(Option<String>),
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::Int(Some(i64::try_from(v).unwrap_or(i64::MAX)))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::Text(v)
    }
}

impl From<EntityId> for SqlValue {
    fn from(v: EntityId) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<Option<EntityId>> for SqlValue {
    fn from(v: Option<EntityId>) -> Self {
        SqlValue::Text(v.map(|id| id.to_string()))
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Text(Some(format_timestamp(&v)))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Text(v.as_ref().map(format_timestamp))
    }
}

/// A rendered statement together with its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    values: Vec<SqlValue>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Build an executable query borrowing this statement.
    pub(crate) fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.values {
            query = match value {
                SqlValue::Bool(v) => query.bind(v.map(i64::from)),
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_deref()),
            };
        }
        query
    }
}

/// Incremental statement builder that numbers placeholders per provider.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    provider: Provider,
    sql: String,
    values: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(provider: Provider, init: impl Into<String>) -> Self {
        Self {
            provider,
            sql: init.into(),
            values: Vec::new(),
        }
    }

    /// Append raw SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder and record its value.
    pub fn push_bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.values.push(value.into());
        let placeholder = self.provider.placeholder(self.values.len());
        self.sql.push_str(&placeholder);
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            values: self.values,
        }
    }
}

/// Format a timestamp the way it is stored.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SciError::Database(format!("invalid timestamp '{s}': {e}")))
}

/// Column accessors tolerant of how each backend reports types.
pub trait AnyRowExt {
    fn id(&self, column: &str) -> Result<EntityId>;
    fn opt_id(&self, column: &str) -> Result<Option<EntityId>>;
    fn text(&self, column: &str) -> Result<String>;
    fn opt_text(&self, column: &str) -> Result<Option<String>>;
    fn int(&self, column: &str) -> Result<i64>;
    fn flag(&self, column: &str) -> Result<bool>;
    fn timestamp(&self, column: &str) -> Result<DateTime<Utc>>;
    fn opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>>;
}

impl AnyRowExt for AnyRow {
    fn id(&self, column: &str) -> Result<EntityId> {
        let raw = self.text(column)?;
        raw.parse()
            .map_err(|_| SciError::Database(format!("invalid id in column {column}: {raw}")))
    }

    fn opt_id(&self, column: &str) -> Result<Option<EntityId>> {
        match self.opt_text(column)? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| SciError::Database(format!("invalid id in column {column}: {raw}"))),
            None => Ok(None),
        }
    }

    fn text(&self, column: &str) -> Result<String> {
        Ok(self.try_get::<String, _>(column)?)
    }

    fn opt_text(&self, column: &str) -> Result<Option<String>> {
        Ok(self.try_get::<Option<String>, _>(column)?)
    }

    fn int(&self, column: &str) -> Result<i64> {
        match self.try_get::<i64, _>(column) {
            Ok(v) => Ok(v),
            Err(_) => Ok(i64::from(self.try_get::<i32, _>(column)?)),
        }
    }

    fn flag(&self, column: &str) -> Result<bool> {
        // flags are stored as integers on every provider
        Ok(self.int(column)? != 0)
    }

    fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.text(column)?)
    }

    fn opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        self.opt_text(column)?
            .map(|s| parse_timestamp(&s))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_numbers_postgres_placeholders() {
        let mut b = SqlBuilder::new(Provider::PostgreSql, "SELECT * FROM tags WHERE name = ");
        b.push_bind("lab").push(" AND is_deleted = ").push_bind(false);
        let stmt = b.build();
        assert_eq!(
            stmt.sql(),
            "SELECT * FROM tags WHERE name = $1 AND is_deleted = $2"
        );
        assert_eq!(
            stmt.values(),
            &[SqlValue::from("lab"), SqlValue::Bool(Some(false))]
        );
    }

    #[test]
    fn test_builder_sqlite_placeholders() {
        let mut b = SqlBuilder::new(Provider::Sqlite, "UPDATE links SET access_count = ");
        b.push_bind(3i64).push(" WHERE id = ").push_bind("x");
        assert_eq!(
            b.build().sql(),
            "UPDATE links SET access_count = ? WHERE id = ?"
        );
    }

    #[test]
    fn test_null_values_keep_type() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Text(None));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Int(None));
        assert_eq!(SqlValue::from(None::<EntityId>), SqlValue::Text(None));
    }

    #[test]
    fn test_timestamp_format_is_exact() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let s = format_timestamp(&dt);
        assert_eq!(s, "2024-03-01T12:30:05.123456789Z");
        assert_eq!(parse_timestamp(&s).unwrap(), dt);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(SciError::Database(_))
        ));
    }
}
