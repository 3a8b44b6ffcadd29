//! Entity contract shared by every persisted record.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use uuid::Uuid;

use super::sql::SqlValue;
use super::unit_of_work::DbContext;
use crate::{Result, SciError};

/// Opaque unique identifier of an entity.
///
/// Identifiers are time-ordered UUIDs, so ordering by id follows insertion
/// order closely and gives paging a stable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EntityId {
    type Err = SciError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SciError::Validation(format!("invalid identifier: {s}")))
    }
}

/// Navigation properties that can be eagerly loaded with a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Include {
    Author,
    User,
    ContentType,
    Files,
    Tags,
    Categories,
    Comments,
    Ratings,
    Parent,
    Children,
    Resources,
}

/// Per-query options replacing the include/tracking decorators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Register results with the unit of work and overlay staged changes.
    pub tracking: bool,
    /// Return soft-deleted rows as well.
    pub include_deleted: bool,
    /// Navigation properties to load.
    pub includes: Vec<Include>,
}

impl QueryOptions {
    /// Untracked query of live rows only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked() -> Self {
        Self::new().with_tracking(true)
    }

    pub fn with_tracking(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn include(mut self, include: Include) -> Self {
        if !self.includes.contains(&include) {
            self.includes.push(include);
        }
        self
    }
}

/// A persisted record.
///
/// Every entity lives in one table with an `id` primary key and an
/// `is_deleted` flag. `COLUMNS` lists the remaining columns in the order
/// [`Entity::values`] returns them.
#[async_trait]
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Table holding the entity.
    const TABLE: &'static str;
    /// Human readable kind used in messages.
    const KIND: &'static str;
    /// Data columns besides `id` and `is_deleted`.
    const COLUMNS: &'static [&'static str];
    /// Discriminator column and value for types sharing a table.
    const DISCRIMINATOR: Option<(&'static str, &'static str)> = None;
    /// Column holding an optimistic concurrency token, if any.
    const VERSION_COLUMN: Option<&'static str> = None;

    fn id(&self) -> EntityId;

    fn is_deleted(&self) -> bool;

    fn set_deleted(&mut self, deleted: bool);

    /// Values for [`Entity::COLUMNS`], in order.
    fn values(&self) -> Vec<SqlValue>;

    fn from_row(row: &AnyRow) -> Result<Self>;

    /// Current concurrency token.
    fn version(&self) -> Option<i64> {
        None
    }

    /// Populate a navigation property.
    ///
    /// Entities ignore includes they have no navigation for.
    async fn load_include(&mut self, _ctx: &DbContext, _include: Include) -> Result<()> {
        Ok(())
    }
}

/// Entities looked up by a unique name.
pub trait Named: Entity {
    const NAME_COLUMN: &'static str = "name";

    fn name(&self) -> &str;
}

/// Entities looked up by a content hash.
pub trait Hashed: Entity {
    const HASH_COLUMN: &'static str = "hash";
}

/// Select list for `T`, optionally qualified with a table alias.
pub(crate) fn select_columns<T: Entity>(alias: Option<&str>) -> String {
    let qualify = |column: &str| match alias {
        Some(a) => format!("{a}.{column}"),
        None => column.to_string(),
    };
    ["id", "is_deleted"]
        .iter()
        .chain(T::COLUMNS.iter())
        .map(|c| qualify(c))
        .collect::<Vec<_>>()
        .join(", ")
}
