use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{AnyRowExt, Entity, EntityId, Hashed, SqlValue};
use crate::Result;

/// Short link resolving `hash` to `source_address`.
///
/// `row_version` is an optimistic concurrency token: writes carrying a stale
/// version are rejected when the unit of work is saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub id: EntityId,
    pub source_address: String,
    pub hash: String,
    pub access_count: i64,
    pub last_access: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub row_version: i64,
    pub is_deleted: bool,
}

impl Link {
    pub fn new(source_address: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            source_address: source_address.into(),
            hash: hash.into(),
            access_count: 0,
            last_access: None,
            created_at: Utc::now(),
            row_version: 0,
            is_deleted: false,
        }
    }

    /// Record one resolution of the link.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Some(Utc::now());
    }
}

#[async_trait]
impl Entity for Link {
    const TABLE: &'static str = "links";
    const KIND: &'static str = "link";
    const COLUMNS: &'static [&'static str] = &[
        "source_address",
        "hash",
        "access_count",
        "last_access",
        "created_at",
        "row_version",
    ];
    const VERSION_COLUMN: Option<&'static str> = Some("row_version");

    fn id(&self) -> EntityId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.source_address.clone().into(),
            self.hash.clone().into(),
            self.access_count.into(),
            self.last_access.into(),
            self.created_at.into(),
            self.row_version.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            source_address: row.text("source_address")?,
            hash: row.text("hash")?,
            access_count: row.int("access_count")?,
            last_access: row.opt_timestamp("last_access")?,
            created_at: row.timestamp("created_at")?,
            row_version: row.int("row_version")?,
            is_deleted: row.flag("is_deleted")?,
        })
    }

    fn version(&self) -> Option<i64> {
        Some(self.row_version)
    }
}

impl Hashed for Link {}
