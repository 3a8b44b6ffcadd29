use async_trait::async_trait;
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{AnyRowExt, Entity, EntityId, SqlValue};
use crate::Result;

/// Score an author gave a resource. One per (resource, author) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rating {
    pub id: EntityId,
    pub resource_id: EntityId,
    pub author_id: EntityId,
    pub score: i64,
    pub is_deleted: bool,
}

impl Rating {
    pub fn new(resource_id: EntityId, author_id: EntityId, score: i64) -> Self {
        Self {
            id: EntityId::new(),
            resource_id,
            author_id,
            score,
            is_deleted: false,
        }
    }
}

#[async_trait]
impl Entity for Rating {
    const TABLE: &'static str = "ratings";
    const KIND: &'static str = "rating";
    const COLUMNS: &'static [&'static str] = &["resource_id", "author_id", "score"];

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
            self.resource_id.into(),
            self.author_id.into(),
            self.score.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            resource_id: row.id("resource_id")?,
            author_id: row.id("author_id")?,
            score: row.int("score")?,
            is_deleted: row.flag("is_deleted")?,
        })
    }
}
