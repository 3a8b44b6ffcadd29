use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;

use super::Author;
use crate::db::{AnyRowExt, DbContext, Entity, EntityId, Include, SqlValue};
use crate::Result;

/// Comment on a resource, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub id: EntityId,
    pub parent_id: Option<EntityId>,
    pub author_id: EntityId,
    pub resource_id: EntityId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

impl Comment {
    pub fn new(resource_id: EntityId, author_id: EntityId, text: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            parent_id: None,
            author_id,
            resource_id,
            text: text.into(),
            created_at: Utc::now(),
            is_deleted: false,
            author: None,
        }
    }

    pub fn reply_to(mut self, parent_id: EntityId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

#[async_trait]
impl Entity for Comment {
    const TABLE: &'static str = "comments";
    const KIND: &'static str = "comment";
    const COLUMNS: &'static [&'static str] =
        &["parent_id", "author_id", "resource_id", "text", "created_at"];

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
            self.parent_id.into(),
            self.author_id.into(),
            self.resource_id.into(),
            self.text.clone().into(),
            self.created_at.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            parent_id: row.opt_id("parent_id")?,
            author_id: row.id("author_id")?,
            resource_id: row.id("resource_id")?,
            text: row.text("text")?,
            created_at: row.timestamp("created_at")?,
            is_deleted: row.flag("is_deleted")?,
            author: None,
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        if include == Include::Author {
            self.author = ctx.find::<Author>(self.author_id).await?;
        }
        Ok(())
    }
}
