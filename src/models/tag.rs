use async_trait::async_trait;
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{AnyRowExt, DbContext, Entity, EntityId, Include, JoinTable, Named, SqlValue};
use crate::Result;

/// Free-form label attached to resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    pub is_deleted: bool,
    /// Loaded with [`Include::Resources`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_ids: Vec<EntityId>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            is_deleted: false,
            resource_ids: Vec::new(),
        }
    }
}

#[async_trait]
impl Entity for Tag {
    const TABLE: &'static str = "tags";
    const KIND: &'static str = "tag";
    const COLUMNS: &'static [&'static str] = &["name"];

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
        vec![self.name.clone().into()]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            name: row.text("name")?,
            is_deleted: row.flag("is_deleted")?,
            resource_ids: Vec::new(),
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        if include == Include::Resources {
            self.resource_ids = ctx
                .find_linked_ids(&JoinTable::RESOURCE_TAGS.reversed(), self.id)
                .await?;
        }
        Ok(())
    }
}

impl Named for Tag {
    fn name(&self) -> &str {
        &self.name
    }
}
