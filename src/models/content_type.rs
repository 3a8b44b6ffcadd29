use async_trait::async_trait;
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{AnyRowExt, Entity, EntityId, Named, SqlValue};
use crate::Result;

/// MIME type of stored files, named by its essence (`application/pdf`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentType {
    pub id: EntityId,
    pub name: String,
    pub file_extension: Option<String>,
    pub is_deleted: bool,
}

impl ContentType {
    pub fn new(name: impl Into<String>, file_extension: Option<&str>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            file_extension: file_extension.map(str::to_string),
            is_deleted: false,
        }
    }
}

#[async_trait]
impl Entity for ContentType {
    const TABLE: &'static str = "content_types";
    const KIND: &'static str = "content type";
    const COLUMNS: &'static [&'static str] = &["name", "file_extension"];

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
        vec![self.name.clone().into(), self.file_extension.clone().into()]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            name: row.text("name")?,
            file_extension: row.opt_text("file_extension")?,
            is_deleted: row.flag("is_deleted")?,
        })
    }
}

impl Named for ContentType {
    fn name(&self) -> &str {
        &self.name
    }
}
