use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{AnyRowExt, DbContext, Entity, EntityId, Include, Named, SqlValue};
use crate::Result;

/// Account known to the identity provider.
///
/// Only the name and id are mirrored here; authentication lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: EntityId,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            email: None,
            created_at: Utc::now(),
            is_deleted: false,
        }
    }
}

#[async_trait]
impl Entity for User {
    const TABLE: &'static str = "users";
    const KIND: &'static str = "user";
    const COLUMNS: &'static [&'static str] = &["name", "email", "created_at"];

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
            self.name.clone().into(),
            self.email.clone().into(),
            self.created_at.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            name: row.text("name")?,
            email: row.opt_text("email")?,
            created_at: row.timestamp("created_at")?,
            is_deleted: row.flag("is_deleted")?,
        })
    }
}

impl Named for User {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Profile that owns resources, comments and ratings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Author {
    pub id: EntityId,
    pub name: String,
    pub surname: Option<String>,
    pub email: Option<String>,
    /// Identity this profile belongs to, stamped by the identity provider.
    pub user_id: Option<EntityId>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            surname: None,
            email: None,
            user_id: None,
            is_deleted: false,
            user: None,
        }
    }
}

#[async_trait]
impl Entity for Author {
    const TABLE: &'static str = "authors";
    const KIND: &'static str = "author";
    const COLUMNS: &'static [&'static str] = &["name", "surname", "email", "user_id"];

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
            self.name.clone().into(),
            self.surname.clone().into(),
            self.email.clone().into(),
            self.user_id.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            name: row.text("name")?,
            surname: row.opt_text("surname")?,
            email: row.opt_text("email")?,
            user_id: row.opt_id("user_id")?,
            is_deleted: row.flag("is_deleted")?,
            user: None,
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        if let (Include::User, Some(user_id)) = (include, self.user_id) {
            self.user = ctx.find::<User>(user_id).await?;
        }
        Ok(())
    }
}

impl Named for Author {
    fn name(&self) -> &str {
        &self.name
    }
}
