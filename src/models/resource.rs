use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;

use super::{Author, Category, Comment, ContentType, Rating, Tag};
use crate::db::{AnyRowExt, DbContext, Entity, EntityId, Hashed, Include, JoinTable, SqlValue};
use crate::{Result, SciError};

/// Discriminator of the concrete resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    FileGroup,
    Url,
}

impl ResourceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::FileGroup => "file_group",
            ResourceType::Url => "url",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = SciError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(ResourceType::File),
            "file_group" => Ok(ResourceType::FileGroup),
            "url" => Ok(ResourceType::Url),
            _ => Err(SciError::Validation(format!("unknown resource type: {s}"))),
        }
    }
}

/// Fields shared by every resource kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceBase {
    pub id: EntityId,
    pub title: String,
    pub description: Option<String>,
    pub author_id: EntityId,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Category>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<Rating>,
}

impl ResourceBase {
    pub fn new(title: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            id: EntityId::new(),
            title: title.into(),
            description: None,
            author_id,
            created_at: Utc::now(),
            is_deleted: false,
            author: None,
            tags: Vec::new(),
            categories: Vec::new(),
            comments: Vec::new(),
            ratings: Vec::new(),
        }
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.title.clone().into(),
            self.description.clone().into(),
            self.author_id.into(),
            self.created_at.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            title: row.text("title")?,
            description: row.opt_text("description")?,
            author_id: row.id("author_id")?,
            created_at: row.timestamp("created_at")?,
            is_deleted: row.flag("is_deleted")?,
            author: None,
            tags: Vec::new(),
            categories: Vec::new(),
            comments: Vec::new(),
            ratings: Vec::new(),
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        match include {
            Include::Author => {
                self.author = ctx.find::<Author>(self.author_id).await?;
            }
            Include::Tags => {
                self.tags = ctx.find_linked::<Tag>(&JoinTable::RESOURCE_TAGS, self.id).await?;
            }
            Include::Categories => {
                self.categories = ctx
                    .find_linked::<Category>(&JoinTable::RESOURCE_CATEGORIES, self.id)
                    .await?;
            }
            Include::Comments => {
                self.comments = ctx.find_by::<Comment>("resource_id", self.id).await?;
            }
            Include::Ratings => {
                self.ratings = ctx.find_by::<Rating>("resource_id", self.id).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Concrete resource kinds stored in the `resources` table.
pub trait Resource: Entity {
    const RESOURCE_TYPE: ResourceType;

    fn base(&self) -> &ResourceBase;

    fn base_mut(&mut self) -> &mut ResourceBase;

    fn resource_type(&self) -> ResourceType {
        Self::RESOURCE_TYPE
    }
}

/// Uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct File {
    #[serde(flatten)]
    pub resource: ResourceBase,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content, used to find duplicates.
    pub hash: Option<String>,
    pub content_type_id: Option<EntityId>,
    pub file_group_id: Option<EntityId>,
    pub anti_virus_scanned: bool,
    pub anti_virus_scan_date: Option<DateTime<Utc>>,
    pub short_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

impl File {
    pub fn new(title: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            resource: ResourceBase::new(title, author_id),
            size: 0,
            hash: None,
            content_type_id: None,
            file_group_id: None,
            anti_virus_scanned: false,
            anti_virus_scan_date: None,
            short_link: None,
            content_type: None,
        }
    }
}

#[async_trait]
impl Entity for File {
    const TABLE: &'static str = "resources";
    const KIND: &'static str = "file";
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "description",
        "author_id",
        "created_at",
        "size",
        "hash",
        "content_type_id",
        "file_group_id",
        "anti_virus_scanned",
        "anti_virus_scan_date",
        "short_link",
    ];
    const DISCRIMINATOR: Option<(&'static str, &'static str)> =
        Some(("resource_type", ResourceType::File.as_str()));

    fn id(&self) -> EntityId {
        self.resource.id
    }

    fn is_deleted(&self) -> bool {
        self.resource.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.resource.is_deleted = deleted;
    }

    fn values(&self) -> Vec<SqlValue> {
        let mut values = self.resource.values();
        values.extend([
            SqlValue::from(self.size),
            SqlValue::from(self.hash.clone()),
            SqlValue::from(self.content_type_id),
            SqlValue::from(self.file_group_id),
            SqlValue::from(self.anti_virus_scanned),
            SqlValue::from(self.anti_virus_scan_date),
            SqlValue::from(self.short_link.clone()),
        ]);
        values
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        let size = row.int("size")?;
        Ok(Self {
            resource: ResourceBase::from_row(row)?,
            size: u64::try_from(size)
                .map_err(|_| SciError::Database(format!("negative file size: {size}")))?,
            hash: row.opt_text("hash")?,
            content_type_id: row.opt_id("content_type_id")?,
            file_group_id: row.opt_id("file_group_id")?,
            anti_virus_scanned: row.flag("anti_virus_scanned")?,
            anti_virus_scan_date: row.opt_timestamp("anti_virus_scan_date")?,
            short_link: row.opt_text("short_link")?,
            content_type: None,
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        match (include, self.content_type_id) {
            (Include::ContentType, Some(content_type_id)) => {
                self.content_type = ctx.find::<ContentType>(content_type_id).await?;
                Ok(())
            }
            (Include::ContentType, None) => Ok(()),
            _ => self.resource.load_include(ctx, include).await,
        }
    }
}

impl Hashed for File {}

impl Resource for File {
    const RESOURCE_TYPE: ResourceType = ResourceType::File;

    fn base(&self) -> &ResourceBase {
        &self.resource
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.resource
    }
}

/// Named collection of files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileGroup {
    #[serde(flatten)]
    pub resource: ResourceBase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

impl FileGroup {
    pub fn new(title: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            resource: ResourceBase::new(title, author_id),
            files: Vec::new(),
        }
    }
}

#[async_trait]
impl Entity for FileGroup {
    const TABLE: &'static str = "resources";
    const KIND: &'static str = "file group";
    const COLUMNS: &'static [&'static str] = &["title", "description", "author_id", "created_at"];
    const DISCRIMINATOR: Option<(&'static str, &'static str)> =
        Some(("resource_type", ResourceType::FileGroup.as_str()));

    fn id(&self) -> EntityId {
        self.resource.id
    }

    fn is_deleted(&self) -> bool {
        self.resource.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.resource.is_deleted = deleted;
    }

    fn values(&self) -> Vec<SqlValue> {
        self.resource.values()
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            resource: ResourceBase::from_row(row)?,
            files: Vec::new(),
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        if include == Include::Files {
            self.files = ctx.find_by::<File>("file_group_id", self.resource.id).await?;
            return Ok(());
        }
        self.resource.load_include(ctx, include).await
    }
}

impl Resource for FileGroup {
    const RESOURCE_TYPE: ResourceType = ResourceType::FileGroup;

    fn base(&self) -> &ResourceBase {
        &self.resource
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.resource
    }
}

/// Link to external material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Url {
    #[serde(flatten)]
    pub resource: ResourceBase,
    pub link: String,
}

impl Url {
    pub fn new(title: impl Into<String>, author_id: EntityId, link: impl Into<String>) -> Self {
        Self {
            resource: ResourceBase::new(title, author_id),
            link: link.into(),
        }
    }
}

#[async_trait]
impl Entity for Url {
    const TABLE: &'static str = "resources";
    const KIND: &'static str = "url";
    const COLUMNS: &'static [&'static str] =
        &["title", "description", "author_id", "created_at", "link"];
    const DISCRIMINATOR: Option<(&'static str, &'static str)> =
        Some(("resource_type", ResourceType::Url.as_str()));

    fn id(&self) -> EntityId {
        self.resource.id
    }

    fn is_deleted(&self) -> bool {
        self.resource.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.resource.is_deleted = deleted;
    }

    fn values(&self) -> Vec<SqlValue> {
        let mut values = self.resource.values();
        values.push(self.link.clone().into());
        values
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            resource: ResourceBase::from_row(row)?,
            link: row.text("link")?,
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        self.resource.load_include(ctx, include).await
    }
}

impl Resource for Url {
    const RESOURCE_TYPE: ResourceType = ResourceType::Url;

    fn base(&self) -> &ResourceBase {
        &self.resource
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_round_trip() {
        for kind in [ResourceType::File, ResourceType::FileGroup, ResourceType::Url] {
            assert_eq!(kind.as_str().parse::<ResourceType>().unwrap(), kind);
        }
        assert!("video".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_discriminators_match_resource_type() {
        assert_eq!(File::DISCRIMINATOR, Some(("resource_type", "file")));
        assert_eq!(FileGroup::DISCRIMINATOR, Some(("resource_type", "file_group")));
        assert_eq!(Url::DISCRIMINATOR, Some(("resource_type", "url")));
    }

    #[test]
    fn test_values_follow_columns() {
        let author = EntityId::new();
        assert_eq!(File::new("a", author).values().len(), File::COLUMNS.len());
        assert_eq!(FileGroup::new("b", author).values().len(), FileGroup::COLUMNS.len());
        assert_eq!(
            Url::new("c", author, "https://example.org").values().len(),
            Url::COLUMNS.len()
        );
    }

    #[test]
    fn test_resource_type_reported_by_instances() {
        let author = EntityId::new();
        assert_eq!(File::new("a", author).resource_type(), ResourceType::File);
        assert_eq!(Url::new("c", author, "x").resource_type(), ResourceType::Url);
    }

    #[test]
    fn test_file_serializes_flat() {
        let file = File::new("Lecture 1", EntityId::new());
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["title"], "Lecture 1");
        assert_eq!(json["size"], 0);
        assert!(json.get("tags").is_none());
    }
}
