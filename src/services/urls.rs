use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::result::{found, ServiceResult};
use crate::db::{Database, EntityId, Include, QueryOptions, UnitOfWork};
use crate::models::{Author, Tag, Url};
use crate::{Result, SciError};

/// Data for a new link resource.
#[derive(Debug, Clone)]
pub struct NewUrl {
    pub title: String,
    pub link: String,
    pub author_id: EntityId,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl NewUrl {
    pub fn new(title: impl Into<String>, link: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            author_id,
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Normalize an http(s) address.
pub fn validate_address(address: &str) -> Result<String> {
    let parsed = ::url::Url::parse(address.trim())
        .map_err(|e| SciError::Validation(format!("invalid address {address}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        scheme => Err(SciError::Validation(format!(
            "unsupported address scheme: {scheme}"
        ))),
    }
}

/// Link resources and their tags.
#[derive(Clone)]
pub struct UrlService {
    db: Database,
    cancel: CancellationToken,
}

impl UrlService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::with_cancellation(self.db.clone(), self.cancel.clone())
    }

    /// Create a link resource, creating missing tags.
    pub async fn create_url(&self, request: &NewUrl) -> Result<Url> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(SciError::Validation("title is empty".to_string()));
        }
        let link = validate_address(&request.link)?;

        let uow = self.unit_of_work();
        if !uow.repository::<Author>().exists(request.author_id).await? {
            return Err(SciError::NotFound(format!("Author {}", request.author_id)));
        }

        let mut url = Url::new(title, request.author_id, link);
        url.resource.description = request.description.clone();
        let urls = uow.repository::<Url>();
        urls.add(&url)?;

        let names: BTreeSet<&str> = request
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        for name in names {
            let tag = self.tag_named(&uow, name).await?;
            urls.attach_tag(url.resource.id, tag.id)?;
            url.resource.tags.push(tag);
        }

        uow.try_save_context().await?;
        info!(id = %url.resource.id, link = %url.link, "created url");
        Ok(url)
    }

    /// Existing tag named `name`, or a new one staged in `uow`.
    async fn tag_named(&self, uow: &UnitOfWork, name: &str) -> Result<Tag> {
        let tags = uow.repository::<Tag>();
        if let Some(tag) = tags.get_by_name(name, &QueryOptions::new()).await? {
            return Ok(tag);
        }
        let tag = Tag::new(name);
        tags.add(&tag)?;
        Ok(tag)
    }

    /// Tag url `id` with `name`.
    pub async fn tag(&self, id: EntityId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SciError::Validation("tag name is empty".to_string()));
        }
        let uow = self.unit_of_work();
        let urls = uow.repository::<Url>();
        if !urls.exists(id).await? {
            return Err(SciError::NotFound(format!("Url {id}")));
        }
        let tag = self.tag_named(&uow, name).await?;
        urls.attach_tag(id, tag.id)?;
        uow.try_save_context().await?;
        Ok(())
    }

    /// Remove tag `name` from url `id`.
    pub async fn untag(&self, id: EntityId, name: &str) -> Result<()> {
        let uow = self.unit_of_work();
        let tag = uow
            .repository::<Tag>()
            .get_by_name(name, &QueryOptions::new())
            .await?
            .ok_or_else(|| SciError::NotFound(format!("Tag {name}")))?;
        uow.repository::<Url>().detach_tag(id, tag.id)?;
        uow.try_save_context().await?;
        Ok(())
    }

    pub async fn create(&self, request: &NewUrl) -> ServiceResult<Url> {
        self.create_url(request).await.into()
    }

    /// Url with its author, tags and categories.
    pub async fn get(&self, id: EntityId) -> ServiceResult<Url> {
        let options = QueryOptions::new()
            .include(Include::Author)
            .include(Include::Tags)
            .include(Include::Categories);
        let uow = self.unit_of_work();
        found(uow.repository::<Url>().get_by_id(id, &options).await, "Url")
    }

    pub async fn delete(&self, id: EntityId) -> ServiceResult<()> {
        let uow = self.unit_of_work();
        let result = async {
            let urls = uow.repository::<Url>();
            if !urls.exists(id).await? {
                return Err(SciError::NotFound(format!("Url {id}")));
            }
            urls.delete_by_id(id)?;
            uow.try_save_context().await?;
            Ok::<_, SciError>(())
        }
        .await;
        result.into()
    }
}
