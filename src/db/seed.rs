//! Fixture data for a fresh database.
//!
//! Each reference table is only filled while it is empty, so seeding an
//! already seeded database changes nothing.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Database, QueryOptions, UnitOfWork};
use crate::models::{Author, Category, ContentType, Rating, Tag, Url, User};
use crate::Result;

/// Rows inserted by one seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub users: u64,
    pub authors: u64,
    pub content_types: u64,
    pub categories: u64,
    pub tags: u64,
    pub resources: u64,
    pub ratings: u64,
}

impl SeedReport {
    pub fn total(&self) -> u64 {
        self.users
            + self.authors
            + self.content_types
            + self.categories
            + self.tags
            + self.resources
            + self.ratings
    }
}

const ADMIN_USER: &str = "admin";
const ADMIN_AUTHOR: &str = "Administrator";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("text/plain", "txt"),
    ("image/png", "png"),
    ("application/zip", "zip"),
    ("application/octet-stream", "bin"),
];

const ROOT_CATEGORY: &str = "Sciences";
const CATEGORIES: &[&str] = &["Physics", "Mathematics", "Chemistry"];
const TAGS: &[&str] = &["lecture", "lab", "exam", "reference"];

/// Seed every empty reference table inside one transaction.
///
/// A failure rolls the whole run back.
pub async fn seed(db: &Database) -> Result<SeedReport> {
    info!("Seeding database");
    let uow = UnitOfWork::new(db.clone());
    uow.begin_transaction(false).await?;

    let result = seed_tables(&uow).await;
    let outcome = match result {
        Ok(report) => match uow.commit_transaction().await {
            Ok(()) => {
                info!("Seeding complete ({} rows)", report.total());
                Ok(report)
            }
            Err(e) => Err(e),
        },
        Err(e) => {
            warn!(error = %e, "Seeding failed, rolling back");
            if uow.in_transaction().await {
                if let Err(rollback) = uow.rollback_transaction().await {
                    warn!(error = %rollback, "Rollback of seed transaction failed");
                }
            }
            Err(e)
        }
    };
    uow.dispose().await?;
    outcome
}

async fn seed_tables(uow: &UnitOfWork) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let opts = QueryOptions::new();

    let users = uow.repository::<User>();
    if users.count().await? == 0 {
        let mut admin = User::new(ADMIN_USER);
        admin.email = Some("admin@scimaterials.local".to_string());
        users.add(&admin)?;
        report.users = uow.try_save_context().await?;
    }

    let authors = uow.repository::<Author>();
    if authors.count().await? == 0 {
        let mut author = Author::new(ADMIN_AUTHOR);
        author.user_id = users.get_by_name(ADMIN_USER, &opts).await?.map(|u| u.id);
        authors.add(&author)?;
        report.authors = uow.try_save_context().await?;
    }

    let content_types = uow.repository::<ContentType>();
    if content_types.count().await? == 0 {
        for (name, extension) in CONTENT_TYPES {
            content_types.add(&ContentType::new(*name, Some(*extension)))?;
        }
        report.content_types = uow.try_save_context().await?;
    }

    let categories = uow.repository::<Category>();
    if categories.count().await? == 0 {
        let root = Category::new(ROOT_CATEGORY).with_description("Scientific disciplines");
        categories.add(&root)?;
        for name in CATEGORIES {
            categories.add(&Category::new(*name).with_parent(root.id))?;
        }
        report.categories = uow.try_save_context().await?;
    }

    let tags = uow.repository::<Tag>();
    if tags.count().await? == 0 {
        for name in TAGS {
            tags.add(&Tag::new(*name))?;
        }
        report.tags = uow.try_save_context().await?;
    }

    let author = authors.get_by_name(ADMIN_AUTHOR, &opts).await?;
    let urls = uow.repository::<Url>();
    if urls.count().await? == 0 {
        match &author {
            Some(author) => {
                let mut url = Url::new(
                    "SciMaterials handbook",
                    author.id,
                    "https://example.org/scimaterials/handbook",
                );
                url.resource.description = Some("How to publish and find materials".to_string());
                urls.add(&url)?;
                if let Some(tag) = tags.get_by_name("reference", &opts).await? {
                    urls.attach_tag(url.resource.id, tag.id)?;
                }
                if let Some(category) = categories.get_by_name(ROOT_CATEGORY, &opts).await? {
                    urls.attach_category(url.resource.id, category.id)?;
                }
                uow.try_save_context().await?;
                report.resources = 1;
            }
            None => debug!("No author to own seeded resources"),
        }
    }

    let ratings = uow.repository::<Rating>();
    if ratings.count().await? == 0 {
        let url = urls.get_all(&opts).await?.into_iter().next();
        if let (Some(author), Some(url)) = (&author, url) {
            ratings.add(&Rating::new(url.resource.id, author.id, 5))?;
            report.ratings = uow.try_save_context().await?;
        }
    }

    Ok(report)
}
