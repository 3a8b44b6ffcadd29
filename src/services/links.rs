//! Short links.
//!
//! A link's code is a prefix of the hex SHA-256 of its source address. When
//! the prefix is already taken by another address the code is widened two
//! digits at a time. Resolving a link counts the access; concurrent resolves
//! race on the link's row version and the loser retries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::result::ServiceResult;
use crate::config::LinksConfig;
use crate::db::{Database, QueryOptions, UnitOfWork};
use crate::models::Link;
use crate::{Result, SciError};

const MAX_HASH_LENGTH: usize = 64;

/// Inserts lost to a concurrent writer before giving up.
const MAX_INSERT_RACES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkChange {
    Unchanged,
    Added,
    Revived,
}

fn checked_source(source: &str) -> Result<&str> {
    let source = source.trim();
    if source.is_empty() {
        return Err(SciError::Validation("source address is empty".to_string()));
    }
    Ok(source)
}

/// Full hex digest of `source`.
pub fn link_digest(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

#[derive(Clone)]
pub struct LinkShortService {
    db: Database,
    config: LinksConfig,
    cancel: CancellationToken,
}

impl LinkShortService {
    pub fn new(db: Database, config: LinksConfig) -> Self {
        Self {
            db,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight calls when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::with_cancellation(self.db.clone(), self.cancel.clone())
    }

    /// Register `source` and return its link.
    ///
    /// Registering an address twice returns the existing link, reviving it
    /// if it was deleted.
    pub async fn register(&self, source: &str) -> Result<Link> {
        let source = checked_source(source)?;
        let mut races = 0;

        loop {
            let uow = self.unit_of_work();
            let (link, change) = self.stage_link(&uow, source).await?;
            if change == LinkChange::Unchanged {
                return Ok(link);
            }
            match uow.try_save_context().await {
                Ok(_) => {
                    info!(hash = %link.hash, ?change, "saved short link");
                    return Ok(link);
                }
                // someone else inserted this code first; look again
                Err(SciError::UniqueViolation(_)) if races < MAX_INSERT_RACES => {
                    races += 1;
                    debug!(hash = %link.hash, races, "short link inserted concurrently");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stage the link for `source` in `uow` without saving it.
    ///
    /// The link is written together with the rest of `uow`, so a failed save
    /// leaves no link behind.
    pub(crate) async fn register_in(&self, uow: &UnitOfWork, source: &str) -> Result<Link> {
        let source = checked_source(source)?;
        let (link, _) = self.stage_link(uow, source).await?;
        Ok(link)
    }

    async fn stage_link(&self, uow: &UnitOfWork, source: &str) -> Result<(Link, LinkChange)> {
        let digest = link_digest(source);
        let mut length = self.config.hash_length.clamp(1, MAX_HASH_LENGTH);
        let links = uow.repository::<Link>();

        loop {
            let hash = &digest[..length];
            match links.get_by_hash(hash, &QueryOptions::new().with_deleted()).await? {
                Some(mut link) if link.source_address == source => {
                    if !link.is_deleted {
                        return Ok((link, LinkChange::Unchanged));
                    }
                    link.is_deleted = false;
                    links.update(&link)?;
                    link.row_version += 1;
                    return Ok((link, LinkChange::Revived));
                }
                Some(_) if length < MAX_HASH_LENGTH => {
                    debug!(hash, "short link code taken, widening");
                    length = (length + 2).min(MAX_HASH_LENGTH);
                }
                Some(_) => {
                    return Err(SciError::Validation(format!(
                        "no free short link code for {source}"
                    )));
                }
                None => {
                    let link = Link::new(source, hash);
                    links.add(&link)?;
                    return Ok((link, LinkChange::Added));
                }
            }
        }
    }

    /// Resolve `hash` to its source address and count the access.
    ///
    /// Conflicting writers are retried up to the configured count within
    /// the configured timeout; running out of either yields
    /// `ConcurrencyExhausted`.
    pub async fn resolve_address(&self, hash: &str) -> Result<String> {
        let attempts = AtomicU32::new(0);
        match tokio::time::timeout(
            self.config.concurrency_timeout(),
            self.resolve_with_retry(hash, &attempts),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let attempts = attempts.load(Ordering::Relaxed);
                warn!(hash, attempts, "Timed out resolving short link");
                Err(SciError::ConcurrencyExhausted { attempts })
            }
        }
    }

    async fn resolve_with_retry(&self, hash: &str, attempts: &AtomicU32) -> Result<String> {
        loop {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.resolve_once(hash).await {
                Err(SciError::Concurrency(reason)) => {
                    if attempt >= self.config.concurrency_retry_count {
                        warn!(hash, attempt, "Giving up on short link after conflicts");
                        return Err(SciError::ConcurrencyExhausted { attempts: attempt });
                    }
                    debug!(hash, attempt, %reason, "retrying short link access");
                    tokio::time::sleep(Duration::from_millis(u64::from(attempt.min(10)) * 5)).await;
                }
                other => return other,
            }
        }
    }

    async fn resolve_once(&self, hash: &str) -> Result<String> {
        let uow = self.unit_of_work();
        let links = uow.repository::<Link>();
        let mut link = links
            .get_by_hash(hash, &QueryOptions::tracked())
            .await?
            .ok_or_else(|| SciError::NotFound(format!("Link {hash}")))?;
        link.touch();
        links.update(&link)?;
        uow.try_save_context().await?;
        Ok(link.source_address)
    }

    /// Soft delete the link for `hash`.
    pub async fn delete_link(&self, hash: &str) -> Result<()> {
        let uow = self.unit_of_work();
        let links = uow.repository::<Link>();
        let link = links
            .get_by_hash(hash, &QueryOptions::new())
            .await?
            .ok_or_else(|| SciError::NotFound(format!("Link {hash}")))?;
        links.delete(&link)?;
        uow.try_save_context().await?;
        info!(hash, "deleted short link");
        Ok(())
    }

    /// Load the link for `hash` without counting an access.
    pub async fn get(&self, hash: &str) -> Result<Option<Link>> {
        let uow = self.unit_of_work();
        uow.repository::<Link>()
            .get_by_hash(hash, &QueryOptions::new())
            .await
    }

    pub async fn add_link(&self, source: &str) -> ServiceResult<Link> {
        self.register(source).await.into()
    }

    pub async fn resolve(&self, hash: &str) -> ServiceResult<String> {
        self.resolve_address(hash).await.into()
    }

    pub async fn delete(&self, hash: &str) -> ServiceResult<()> {
        self.delete_link(hash).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ResultCode;
    use tempfile::TempDir;

    async fn service(config: LinksConfig) -> (TempDir, LinkShortService) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_sqlite(dir.path().join("links.db")).await.unwrap();
        db.migrate().await.unwrap();
        (dir, LinkShortService::new(db, config))
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            link_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_register_uses_digest_prefix() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let link = links.register("https://example.org/a").await.unwrap();
        assert_eq!(link.hash.len(), 8);
        assert!(link_digest("https://example.org/a").starts_with(&link.hash));
    }

    #[tokio::test]
    async fn test_register_twice_returns_same_link() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let first = links.register("https://example.org/a").await.unwrap();
        let second = links.register("  https://example.org/a ").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_collision_widens_code() {
        let config = LinksConfig {
            hash_length: 1,
            ..LinksConfig::default()
        };
        let (_dir, links) = service(config).await;

        // find two addresses whose digests share the first hex digit
        let first = "https://example.org/0";
        let lead = &link_digest(first)[..1];
        let second = (1..)
            .map(|i| format!("https://example.org/{i}"))
            .find(|s| link_digest(s).starts_with(lead))
            .unwrap();

        let a = links.register(first).await.unwrap();
        let b = links.register(&second).await.unwrap();
        assert_eq!(a.hash.len(), 1);
        assert_eq!(b.hash.len(), 3);
        assert_ne!(a.hash, b.hash);
    }

    #[tokio::test]
    async fn test_resolve_counts_access() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let link = links.register("https://example.org/doc").await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                links.resolve_address(&link.hash).await.unwrap(),
                "https://example.org/doc"
            );
        }
        let stored = links.get(&link.hash).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 3);
        assert_eq!(stored.row_version, 3);
        assert!(stored.last_access.is_some());
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let result = links.resolve("deadbeef").await;
        assert!(!result.succeeded);
        assert_eq!(result.code, ResultCode::NotFound);
    }

    #[tokio::test]
    async fn test_delete_then_register_revives() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let link = links.register("https://example.org/old").await.unwrap();
        assert!(links.delete(&link.hash).await.succeeded);
        assert!(links.get(&link.hash).await.unwrap().is_none());
        assert!(links.resolve(&link.hash).await.is_not_found());

        let revived = links.register("https://example.org/old").await.unwrap();
        assert_eq!(revived.id, link.id);
        assert!(!revived.is_deleted);
        assert!(links.get(&link.hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let (_dir, links) = service(LinksConfig::default()).await;
        let result = links.add_link("   ").await;
        assert_eq!(result.code, ResultCode::Validation);
    }
}
