//! Synchronous forms of the database API.
//!
//! Each wrapper drives the async implementation on a current-thread runtime
//! owned by [`BlockingDatabase`]. The pool is created on that runtime, so
//! these types must not be used from inside another async runtime.

use std::path::Path;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use super::{
    Database, DbInitializer, Entity, EntityId, Hashed, InitReport, Named, Page, PageRequest,
    QueryOptions, Repository, TransactionState, UnitOfWork,
};
use crate::config::DatabaseConfig;
use crate::models::{Category, CategoryTree, Resource};
use crate::Result;

fn runtime() -> Result<Arc<Runtime>> {
    Ok(Arc::new(
        Builder::new_current_thread().enable_all().build()?,
    ))
}

/// A [`Database`] together with the runtime that drives it.
pub struct BlockingDatabase {
    runtime: Arc<Runtime>,
    db: Database,
}

impl BlockingDatabase {
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let runtime = runtime()?;
        let db = runtime.block_on(Database::connect(config))?;
        Ok(Self { runtime, db })
    }

    pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let runtime = runtime()?;
        let db = runtime.block_on(Database::open_sqlite(path))?;
        Ok(Self { runtime, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn migrate(&self) -> Result<usize> {
        self.runtime.block_on(self.db.migrate())
    }

    pub fn initialize(&self, config: &DatabaseConfig) -> Result<InitReport> {
        let initializer = DbInitializer::from_config(self.db.clone(), config);
        self.runtime.block_on(initializer.initialize())
    }

    pub fn unit_of_work(&self) -> BlockingUnitOfWork {
        BlockingUnitOfWork {
            runtime: Arc::clone(&self.runtime),
            inner: UnitOfWork::new(self.db.clone()),
        }
    }

    pub fn close(&self) {
        self.runtime.block_on(self.db.close());
    }
}

/// Blocking [`UnitOfWork`].
pub struct BlockingUnitOfWork {
    runtime: Arc<Runtime>,
    inner: UnitOfWork,
}

impl BlockingUnitOfWork {
    pub fn repository<T: Entity>(&self) -> BlockingRepository<T> {
        BlockingRepository {
            runtime: Arc::clone(&self.runtime),
            inner: self.inner.repository::<T>(),
        }
    }

    pub fn save_context(&self) -> Result<u64> {
        self.runtime.block_on(self.inner.save_context())
    }

    pub fn try_save_context(&self) -> Result<u64> {
        self.runtime.block_on(self.inner.try_save_context())
    }

    pub fn has_changes(&self) -> bool {
        self.inner.has_changes()
    }

    pub fn discard_changes(&self) {
        self.inner.discard_changes();
    }

    pub fn begin_transaction(&self, use_if_exists: bool) -> Result<TransactionState> {
        self.runtime
            .block_on(self.inner.begin_transaction(use_if_exists))
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.runtime.block_on(self.inner.commit_transaction())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback_transaction())
    }

    pub fn in_transaction(&self) -> bool {
        self.runtime.block_on(self.inner.in_transaction())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn dispose(&self) -> Result<()> {
        self.runtime.block_on(self.inner.dispose())
    }
}

impl Drop for BlockingUnitOfWork {
    fn drop(&mut self) {
        // roll back an open transaction while the runtime is still reachable
        if let Err(e) = self.runtime.block_on(self.inner.dispose()) {
            warn!(error = %e, "Failed to dispose unit of work on drop");
        }
    }
}

/// Blocking [`Repository`].
pub struct BlockingRepository<T: Entity> {
    runtime: Arc<Runtime>,
    inner: Arc<Repository<T>>,
}

impl<T: Entity> BlockingRepository<T> {
    pub fn get_by_id(&self, id: EntityId, options: &QueryOptions) -> Result<Option<T>> {
        self.runtime.block_on(self.inner.get_by_id(id, options))
    }

    pub fn get_all(&self, options: &QueryOptions) -> Result<Vec<T>> {
        self.runtime.block_on(self.inner.get_all(options))
    }

    pub fn get_page(&self, request: PageRequest, options: &QueryOptions) -> Result<Page<T>> {
        self.runtime.block_on(self.inner.get_page(request, options))
    }

    pub fn count(&self) -> Result<u64> {
        self.runtime.block_on(self.inner.count())
    }

    pub fn exists(&self, id: EntityId) -> Result<bool> {
        self.runtime.block_on(self.inner.exists(id))
    }

    pub fn add(&self, entity: &T) -> Result<()> {
        self.inner.add(entity)
    }

    pub fn update(&self, entity: &T) -> Result<()> {
        self.inner.update(entity)
    }

    pub fn delete(&self, entity: &T) -> Result<()> {
        self.inner.delete(entity)
    }

    pub fn delete_by_id(&self, id: EntityId) -> Result<()> {
        self.inner.delete_by_id(id)
    }
}

impl<T: Named> BlockingRepository<T> {
    pub fn get_by_name(&self, name: &str, options: &QueryOptions) -> Result<Option<T>> {
        self.runtime.block_on(self.inner.get_by_name(name, options))
    }
}

impl<T: Hashed> BlockingRepository<T> {
    pub fn get_by_hash(&self, hash: &str, options: &QueryOptions) -> Result<Option<T>> {
        self.runtime.block_on(self.inner.get_by_hash(hash, options))
    }
}

impl<T: Resource> BlockingRepository<T> {
    pub fn attach_tag(&self, resource_id: EntityId, tag_id: EntityId) -> Result<()> {
        self.inner.attach_tag(resource_id, tag_id)
    }

    pub fn detach_tag(&self, resource_id: EntityId, tag_id: EntityId) -> Result<()> {
        self.inner.detach_tag(resource_id, tag_id)
    }

    pub fn attach_category(&self, resource_id: EntityId, category_id: EntityId) -> Result<()> {
        self.inner.attach_category(resource_id, category_id)
    }

    pub fn detach_category(&self, resource_id: EntityId, category_id: EntityId) -> Result<()> {
        self.inner.detach_category(resource_id, category_id)
    }
}

impl BlockingRepository<Category> {
    pub fn get_tree(&self, root_id: EntityId) -> Result<Option<CategoryTree>> {
        self.runtime.block_on(self.inner.get_tree(root_id))
    }
}
