//! Unit of work.
//!
//! A [`UnitOfWork`] owns the connection scope of one logical request. It
//! hands out one [`Repository`] per entity type, collects the mutations
//! those repositories stage, and writes them in a single transaction when
//! the context is saved. All repositories of a unit share its
//! [`DbContext`], and with it the open transaction and the cancellation
//! token.

use std::any::{Any as StdAny, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::entity::{select_columns, Entity, EntityId};
use super::provider::Provider;
use super::repository::{select, JoinTable, Repository};
use super::sql::{AnyRowExt, SqlBuilder, SqlValue, Statement};
use super::Database;
use crate::{Result, SciError};

pub(crate) type EntityKey = (TypeId, EntityId);

type Shared = Arc<dyn StdAny + Send + Sync>;

/// Kind of change a staged statement applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
    Linked,
    Unlinked,
}

/// Post-condition checked against the affected row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowCheck {
    None,
    /// The target row must exist.
    Exists,
    /// The concurrency token must still match.
    Version,
}

/// One staged write.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub state: EntityState,
    pub kind: &'static str,
    pub statement: Statement,
    pub check: RowCheck,
    /// Whether affected rows count towards the saved total.
    pub counted: bool,
}

impl Change {
    pub fn new(state: EntityState, kind: &'static str, statement: Statement, check: RowCheck) -> Self {
        Self {
            state,
            kind,
            statement,
            check,
            counted: true,
        }
    }

    pub fn uncounted(mut self) -> Self {
        self.counted = false;
        self
    }
}

/// Latest staged value of an entity.
#[derive(Clone)]
pub(crate) enum Staged {
    Present(Shared),
    Deleted,
}

#[derive(Default)]
struct ChangeSet {
    entries: Vec<Change>,
    staged: HashMap<EntityKey, Staged>,
}

#[derive(Default)]
struct TransactionSlot {
    tx: Option<Transaction<'static, Any>>,
    depth: u32,
}

/// Outcome of [`UnitOfWork::begin_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// A new transaction was opened.
    Started,
    /// An open transaction was joined.
    Joined,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scope shared by every repository of one unit of work.
pub struct DbContext {
    db: Database,
    transaction: tokio::sync::Mutex<TransactionSlot>,
    changes: Mutex<ChangeSet>,
    tracked: Mutex<HashMap<EntityKey, Shared>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl DbContext {
    fn new(db: Database, cancel: CancellationToken) -> Self {
        Self {
            db,
            transaction: tokio::sync::Mutex::new(TransactionSlot::default()),
            changes: Mutex::new(ChangeSet::default()),
            tracked: Mutex::new(HashMap::new()),
            cancel,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn provider(&self) -> Provider {
        self.db.provider()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn builder(&self, init: impl Into<String>) -> SqlBuilder {
        SqlBuilder::new(self.provider(), init)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SciError::Disposed);
        }
        Ok(())
    }

    /// Run `fut` unless the scope is disposed, racing it against cancellation.
    async fn guard<R>(&self, operation: &str, fut: impl Future<Output = Result<R>>) -> Result<R> {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(operation, "Database operation cancelled");
                Err(SciError::Cancelled)
            }
            result = fut => result,
        }
    }

    pub(crate) async fn fetch_all(&self, statement: &Statement) -> Result<Vec<AnyRow>> {
        self.guard("query", async {
            debug!(sql = statement.sql(), "query");
            let mut slot = self.transaction.lock().await;
            let rows = match slot.tx.as_mut() {
                Some(tx) => statement.query().fetch_all(&mut **tx).await?,
                None => statement.query().fetch_all(self.db.pool()).await?,
            };
            Ok(rows)
        })
        .await
    }

    pub(crate) async fn fetch_optional(&self, statement: &Statement) -> Result<Option<AnyRow>> {
        self.guard("query", async {
            debug!(sql = statement.sql(), "query");
            let mut slot = self.transaction.lock().await;
            let row = match slot.tx.as_mut() {
                Some(tx) => statement.query().fetch_optional(&mut **tx).await?,
                None => statement.query().fetch_optional(self.db.pool()).await?,
            };
            Ok(row)
        })
        .await
    }

    /// Run a statement selecting a single `cnt` column.
    pub(crate) async fn fetch_count(&self, statement: &Statement) -> Result<u64> {
        let count = match self.fetch_optional(statement).await? {
            Some(row) => row.int("cnt")?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Load a live entity by id, bypassing staged changes.
    pub async fn find<T: Entity>(&self, id: EntityId) -> Result<Option<T>> {
        let mut b = select::<T>(self.provider(), false);
        b.push(" AND id = ").push_bind(id);
        match self.fetch_optional(&b.build()).await? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Load live entities whose `column` equals `value`, ordered by id.
    pub async fn find_by<T: Entity>(
        &self,
        column: &str,
        value: impl Into<SqlValue>,
    ) -> Result<Vec<T>> {
        let mut b = select::<T>(self.provider(), false);
        b.push(" AND ")
            .push(column)
            .push(" = ")
            .push_bind(value)
            .push(" ORDER BY id");
        self.fetch_all(&b.build())
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Load live entities associated with `owner_id` through a join table.
    pub async fn find_linked<T: Entity>(&self, join: &JoinTable, owner_id: EntityId) -> Result<Vec<T>> {
        let mut b = self.builder(format!(
            "SELECT {} FROM {} t INNER JOIN {} l ON l.{} = t.id WHERE l.{} = ",
            select_columns::<T>(Some("t")),
            T::TABLE,
            join.table,
            join.target_column,
            join.owner_column,
        ));
        b.push_bind(owner_id)
            .push(" AND l.is_deleted = ")
            .push_bind(false)
            .push(" AND t.is_deleted = ")
            .push_bind(false);
        if let Some((column, value)) = T::DISCRIMINATOR {
            b.push(&format!(" AND t.{column} = ")).push_bind(value);
        }
        b.push(" ORDER BY t.id");
        self.fetch_all(&b.build())
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Ids associated with `owner_id` through a join table.
    pub async fn find_linked_ids(&self, join: &JoinTable, owner_id: EntityId) -> Result<Vec<EntityId>> {
        let mut b = self.builder(format!(
            "SELECT {} AS target_id FROM {} WHERE {} = ",
            join.target_column, join.table, join.owner_column
        ));
        b.push_bind(owner_id)
            .push(" AND is_deleted = ")
            .push_bind(false)
            .push(&format!(" ORDER BY {}", join.target_column));
        self.fetch_all(&b.build())
            .await?
            .iter()
            .map(|row| row.id("target_id"))
            .collect()
    }

    pub(crate) fn stage(&self, change: Change, staged: Option<(EntityKey, Staged)>) -> Result<()> {
        self.ensure_open()?;
        debug!(kind = change.kind, state = ?change.state, "staged change");
        let mut changes = lock(&self.changes);
        changes.entries.push(change);
        if let Some((key, value)) = staged {
            changes.staged.insert(key, value);
        }
        Ok(())
    }

    pub(crate) fn staged<T: Entity>(&self, id: EntityId) -> Option<Staged> {
        lock(&self.changes)
            .staged
            .get(&(TypeId::of::<T>(), id))
            .cloned()
    }

    pub(crate) fn staged_of<T: Entity>(&self) -> Vec<(EntityId, Staged)> {
        lock(&self.changes)
            .staged
            .iter()
            .filter(|((type_id, _), _)| *type_id == TypeId::of::<T>())
            .map(|((_, id), staged)| (*id, staged.clone()))
            .collect()
    }

    /// Remember the loaded state of an entity.
    pub(crate) fn track<T: Entity>(&self, entity: &T) {
        lock(&self.tracked).insert((TypeId::of::<T>(), entity.id()), Arc::new(entity.clone()));
    }

    /// Whether `entity` equals its latest known state: the last staged value
    /// if there is one, the tracked snapshot otherwise.
    pub(crate) fn is_unchanged<T: Entity>(&self, entity: &T) -> bool {
        let key = (TypeId::of::<T>(), entity.id());
        if let Some(staged) = lock(&self.changes).staged.get(&key) {
            return match staged {
                Staged::Present(latest) => latest.downcast_ref::<T>() == Some(entity),
                Staged::Deleted => false,
            };
        }
        lock(&self.tracked)
            .get(&key)
            .and_then(|snapshot| snapshot.downcast_ref::<T>())
            .is_some_and(|snapshot| snapshot == entity)
    }

    pub(crate) fn has_changes(&self) -> bool {
        !lock(&self.changes).entries.is_empty()
    }

    pub(crate) fn discard_changes(&self) {
        let mut changes = lock(&self.changes);
        changes.entries.clear();
        changes.staged.clear();
    }

    /// Write every staged change.
    ///
    /// Inside an explicit transaction the writes join it, otherwise they run
    /// in a transaction of their own. Any failure leaves nothing applied.
    pub(crate) async fn flush(&self) -> Result<u64> {
        self.ensure_open()?;
        let entries = lock(&self.changes).entries.clone();
        if entries.is_empty() {
            return Ok(0);
        }

        let result = self
            .guard("save", async {
                let mut slot = self.transaction.lock().await;
                match slot.tx.as_mut() {
                    Some(tx) => apply(&mut **tx, &entries).await,
                    None => {
                        let mut tx = self.db.pool().begin().await?;
                        let affected = apply(&mut *tx, &entries).await?;
                        tx.commit().await?;
                        Ok(affected)
                    }
                }
            })
            .await;

        match result {
            Ok(affected) => {
                let staged = {
                    let mut changes = lock(&self.changes);
                    changes.entries.drain(..entries.len());
                    std::mem::take(&mut changes.staged)
                };
                let mut tracked = lock(&self.tracked);
                for (key, value) in staged {
                    match value {
                        Staged::Present(entity) => {
                            tracked.insert(key, entity);
                        }
                        Staged::Deleted => {
                            tracked.remove(&key);
                        }
                    }
                }
                debug!(changes = entries.len(), affected, "saved changes");
                Ok(affected)
            }
            Err(e) => {
                let mut slot = self.transaction.lock().await;
                if let Some(tx) = slot.tx.take() {
                    slot.depth = 0;
                    warn!(error = %e, "Rolling back transaction after failed save");
                    if let Err(rollback) = tx.rollback().await {
                        error!(error = %rollback, "Rollback failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn begin(&self, use_if_exists: bool) -> Result<TransactionState> {
        self.guard("begin transaction", async {
            let mut slot = self.transaction.lock().await;
            if slot.tx.is_some() {
                if !use_if_exists {
                    return Err(SciError::TransactionInProgress);
                }
                slot.depth += 1;
                debug!(depth = slot.depth, "joined transaction");
                return Ok(TransactionState::Joined);
            }
            slot.tx = Some(self.db.pool().begin().await?);
            slot.depth = 1;
            debug!("started transaction");
            Ok(TransactionState::Started)
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.guard("commit transaction", async {
            let mut slot = self.transaction.lock().await;
            if slot.tx.is_none() {
                return Err(SciError::NoTransaction);
            }
            if slot.depth > 1 {
                // the outermost caller commits
                slot.depth -= 1;
                return Ok(());
            }
            slot.depth = 0;
            if let Some(tx) = slot.tx.take() {
                tx.commit().await?;
                debug!("committed transaction");
            }
            Ok(())
        })
        .await
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let tx = {
            let mut slot = self.transaction.lock().await;
            slot.depth = 0;
            slot.tx.take()
        };
        let tx = tx.ok_or(SciError::NoTransaction)?;
        tx.rollback().await?;
        debug!("rolled back transaction");
        Ok(())
    }

    async fn in_transaction(&self) -> bool {
        self.transaction.lock().await.tx.is_some()
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let tx = {
            let mut slot = self.transaction.lock().await;
            slot.depth = 0;
            slot.tx.take()
        };
        {
            let mut changes = lock(&self.changes);
            if !changes.entries.is_empty() {
                warn!(
                    pending = changes.entries.len(),
                    "Disposing unit of work with unsaved changes"
                );
            }
            changes.entries.clear();
            changes.staged.clear();
        }
        lock(&self.tracked).clear();
        if let Some(tx) = tx {
            debug!("rolling back open transaction on dispose");
            tx.rollback().await?;
        }
        Ok(())
    }
}

async fn apply(conn: &mut AnyConnection, entries: &[Change]) -> Result<u64> {
    let mut affected = 0;
    for change in entries {
        debug!(sql = change.statement.sql(), state = ?change.state, "apply");
        let rows = change
            .statement
            .query()
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if rows == 0 {
            match change.check {
                RowCheck::Version => {
                    return Err(SciError::Concurrency(format!(
                        "{} was changed by another writer",
                        change.kind
                    )))
                }
                RowCheck::Exists => return Err(SciError::NotFound(change.kind.to_string())),
                RowCheck::None => {}
            }
        }
        if change.counted {
            affected += rows;
        }
    }
    Ok(affected)
}

/// Per-request aggregator of repositories and their pending changes.
pub struct UnitOfWork {
    context: Arc<DbContext>,
    repositories: Mutex<HashMap<TypeId, Shared>>,
}

impl UnitOfWork {
    pub fn new(db: Database) -> Self {
        Self::with_cancellation(db, CancellationToken::new())
    }

    /// Create a unit of work whose operations observe `token`.
    pub fn with_cancellation(db: Database, token: CancellationToken) -> Self {
        Self {
            context: Arc::new(DbContext::new(db, token)),
            repositories: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<DbContext> {
        &self.context
    }

    /// The repository for `T`, created on first use and cached afterwards.
    pub fn repository<T: Entity>(&self) -> Arc<Repository<T>> {
        let mut repositories = lock(&self.repositories);
        if let Some(existing) = repositories.get(&TypeId::of::<T>()) {
            if let Ok(repository) = Arc::clone(existing).downcast::<Repository<T>>() {
                return repository;
            }
        }
        let repository = Arc::new(Repository::<T>::new(Arc::clone(&self.context)));
        repositories.insert(TypeId::of::<T>(), repository.clone() as Shared);
        debug!(entity = T::KIND, "created repository");
        repository
    }

    /// Save staged changes, reporting persistence failures as zero rows.
    ///
    /// A batch that fails this way is dropped, so later saves only carry
    /// changes staged afterwards. Cancellation and concurrency conflicts are
    /// still returned as errors and keep the batch. Use
    /// [`UnitOfWork::try_save_context`] to observe every failure.
    pub async fn save_context(&self) -> Result<u64> {
        match self.context.flush().await {
            Ok(affected) => Ok(affected),
            Err(e) if e.is_persistence_failure() => {
                error!(error = %e, "Failed to save changes, discarding them");
                self.context.discard_changes();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Save staged changes and return the number of affected rows.
    pub async fn try_save_context(&self) -> Result<u64> {
        self.context.flush().await
    }

    pub fn has_changes(&self) -> bool {
        self.context.has_changes()
    }

    /// Drop staged changes without writing them.
    pub fn discard_changes(&self) {
        self.context.discard_changes();
    }

    /// Open a transaction, or join the open one when `use_if_exists` is set.
    pub async fn begin_transaction(&self, use_if_exists: bool) -> Result<TransactionState> {
        self.context.begin(use_if_exists).await
    }

    pub async fn commit_transaction(&self) -> Result<()> {
        self.context.commit().await
    }

    pub async fn rollback_transaction(&self) -> Result<()> {
        self.context.rollback().await
    }

    pub async fn in_transaction(&self) -> bool {
        self.context.in_transaction().await
    }

    pub fn is_disposed(&self) -> bool {
        self.context.disposed.load(Ordering::SeqCst)
    }

    /// Release the scope. An open transaction is rolled back and staged
    /// changes are dropped. Calling this more than once is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        self.context.dispose().await?;
        lock(&self.repositories).clear();
        Ok(())
    }
}
