//! Generic repository.
//!
//! One [`Repository`] exists per entity type and unit of work. Reads go
//! straight to the database (through the open transaction, if any); writes
//! are staged on the shared [`DbContext`] and only reach the database when
//! the unit of work is saved.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::entity::{select_columns, Entity, EntityId, Hashed, Named, QueryOptions};
use super::pagination::{Page, PageRequest};
use super::provider::Provider;
use super::sql::SqlBuilder;
use super::unit_of_work::{Change, DbContext, EntityState, RowCheck, Staged};
use crate::models::Resource;
use crate::Result;

/// Association table between two entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTable {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub target_column: &'static str,
}

impl JoinTable {
    /// Resource to tag.
    pub const RESOURCE_TAGS: JoinTable = JoinTable {
        table: "resource_tags",
        owner_column: "resource_id",
        target_column: "tag_id",
    };

    /// Resource to category.
    pub const RESOURCE_CATEGORIES: JoinTable = JoinTable {
        table: "resource_categories",
        owner_column: "resource_id",
        target_column: "category_id",
    };

    /// The same table walked from the other side.
    pub const fn reversed(self) -> JoinTable {
        JoinTable {
            table: self.table,
            owner_column: self.target_column,
            target_column: self.owner_column,
        }
    }
}

/// Start a `SELECT` of `T` with the discriminator and soft-delete filters.
///
/// Callers append further `AND` conditions.
pub(crate) fn select<T: Entity>(provider: Provider, include_deleted: bool) -> SqlBuilder {
    let mut b = SqlBuilder::new(
        provider,
        format!(
            "SELECT {} FROM {} WHERE 1 = 1",
            select_columns::<T>(None),
            T::TABLE
        ),
    );
    filter::<T>(&mut b, include_deleted);
    b
}

fn count<T: Entity>(provider: Provider, include_deleted: bool) -> SqlBuilder {
    let mut b = SqlBuilder::new(
        provider,
        format!("SELECT COUNT(*) AS cnt FROM {} WHERE 1 = 1", T::TABLE),
    );
    filter::<T>(&mut b, include_deleted);
    b
}

fn filter<T: Entity>(b: &mut SqlBuilder, include_deleted: bool) {
    if let Some((column, value)) = T::DISCRIMINATOR {
        b.push(&format!(" AND {column} = ")).push_bind(value);
    }
    if !include_deleted {
        b.push(" AND is_deleted = ").push_bind(false);
    }
}

/// Append `WHERE id = ?` plus the discriminator and, for versioned
/// entities, the expected concurrency token.
fn where_id<T: Entity>(b: &mut SqlBuilder, id: EntityId, version: Option<i64>) {
    b.push(" WHERE id = ").push_bind(id);
    if let Some((column, value)) = T::DISCRIMINATOR {
        b.push(&format!(" AND {column} = ")).push_bind(value);
    }
    if let (Some(column), Some(version)) = (T::VERSION_COLUMN, version) {
        b.push(&format!(" AND {column} = ")).push_bind(version);
    }
}

fn bump_version<T: Entity>(b: &mut SqlBuilder) {
    if let Some(column) = T::VERSION_COLUMN {
        b.push(&format!(", {column} = {column} + 1"));
    }
}

/// Data access for one entity type within a unit of work.
pub struct Repository<T: Entity> {
    ctx: Arc<DbContext>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(ctx: Arc<DbContext>) -> Self {
        Self {
            ctx,
            _marker: PhantomData,
        }
    }

    pub(crate) fn context(&self) -> &DbContext {
        &self.ctx
    }

    fn key(id: EntityId) -> (TypeId, EntityId) {
        (TypeId::of::<T>(), id)
    }

    /// Load includes and register the result when tracking.
    async fn finish(&self, entity: &mut T, options: &QueryOptions) -> Result<()> {
        for include in &options.includes {
            entity.load_include(&self.ctx, *include).await?;
        }
        if options.tracking {
            self.ctx.track(entity);
        }
        Ok(())
    }

    async fn load_one(&self, b: SqlBuilder, options: &QueryOptions) -> Result<Option<T>> {
        let Some(row) = self.ctx.fetch_optional(&b.build()).await? else {
            return Ok(None);
        };
        let mut entity = T::from_row(&row)?;
        self.finish(&mut entity, options).await?;
        Ok(Some(entity))
    }

    async fn load_many(&self, b: SqlBuilder) -> Result<Vec<T>> {
        self.ctx
            .fetch_all(&b.build())
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Get an entity by id.
    ///
    /// With tracking enabled, changes staged in this unit of work are
    /// visible before they are saved.
    pub async fn get_by_id(&self, id: EntityId, options: &QueryOptions) -> Result<Option<T>> {
        self.ctx.ensure_open()?;
        if options.tracking {
            match self.ctx.staged::<T>(id) {
                Some(Staged::Present(value)) => {
                    if let Some(staged) = value.downcast_ref::<T>() {
                        if staged.is_deleted() && !options.include_deleted {
                            return Ok(None);
                        }
                        let mut entity = staged.clone();
                        for include in &options.includes {
                            entity.load_include(&self.ctx, *include).await?;
                        }
                        return Ok(Some(entity));
                    }
                }
                Some(Staged::Deleted) if !options.include_deleted => return Ok(None),
                _ => {}
            }
        }

        let mut b = select::<T>(self.ctx.provider(), options.include_deleted);
        b.push(" AND id = ").push_bind(id);
        self.load_one(b, options).await
    }

    /// Get every entity, ordered by id.
    pub async fn get_all(&self, options: &QueryOptions) -> Result<Vec<T>> {
        self.ctx.ensure_open()?;
        let mut b = select::<T>(self.ctx.provider(), options.include_deleted);
        b.push(" ORDER BY id");
        let mut items = self.load_many(b).await?;

        if options.tracking {
            self.overlay_staged(&mut items, options.include_deleted);
        }
        for item in &mut items {
            self.finish(item, options).await?;
        }
        Ok(items)
    }

    fn overlay_staged(&self, items: &mut Vec<T>, include_deleted: bool) {
        let staged = self.ctx.staged_of::<T>();
        if staged.is_empty() {
            return;
        }
        for (id, value) in staged {
            let position = items.iter().position(|item| item.id() == id);
            let entity = match &value {
                Staged::Present(shared) => shared.downcast_ref::<T>().cloned(),
                Staged::Deleted => None,
            };
            match (entity, position) {
                (Some(entity), _) if entity.is_deleted() && !include_deleted => {
                    if let Some(position) = position {
                        items.remove(position);
                    }
                }
                (Some(entity), Some(position)) => items[position] = entity,
                (Some(entity), None) => items.push(entity),
                (None, Some(position)) if !include_deleted => {
                    items.remove(position);
                }
                (None, _) => {}
            }
        }
        items.sort_by_key(|item| item.id());
    }

    /// Get one page of entities ordered by id.
    pub async fn get_page(&self, request: PageRequest, options: &QueryOptions) -> Result<Page<T>> {
        request.validate()?;
        let total_count = self.count_rows(options.include_deleted).await?;

        let mut b = select::<T>(self.ctx.provider(), options.include_deleted);
        b.push(" ORDER BY id LIMIT ")
            .push_bind(i64::from(request.page_size))
            .push(" OFFSET ")
            .push_bind(request.offset());
        let mut items = self.load_many(b).await?;
        for item in &mut items {
            self.finish(item, options).await?;
        }

        Ok(Page {
            items,
            page_number: request.page_number,
            page_size: request.page_size,
            total_count,
        })
    }

    async fn count_rows(&self, include_deleted: bool) -> Result<u64> {
        self.ctx.ensure_open()?;
        let b = count::<T>(self.ctx.provider(), include_deleted);
        self.ctx.fetch_count(&b.build()).await
    }

    /// Number of live entities.
    pub async fn count(&self) -> Result<u64> {
        self.count_rows(false).await
    }

    /// Whether a live entity with `id` exists.
    pub async fn exists(&self, id: EntityId) -> Result<bool> {
        self.ctx.ensure_open()?;
        let mut b = count::<T>(self.ctx.provider(), false);
        b.push(" AND id = ").push_bind(id);
        Ok(self.ctx.fetch_count(&b.build()).await? > 0)
    }

    /// Stage an insert.
    pub fn add(&self, entity: &T) -> Result<()> {
        let mut columns = vec!["id"];
        if let Some((column, _)) = T::DISCRIMINATOR {
            columns.push(column);
        }
        columns.push("is_deleted");
        columns.extend_from_slice(T::COLUMNS);

        let mut b = self.ctx.builder(format!(
            "INSERT INTO {} ({}) VALUES (",
            T::TABLE,
            columns.join(", ")
        ));
        b.push_bind(entity.id());
        if let Some((_, value)) = T::DISCRIMINATOR {
            b.push(", ").push_bind(value);
        }
        b.push(", ").push_bind(entity.is_deleted());
        for value in entity.values() {
            b.push(", ").push_bind(value);
        }
        b.push(")");

        self.ctx.stage(
            Change::new(EntityState::Added, T::KIND, b.build(), RowCheck::None),
            Some((
                Self::key(entity.id()),
                Staged::Present(Arc::new(entity.clone())),
            )),
        )
    }

    /// Stage a full-record update.
    ///
    /// Versioned entities are only written while their token still matches
    /// the stored one. Updates equal to the latest staged or tracked state
    /// are skipped.
    pub fn update(&self, entity: &T) -> Result<()> {
        self.ctx.ensure_open()?;
        if self.ctx.is_unchanged(entity) {
            debug!(kind = T::KIND, id = %entity.id(), "update skipped, entity unchanged");
            return Ok(());
        }

        let mut b = self.ctx.builder(format!("UPDATE {} SET is_deleted = ", T::TABLE));
        b.push_bind(entity.is_deleted());
        for (column, value) in T::COLUMNS.iter().zip(entity.values()) {
            if Some(*column) == T::VERSION_COLUMN {
                continue;
            }
            b.push(&format!(", {column} = ")).push_bind(value);
        }
        bump_version::<T>(&mut b);
        where_id::<T>(&mut b, entity.id(), entity.version());

        self.ctx.stage(
            Change::new(EntityState::Modified, T::KIND, b.build(), Self::row_check()),
            Some((
                Self::key(entity.id()),
                Staged::Present(Arc::new(entity.clone())),
            )),
        )
    }

    /// Stage a soft delete of `entity`.
    pub fn delete(&self, entity: &T) -> Result<()> {
        let mut deleted = entity.clone();
        deleted.set_deleted(true);

        let mut b = self.ctx.builder(format!("UPDATE {} SET is_deleted = ", T::TABLE));
        b.push_bind(true);
        bump_version::<T>(&mut b);
        where_id::<T>(&mut b, entity.id(), entity.version());

        self.ctx.stage(
            Change::new(EntityState::Deleted, T::KIND, b.build(), Self::row_check()),
            Some((Self::key(entity.id()), Staged::Present(Arc::new(deleted)))),
        )
    }

    /// Stage a soft delete by id.
    ///
    /// Saving fails with `NotFound` if no such row exists.
    pub fn delete_by_id(&self, id: EntityId) -> Result<()> {
        let mut b = self.ctx.builder(format!("UPDATE {} SET is_deleted = ", T::TABLE));
        b.push_bind(true);
        bump_version::<T>(&mut b);
        where_id::<T>(&mut b, id, None);

        self.ctx.stage(
            Change::new(EntityState::Deleted, T::KIND, b.build(), RowCheck::Exists),
            Some((Self::key(id), Staged::Deleted)),
        )
    }

    fn row_check() -> RowCheck {
        if T::VERSION_COLUMN.is_some() {
            RowCheck::Version
        } else {
            RowCheck::Exists
        }
    }
}

impl<T: Named> Repository<T> {
    /// Get an entity by its unique name.
    pub async fn get_by_name(&self, name: &str, options: &QueryOptions) -> Result<Option<T>> {
        self.ctx.ensure_open()?;
        let mut b = select::<T>(self.ctx.provider(), options.include_deleted);
        b.push(&format!(" AND {} = ", T::NAME_COLUMN))
            .push_bind(name)
            .push(" ORDER BY id");
        self.load_one(b, options).await
    }
}

impl<T: Hashed> Repository<T> {
    /// Get the first entity carrying `hash`.
    pub async fn get_by_hash(&self, hash: &str, options: &QueryOptions) -> Result<Option<T>> {
        self.ctx.ensure_open()?;
        let mut b = select::<T>(self.ctx.provider(), options.include_deleted);
        b.push(&format!(" AND {} = ", T::HASH_COLUMN))
            .push_bind(hash)
            .push(" ORDER BY id");
        self.load_one(b, options).await
    }
}

impl<T: Resource> Repository<T> {
    pub fn attach_tag(&self, resource_id: EntityId, tag_id: EntityId) -> Result<()> {
        self.link(&JoinTable::RESOURCE_TAGS, resource_id, tag_id)
    }

    pub fn detach_tag(&self, resource_id: EntityId, tag_id: EntityId) -> Result<()> {
        self.unlink(&JoinTable::RESOURCE_TAGS, resource_id, tag_id)
    }

    pub fn attach_category(&self, resource_id: EntityId, category_id: EntityId) -> Result<()> {
        self.link(&JoinTable::RESOURCE_CATEGORIES, resource_id, category_id)
    }

    pub fn detach_category(&self, resource_id: EntityId, category_id: EntityId) -> Result<()> {
        self.unlink(&JoinTable::RESOURCE_CATEGORIES, resource_id, category_id)
    }

    fn link(&self, join: &JoinTable, owner: EntityId, target: EntityId) -> Result<()> {
        // replace any earlier, possibly detached, association row
        let mut clear = self.ctx.builder(format!(
            "DELETE FROM {} WHERE {} = ",
            join.table, join.owner_column
        ));
        clear
            .push_bind(owner)
            .push(&format!(" AND {} = ", join.target_column))
            .push_bind(target);
        self.ctx.stage(
            Change::new(EntityState::Linked, join.table, clear.build(), RowCheck::None).uncounted(),
            None,
        )?;

        let mut insert = self.ctx.builder(format!(
            "INSERT INTO {} ({}, {}, is_deleted) VALUES (",
            join.table, join.owner_column, join.target_column
        ));
        insert
            .push_bind(owner)
            .push(", ")
            .push_bind(target)
            .push(", ")
            .push_bind(false)
            .push(")");
        self.ctx.stage(
            Change::new(EntityState::Linked, join.table, insert.build(), RowCheck::None),
            None,
        )
    }

    fn unlink(&self, join: &JoinTable, owner: EntityId, target: EntityId) -> Result<()> {
        let mut b = self.ctx.builder(format!("UPDATE {} SET is_deleted = ", join.table));
        b.push_bind(true)
            .push(&format!(" WHERE {} = ", join.owner_column))
            .push_bind(owner)
            .push(&format!(" AND {} = ", join.target_column))
            .push_bind(target)
            .push(" AND is_deleted = ")
            .push_bind(false);
        self.ctx.stage(
            Change::new(EntityState::Unlinked, join.table, b.build(), RowCheck::Exists),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{File, Link, Tag};

    #[test]
    fn test_select_filters_soft_deleted_rows() {
        let stmt = select::<Tag>(Provider::Sqlite, false).build();
        assert_eq!(
            stmt.sql(),
            "SELECT id, is_deleted, name FROM tags WHERE 1 = 1 AND is_deleted = ?"
        );
        let stmt = select::<Tag>(Provider::Sqlite, true).build();
        assert!(!stmt.sql().contains("is_deleted ="));
    }

    #[test]
    fn test_select_applies_discriminator() {
        let stmt = select::<File>(Provider::PostgreSql, false).build();
        assert!(stmt
            .sql()
            .ends_with("WHERE 1 = 1 AND resource_type = $1 AND is_deleted = $2"));
    }

    #[test]
    fn test_versioned_where_clause() {
        let mut b = SqlBuilder::new(Provider::Sqlite, "UPDATE links SET is_deleted = ?");
        bump_version::<Link>(&mut b);
        where_id::<Link>(&mut b, EntityId::new(), Some(4));
        assert_eq!(
            b.build().sql(),
            "UPDATE links SET is_deleted = ?, row_version = row_version + 1 WHERE id = ? AND row_version = ?"
        );
    }

    #[test]
    fn test_unversioned_where_clause_ignores_version() {
        let mut b = SqlBuilder::new(Provider::Sqlite, "UPDATE tags SET is_deleted = ?");
        bump_version::<Tag>(&mut b);
        where_id::<Tag>(&mut b, EntityId::new(), Some(4));
        assert_eq!(b.build().sql(), "UPDATE tags SET is_deleted = ? WHERE id = ?");
    }

    #[test]
    fn test_join_table_reversed() {
        let reversed = JoinTable::RESOURCE_TAGS.reversed();
        assert_eq!(reversed.owner_column, "tag_id");
        assert_eq!(reversed.target_column, "resource_id");
    }
}
