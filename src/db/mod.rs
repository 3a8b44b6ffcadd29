//! Database module for SciMaterials.
//!
//! This module provides provider-independent connectivity, migration
//! management and the repository / unit-of-work layer on top of it.

pub mod blocking;
mod entity;
mod initializer;
mod pagination;
mod provider;
mod repository;
mod schema;
mod seed;
mod sql;
mod unit_of_work;

pub use entity::{Entity, EntityId, Hashed, Include, Named, QueryOptions};
pub use initializer::{DbInitializer, InitReport};
pub use pagination::{Page, PageRequest};
pub use provider::{PoolSettings, Provider, ProviderStrategy};
pub use repository::{JoinTable, Repository};
pub use schema::{DROP_ORDER, MIGRATIONS};
pub use seed::{seed, SeedReport};
pub use sql::{format_timestamp, parse_timestamp, AnyRowExt, SqlBuilder, SqlValue, Statement};
pub use unit_of_work::{DbContext, EntityState, TransactionState, UnitOfWork};

use std::path::Path;

use chrono::Utc;
use sqlx::{Any, AnyPool, Transaction};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::Result;

/// Connection pool bound to one provider.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    provider: Provider,
}

impl Database {
    /// Connect to the provider selected in `config`.
    ///
    /// Migrations are not applied; see [`Database::migrate`] and
    /// [`DbInitializer`].
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let provider = config.provider()?;
        let url = config.connection_string(provider)?;
        Self::connect_with(provider, url, config.pool_settings()).await
    }

    /// Connect to `url` using the strategy registered for `provider`.
    pub async fn connect_with(provider: Provider, url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = provider.strategy().connect(url, settings).await?;
        Ok(Self { pool, provider })
    }

    /// Open a SQLite database file, creating it and its directory if needed.
    pub async fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::connect_with(Provider::Sqlite, &url, PoolSettings::default()).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Begin a new transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        Ok(self.pool.begin().await?)
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        row.int("version")
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let row = sqlx::query(self.provider.strategy().table_exists_sql)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.int("cnt")? > 0)
    }

    /// Apply pending migrations and return how many were applied.
    pub async fn migrate(&self) -> Result<usize> {
        let current_version = usize::try_from(self.schema_version().await?).unwrap_or_default();
        let migrations = self.provider.strategy().migrations;

        if current_version >= migrations.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(0);
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            migrations.len()
        );

        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     BIGINT NOT NULL PRIMARY KEY,
                applied_at  VARCHAR(40) NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Apply each pending migration in a transaction
        for (i, migration) in migrations.iter().enumerate().skip(current_version) {
            let version = i64::try_from(i + 1).unwrap_or(i64::MAX);
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            for statement in migration.iter() {
                sqlx::raw_sql(statement).execute(&mut *tx).await?;
            }

            let mut record = SqlBuilder::new(
                self.provider,
                "INSERT INTO schema_version (version, applied_at) VALUES (",
            );
            record
                .push_bind(version)
                .push(", ")
                .push_bind(Utc::now())
                .push(")");
            record.build().query().execute(&mut *tx).await?;

            tx.commit().await?;
            debug!("Migration v{} applied successfully", version);
        }

        info!(
            "Database migration complete (now at version {})",
            migrations.len()
        );
        Ok(migrations.len() - current_version)
    }

    /// Drop every table of the schema, including the version table.
    ///
    /// Missing tables are ignored, so this is safe on an empty database.
    pub async fn drop_schema(&self) -> Result<()> {
        info!("Dropping database schema");
        for table in DROP_ORDER {
            let statement = format!("DROP TABLE IF EXISTS {table}");
            sqlx::raw_sql(&statement).execute(&self.pool).await?;
            debug!("Dropped table {}", table);
        }
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("provider", &self.provider)
            .finish()
    }
}
