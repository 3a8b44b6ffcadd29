//! Startup routine: optional delete, migrate, optional seed.

use serde::Serialize;
use tracing::{error, info};

use super::seed::{seed, SeedReport};
use super::Database;
use crate::config::DatabaseConfig;
use crate::Result;

/// What [`DbInitializer::initialize`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub removed: bool,
    pub migrations_applied: usize,
    pub seed: Option<SeedReport>,
}

/// Brings a database to the current schema.
#[derive(Debug, Clone)]
pub struct DbInitializer {
    db: Database,
    remove_at_start: bool,
    use_data_seeder: bool,
}

impl DbInitializer {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            remove_at_start: false,
            use_data_seeder: false,
        }
    }

    pub fn from_config(db: Database, config: &DatabaseConfig) -> Self {
        Self::new(db)
            .remove_at_start(config.remove_at_start)
            .use_data_seeder(config.use_data_seeder)
    }

    pub fn remove_at_start(mut self, remove: bool) -> Self {
        self.remove_at_start = remove;
        self
    }

    pub fn use_data_seeder(mut self, seed: bool) -> Self {
        self.use_data_seeder = seed;
        self
    }

    /// Run every enabled stage in order. The first failure stops the run.
    pub async fn initialize(&self) -> Result<InitReport> {
        info!("Initializing {} database", self.db.provider());
        let mut report = InitReport::default();

        if self.remove_at_start {
            self.delete_database().await?;
            report.removed = true;
        }

        report.migrations_applied = self.migrate().await?;

        if self.use_data_seeder {
            let seeded = seed(&self.db).await.map_err(|e| {
                error!(error = %e, "Database seeding failed");
                e
            })?;
            report.seed = Some(seeded);
        }

        info!("Database initialized");
        Ok(report)
    }

    /// Drop the schema and all data. Safe to call on an empty database.
    pub async fn delete_database(&self) -> Result<()> {
        self.db.drop_schema().await.map_err(|e| {
            error!(error = %e, "Failed to delete database");
            e
        })
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<usize> {
        self.db.migrate().await.map_err(|e| {
            error!(error = %e, "Database migration failed");
            e
        })
    }
}
