//! Database provider selection.
//!
//! Each supported relational backend is described by a [`ProviderStrategy`]
//! entry in a static table. The entry for the configured provider is resolved
//! once at startup and supplies the connection factory, the placeholder style
//! and the migration set used for that backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Executor};
use tracing::info;

use super::schema::MIGRATIONS;
use crate::{Result, SciError};

/// Relational backends the persistence layer can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provider {
    /// Microsoft SQL Server.
    SqlServer,
    /// PostgreSQL.
    PostgreSql,
    /// MySQL / MariaDB.
    MySql,
    /// SQLite.
    Sqlite,
}

impl Provider {
    /// All providers in configuration order.
    pub const ALL: [Provider; 4] = [
        Provider::SqlServer,
        Provider::PostgreSql,
        Provider::MySql,
        Provider::Sqlite,
    ];

    /// Configuration name of the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::SqlServer => "SqlServer",
            Provider::PostgreSql => "PostgreSQL",
            Provider::MySql => "MySQL",
            Provider::Sqlite => "SQLite",
        }
    }

    /// Render the bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Provider::PostgreSql => format!("${index}"),
            Provider::SqlServer => format!("@p{index}"),
            Provider::MySql | Provider::Sqlite => "?".to_string(),
        }
    }

    /// Look up the strategy entry for this provider.
    pub fn strategy(&self) -> &'static ProviderStrategy {
        // The table is laid out in `Provider::ALL` order.
        match self {
            Provider::SqlServer => &STRATEGIES[0],
            Provider::PostgreSql => &STRATEGIES[1],
            Provider::MySql => &STRATEGIES[2],
            Provider::Sqlite => &STRATEGIES[3],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = SciError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(Provider::SqlServer),
            "postgresql" | "postgres" => Ok(Provider::PostgreSql),
            "mysql" => Ok(Provider::MySql),
            "sqlite" => Ok(Provider::Sqlite),
            _ => Err(SciError::Config(format!("unknown database provider: {s}"))),
        }
    }
}

/// Connection pool settings shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

type ConnectFn = fn(String, PoolSettings) -> BoxFuture<'static, Result<AnyPool>>;

/// Provider-specific wiring resolved once at startup.
pub struct ProviderStrategy {
    /// Provider this entry describes.
    pub provider: Provider,
    /// URL schemes accepted in connection strings.
    pub url_schemes: &'static [&'static str],
    /// Whether a driver for this provider is compiled in.
    pub driver_available: bool,
    /// Migration set applied for this provider.
    pub migrations: &'static [&'static [&'static str]],
    /// Query returning a `cnt` column counting tables named by the single bind.
    pub table_exists_sql: &'static str,
    connect: ConnectFn,
}

impl ProviderStrategy {
    /// Open a connection pool for `url`.
    pub async fn connect(&self, url: &str, settings: PoolSettings) -> Result<AnyPool> {
        if !self.driver_available {
            return Err(SciError::UnsupportedProvider(format!(
                "{} driver is not available in this build",
                self.provider
            )));
        }
        if !self
            .url_schemes
            .iter()
            .any(|scheme| url.starts_with(&format!("{scheme}:")))
        {
            return Err(SciError::Config(format!(
                "connection string for {} must start with one of {:?}",
                self.provider, self.url_schemes
            )));
        }

        info!(
            "Connecting to {} with up to {} connections",
            self.provider, settings.max_connections
        );
        (self.connect)(url.to_string(), settings).await
    }
}

impl fmt::Debug for ProviderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStrategy")
            .field("provider", &self.provider)
            .field("url_schemes", &self.url_schemes)
            .field("driver_available", &self.driver_available)
            .finish()
    }
}

static STRATEGIES: [ProviderStrategy; 4] = [
    ProviderStrategy {
        provider: Provider::SqlServer,
        url_schemes: &["mssql", "sqlserver"],
        // sqlx 0.8 ships no SQL Server driver.
        driver_available: false,
        migrations: MIGRATIONS,
        table_exists_sql: "SELECT COUNT(*) AS cnt FROM information_schema.tables WHERE table_name = @p1",
        connect: connect_unsupported,
    },
    ProviderStrategy {
        provider: Provider::PostgreSql,
        url_schemes: &["postgres", "postgresql"],
        driver_available: cfg!(feature = "postgres"),
        migrations: MIGRATIONS,
        table_exists_sql: "SELECT COUNT(*) AS cnt FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = $1",
        connect: connect_server,
    },
    ProviderStrategy {
        provider: Provider::MySql,
        url_schemes: &["mysql", "mariadb"],
        driver_available: cfg!(feature = "mysql"),
        migrations: MIGRATIONS,
        table_exists_sql: "SELECT COUNT(*) AS cnt FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_name = ?",
        connect: connect_server,
    },
    ProviderStrategy {
        provider: Provider::Sqlite,
        url_schemes: &["sqlite"],
        driver_available: cfg!(feature = "sqlite"),
        migrations: MIGRATIONS,
        table_exists_sql: "SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = ?",
        connect: connect_sqlite,
    },
];

fn pool_options(settings: PoolSettings) -> AnyPoolOptions {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
}

fn connect_server(url: String, settings: PoolSettings) -> BoxFuture<'static, Result<AnyPool>> {
    Box::pin(async move {
        pool_options(settings)
            .connect(&url)
            .await
            .map_err(|e| SciError::DatabaseConnection(e.to_string()))
    })
}

fn connect_sqlite(url: String, settings: PoolSettings) -> BoxFuture<'static, Result<AnyPool>> {
    Box::pin(async move {
        pool_options(settings)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // WAL keeps readers from blocking the single writer
                    conn.execute("PRAGMA journal_mode = WAL").await?;
                    conn.execute("PRAGMA foreign_keys = ON").await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .map_err(|e| SciError::DatabaseConnection(e.to_string()))
    })
}

fn connect_unsupported(_url: String, _settings: PoolSettings) -> BoxFuture<'static, Result<AnyPool>> {
    Box::pin(async move {
        Err(SciError::UnsupportedProvider(
            "SqlServer has no sqlx driver".to_string(),
        ))
    })
}
