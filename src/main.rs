use std::path::Path;

use tracing::{error, info};

use scimaterials::{Config, Database, DbInitializer, LocalFileStore};

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    // Load configuration
    let config = if Path::new(&path).exists() {
        match Config::load_with_env(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("{path} not found, using default configuration.");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    // Initialize logging
    if let Err(e) = scimaterials::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        scimaterials::logging::init_console_only(&config.logging.level);
    }

    info!("SciMaterials persistence core");

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&config).await {
        error!("Startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> scimaterials::Result<()> {
    let db = Database::connect(&config.database).await?;
    let report = DbInitializer::from_config(db.clone(), &config.database)
        .initialize()
        .await?;
    info!(
        removed = report.removed,
        migrations = report.migrations_applied,
        seeded = report.seed.as_ref().map_or(0, |s| s.total()),
        "Database ready"
    );

    let store = LocalFileStore::new(&config.files.storage_path).await?;
    info!("File storage at {}", store.base_path().display());

    db.close().await;
    Ok(())
}
