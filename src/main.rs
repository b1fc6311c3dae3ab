//! Logbook bootstrap
//!
//! Opens the configured database, ensures the sailing collections and
//! indexes exist, and exits.

use anyhow::Context;
use logbook::config::Config;
use logbook::schema;
use logbook::storage::DocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => Config::load_with_env(std::path::Path::new(&path))?,
        None => Config::load_default(),
    };
    config.logging.init_tracing()?;

    tracing::debug!("Logbook v{}", env!("CARGO_PKG_VERSION"));

    let storage_config = config.to_storage_config();
    tracing::debug!("Database directory: {:?}", storage_config.database_dir());

    let store = DocumentStore::open(storage_config)
        .await
        .context("Failed to open database")?;

    let report = schema::initialize(&store)
        .await
        .context("Failed to initialize database")?;
    tracing::debug!(
        "Collections: {:?}, indexes: {}",
        report.collections,
        report.indexes.len()
    );

    store.shutdown().await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}
