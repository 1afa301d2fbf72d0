//! Database connection management

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use concierge_config::DatabaseConfig;

/// Prepare and establish a database connection
pub async fn prepare_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    ensure_sqlite_directory(&config.url).await?;

    let in_memory = config.url.contains(":memory:");
    let journal_mode = if in_memory {
        SqliteJournalMode::Memory
    } else {
        SqliteJournalMode::Wal
    };

    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("invalid database url {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(journal_mode)
        .busy_timeout(Duration::from_millis(5_000));

    // Every pooled connection to :memory: would otherwise see its own database.
    let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to database {}", config.url))?;

    info!(url = %config.url, max_connections, "database connection established");
    Ok(pool)
}

/// Create the parent directory of a file-backed SQLite database
async fn ensure_sqlite_directory(url: &str) -> Result<()> {
    let Some(sqlite_path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };

    if sqlite_path.contains(":memory:") {
        return Ok(());
    }

    let path = Path::new(sqlite_path.split('?').next().unwrap_or(sqlite_path));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create sqlite directory {}", parent.display())
            })?;
        }
    }

    Ok(())
}
