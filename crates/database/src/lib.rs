//! Concierge Database Crate
//!
//! Connection management and schema migrations for the chat backend. Queries
//! live with the repositories in `concierge-chats` and `concierge-auth`.

use sqlx::SqlitePool;
use concierge_config::DatabaseConfig;

pub mod connection;
pub mod error;
pub mod migrations;

pub use connection::prepare_database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{run_migrations, MIGRATOR};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
