//! Database initialization
//!
//! Creates the settings table on first start and fills missing keys with
//! built-in defaults.

use crate::db::settings::{KEY_BILL, KEY_ENABLE};
use crate::error::Result;
use herald_common::bill::DEFAULT_BILL_JSON;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the SQLite database at `path`
pub async fn open_pool(path: &Path) -> Result<Pool<Sqlite>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    info!("Opened database {}", path.display());
    Ok(pool)
}

/// Create the settings table if it does not exist
pub async fn create_settings_table(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize settings table with default values
///
/// Existing values are left untouched.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    let defaults = [(KEY_BILL, DEFAULT_BILL_JSON), (KEY_ENABLE, "true")];

    for (key, default_value) in defaults {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
            .bind(key)
            .fetch_one(pool)
            .await?;

        if !exists {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }

    Ok(())
}

/// Initialize all required database structures
pub async fn initialize_database(pool: &Pool<Sqlite>) -> Result<()> {
    create_settings_table(pool).await?;
    init_settings_defaults(pool).await?;
    info!("Database initialization complete");
    Ok(())
}
