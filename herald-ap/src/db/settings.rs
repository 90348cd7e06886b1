//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). Only two
//! keys are persisted: the active bill document and the enable flag.

use crate::error::{Error, Result};
use herald_common::Bill;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub const KEY_BILL: &str = "bill";
pub const KEY_ENABLE: &str = "enable";

/// Persisted runtime state
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: Pool<Sqlite>,
}

impl SettingsStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Raw persisted bill document, if any
    pub async fn load_bill_json(&self) -> Result<Option<String>> {
        get_setting::<String>(&self.pool, KEY_BILL).await
    }

    pub async fn save_bill(&self, bill: &Bill) -> Result<()> {
        let json = bill.to_json()?;
        set_setting(&self.pool, KEY_BILL, json)
            .await
            .map_err(|e| Error::Persistence(format!("saving bill: {}", e)))
    }

    /// Enable flag; missing means enabled
    pub async fn load_enable(&self) -> Result<bool> {
        Ok(get_setting::<bool>(&self.pool, KEY_ENABLE).await?.unwrap_or(true))
    }

    pub async fn save_enable(&self, enable: bool) -> Result<()> {
        set_setting(&self.pool, KEY_ENABLE, enable)
            .await
            .map_err(|e| Error::Persistence(format!("saving enable flag: {}", e)))
    }
}

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}
