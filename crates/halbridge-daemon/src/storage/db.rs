//! `SQLite`-backed key-value store.

use std::path::Path;

use halbridge_core::db::{DatabaseError, open_pool, open_pool_in_memory, unix_timestamp};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use super::KeyValueStore;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let pool = open_pool(path).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let pool = open_pool_in_memory().await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl KeyValueStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Value>, DatabaseError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(DatabaseError::from)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(&value)?;
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;

        debug!(key, "Stored value");
        Ok(())
    }
}
