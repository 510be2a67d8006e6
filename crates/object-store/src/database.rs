//! SQLite database for container, object metadata and lease records.

use std::collections::HashMap;
use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};

use crate::error::Result;

/// Object record stored in SQLite.
#[derive(Debug, Clone)]
pub(crate) struct ObjectRecord {
    pub size: i64,
    pub updated_at: i64,
}

/// An unexpired lease on an object.
///
/// `lease_id` is only read in tests but is part of the row mapping.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub(crate) struct LeaseRecord {
    pub lease_id: String,
    pub expires_at: i64,
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    pub async fn new(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Register a container. Returns true if it did not exist before.
    pub async fn insert_container(&self, name: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO containers (name, created_at)
            VALUES (?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check if a container exists.
    pub async fn has_container(&self, name: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM containers WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Insert or overwrite an object record. Overwriting drops the
    /// object's custom metadata, as a fresh upload does.
    pub async fn upsert_object(&self, container: &str, name: &str, size: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO objects (container, name, size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(container, name) DO UPDATE SET
                size = excluded.size,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(size)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM object_metadata WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get an object record.
    pub async fn get_object(&self, container: &str, name: &str) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query(
            r#"
            SELECT size, updated_at
            FROM objects
            WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ObjectRecord {
            size: r.get("size"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Check if an object exists.
    pub async fn has_object(&self, container: &str, name: &str) -> Result<bool> {
        Ok(self.get_object(container, name).await?.is_some())
    }

    /// List object names in a container, in name order.
    pub async fn list_objects(&self, container: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT name FROM objects WHERE container = ?
            ORDER BY name ASC
            "#,
        )
        .bind(container)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    /// Delete an object record together with its metadata and lease.
    pub async fn delete_object(&self, container: &str, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM object_metadata WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM leases WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            DELETE FROM objects WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get the custom metadata of an object.
    pub async fn get_metadata(&self, container: &str, name: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM object_metadata
            WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    /// Replace the custom metadata of an object.
    pub async fn replace_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM object_metadata WHERE container = ? AND name = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        for (key, value) in metadata {
            sqlx::query(
                r#"
                INSERT INTO object_metadata (container, name, key, value)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(container)
            .bind(name)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Take the lease on an object if it is free, expired, or already held
    /// under `lease_id`. A single statement, so concurrent callers race on
    /// the row and at most one wins.
    pub async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        lease_id: &str,
        duration_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO leases (container, name, lease_id, duration_ms, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5 + ?4)
            ON CONFLICT(container, name) DO UPDATE SET
                lease_id = excluded.lease_id,
                duration_ms = excluded.duration_ms,
                expires_at = excluded.expires_at
            WHERE leases.expires_at <= ?5 OR leases.lease_id = excluded.lease_id
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(lease_id)
        .bind(duration_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Push the expiry of a lease forward by its duration. Expired leases
    /// may be renewed as long as nobody has taken the object since.
    pub async fn renew_lease(
        &self,
        container: &str,
        name: &str,
        lease_id: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE leases SET expires_at = ? + duration_ms
            WHERE container = ? AND name = ? AND lease_id = ?
            "#,
        )
        .bind(now_ms)
        .bind(container)
        .bind(name)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop a lease held under `lease_id`.
    pub async fn release_lease(&self, container: &str, name: &str, lease_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM leases
            WHERE container = ? AND name = ? AND lease_id = ?
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop whatever unexpired lease exists, regardless of holder.
    pub async fn break_lease(&self, container: &str, name: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM leases
            WHERE container = ? AND name = ? AND expires_at > ?
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get the unexpired lease on an object, if any.
    pub async fn active_lease(
        &self,
        container: &str,
        name: &str,
        now_ms: i64,
    ) -> Result<Option<LeaseRecord>> {
        let row = sqlx::query(
            r#"
            SELECT lease_id, expires_at FROM leases
            WHERE container = ? AND name = ? AND expires_at > ?
            "#,
        )
        .bind(container)
        .bind(name)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LeaseRecord {
            lease_id: r.get("lease_id"),
            expires_at: r.get("expires_at"),
        }))
    }
}

#[cfg(test)]
impl Database {
    /// Count objects in a container.
    pub async fn count_objects(&self, container: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM objects WHERE container = ?
            "#,
        )
        .bind(container)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }
}
