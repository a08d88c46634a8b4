//! Database pool configuration and migrations
//!
//! A [`Database`] holds a URL and connects on first use. Every caller of
//! [`Database::pool`] waits on the same initialization barrier, so the pool is
//! created and migrated exactly once per instance.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug)]
pub struct Database {
    url: String,
    max_connections: u32,
    pool: OnceCell<SqlitePool>,
}

impl Database {
    pub fn new(url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            max_connections: max_connections.max(1),
            pool: OnceCell::new(),
        }
    }

    /// Private in-memory database; a single connection keeps the data alive
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:", 1)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect (and migrate) on first call, then hand out the shared pool
    pub async fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<SqlitePool> {
        info!(url = %self.url, "Opening database");

        let in_memory = self.url.contains(":memory:");
        let mut options = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(10));

        if in_memory {
            // Dropping the last connection would drop the data
            options = options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(&self.url).await?;
        run_migrations(&pool).await?;
        Ok(pool)
    }
}

/// Apply pending embedded migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!("Migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pool_is_created_once() {
        let db = Arc::new(Database::in_memory());

        let a = db.clone();
        let b = db.clone();
        let (first, second) = tokio::join!(
            async move { a.pool().await.map(|p| p as *const SqlitePool as usize) },
            async move { b.pool().await.map(|p| p as *const SqlitePool as usize) },
        );

        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let db = Database::in_memory();
        let pool = db.pool().await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('functions', 'run_logs', 'pipelines', 'cron_jobs', 'topic_documents')",
        )
        .fetch_one(pool)
        .await
        .unwrap();

        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display());
        let db = Database::new(url, 2);
        assert!(db.pool().await.is_ok());
    }
}
