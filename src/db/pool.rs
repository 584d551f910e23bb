//! Database connection pool abstraction
//!
//! `DatabasePool` hides whether accounts and projects live in SQLite or
//! MySQL. Repositories branch on `driver()` and borrow the concrete pool
//! through `as_sqlite()` / `as_mysql()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use crate::config::{DatabaseConfig, DatabaseDriver};

/// Unified interface over the supported database backends.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run one statement without bind parameters (DDL, migrations)
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Round trip used by `/health`
    async fn ping(&self) -> Result<()>;

    /// Wait for in-flight connections and refuse new ones
    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn as_sqlite(&self) -> Option<&SqlitePool>;

    fn as_mysql(&self) -> Option<&MySqlPool>;
}

/// Single-file deployment backend
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (and create if missing) a SQLite database.
    ///
    /// Accepts `:memory:`, `sqlite::memory:`, `sqlite:<path>` or a bare path.
    pub async fn new(url: &str) -> Result<Self> {
        let options = match sqlite_path(url) {
            // Each options instance gets its own named shared-cache database
            None => SqliteConnectOptions::from_str("sqlite::memory:")?,
            Some(path) => {
                let dir = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty());
                if let Some(dir) = dir {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("Cannot create data directory {}", dir.display()))?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
        };

        // Project rows cascade with their owner
        let options = options.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("Cannot open SQLite database at {}", url))?;

        Ok(Self { pool })
    }
}

/// File path behind a SQLite url, `None` for an in-memory database.
///
/// Accepts `:memory:`, `sqlite::memory:`, `sqlite:<path>`, `sqlite://<path>`
/// or a bare path. Query strings are dropped.
fn sqlite_path(url: &str) -> Option<&str> {
    if url == ":memory:" || url.starts_with("sqlite::memory:") {
        return None;
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    Some(path.split('?').next().unwrap_or(path))
}

/// Prefix bare `user:pass@host/db` values with the MySQL scheme
fn mysql_url(url: &str) -> String {
    if url.starts_with("mysql://") {
        url.to_string()
    } else {
        format!("mysql://{}", url)
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Sqlite
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        None
    }
}

/// Shared-server backend
pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&mysql_url(url))
            .await
            .with_context(|| format!("Cannot connect to MySQL at {}", url))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Mysql
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        None
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        Some(&self.pool)
    }
}

/// Shared handle to whichever backend is configured
pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// Open the backend selected by `database.driver`
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    match config.driver {
        DatabaseDriver::Sqlite => {
            let db = SqliteDatabase::new(&config.url).await?;
            Ok(Arc::new(db))
        }
        DatabaseDriver::Mysql => {
            let db = MysqlDatabase::new(&config.url).await?;
            Ok(Arc::new(db))
        }
    }
}

/// In-memory SQLite pool for unit and integration tests
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    let config = DatabaseConfig {
        driver: DatabaseDriver::Sqlite,
        url: ":memory:".to_string(),
    };
    create_pool(&config).await
}
