//! Database migrations
//!
//! Schema changes are embedded in the binary as SQL strings, one variant per
//! backend, and tracked in a `_migrations` table. `run_migrations` applies
//! every version not yet recorded, in order.
//!
//! ```ignore
//! let pool = create_pool(&config.database).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (unique, ascending)
    pub version: i32,
    pub name: &'static str,
    /// SQL statements for SQLite, separated by `;`
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL, separated by `;`
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_accounts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(100),
                last_name VARCHAR(100),
                role VARCHAR(20) NOT NULL DEFAULT 'USER',
                status VARCHAR(32) NOT NULL DEFAULT 'ACTIVE',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_login TIMESTAMP,
                search_text TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_role ON accounts(role);
            CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(100),
                last_name VARCHAR(100),
                role VARCHAR(20) NOT NULL DEFAULT 'USER',
                status VARCHAR(32) NOT NULL DEFAULT 'ACTIVE',
                created_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                updated_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                last_login TIMESTAMP(6) NULL,
                search_text TEXT NOT NULL,
                INDEX idx_accounts_role (role),
                INDEX idx_accounts_status (status)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
        "#,
    },
    Migration {
        version: 2,
        name: "create_projects",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(200) NOT NULL,
                description TEXT,
                category VARCHAR(100),
                owner_id INTEGER NOT NULL,
                visibility VARCHAR(16) NOT NULL DEFAULT 'PRIVATE',
                status VARCHAR(16) NOT NULL DEFAULT 'DRAFT',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                search_text TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (owner_id) REFERENCES accounts(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
            CREATE INDEX IF NOT EXISTS idx_projects_visibility_status ON projects(visibility, status);
            CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects(created_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS projects (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(200) NOT NULL,
                description TEXT,
                category VARCHAR(100),
                owner_id BIGINT NOT NULL,
                visibility VARCHAR(16) NOT NULL DEFAULT 'PRIVATE',
                status VARCHAR(16) NOT NULL DEFAULT 'DRAFT',
                created_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                updated_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                search_text TEXT NOT NULL,
                INDEX idx_projects_owner (owner_id),
                INDEX idx_projects_visibility_status (visibility, status),
                INDEX idx_projects_created_at (created_at),
                CONSTRAINT fk_projects_owner FOREIGN KEY (owner_id)
                    REFERENCES accounts(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
        "#,
    },
];

/// Run all pending migrations.
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied: Vec<i64> = get_applied_migrations(pool)
        .await?
        .into_iter()
        .map(|m| m.version)
        .collect();

    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.contains(&(migration.version as i64)) {
            continue;
        }
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.iter().any(|a| a.version == m.version as i64))
        .count())
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let rows = sqlx::query(
                "SELECT version, name, applied_at FROM _migrations ORDER BY version",
            )
            .fetch_all(sqlite(pool)?)
            .await?;
            rows.iter()
                .map(|row| -> Result<MigrationRecord> {
                    Ok(MigrationRecord {
                        version: row.try_get("version")?,
                        name: row.try_get("name")?,
                        applied_at: row.try_get("applied_at")?,
                    })
                })
                .collect()
        }
        DatabaseDriver::Mysql => {
            let rows = sqlx::query(
                "SELECT version, name, applied_at FROM _migrations ORDER BY version",
            )
            .fetch_all(mysql(pool)?)
            .await?;
            rows.iter()
                .map(|row| -> Result<MigrationRecord> {
                    let version: i32 = row.try_get("version")?;
                    Ok(MigrationRecord {
                        version: version as i64,
                        name: row.try_get("name")?,
                        applied_at: row.try_get("applied_at")?,
                    })
                })
                .collect()
        }
    }
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(sqlite(pool)?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(mysql(pool)?, migration).await,
    }
}

/// SQLite DDL is transactional, so a failed migration leaves nothing behind.
async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;
    Ok(())
}

fn sqlite(pool: &DynDatabasePool) -> Result<&SqlitePool> {
    pool.as_sqlite()
        .context("database driver is sqlite but no sqlite pool is available")
}

fn mysql(pool: &DynDatabasePool) -> Result<&MySqlPool> {
    pool.as_mysql()
        .context("database driver is mysql but no mysql pool is available")
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split a migration body into statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !is_comment_only(s))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());
        let applied = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(applied, MIGRATIONS.len());

        let again = run_migrations(&pool).await.expect("Failed to rerun migrations");
        assert_eq!(again, 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = migrated_pool().await;
        let sqlite = pool.as_sqlite().unwrap();

        for table in ["accounts", "projects", "_migrations"] {
            let row = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_optional(sqlite)
                .await
                .unwrap();
            assert!(row.is_some(), "table {} should exist", table);
        }
    }

    #[tokio::test]
    async fn test_email_unique_constraint() {
        let pool = migrated_pool().await;
        let sqlite = pool.as_sqlite().unwrap();

        let insert = "INSERT INTO accounts (email, password_hash) VALUES ('a@b.c', 'x')";
        sqlx::query(insert).execute(sqlite).await.unwrap();
        assert!(sqlx::query(insert).execute(sqlite).await.is_err());
    }

    #[tokio::test]
    async fn test_projects_cascade_with_owner() {
        let pool = migrated_pool().await;
        let sqlite = pool.as_sqlite().unwrap();

        sqlx::query("INSERT INTO accounts (id, email, password_hash) VALUES (7, 'o@b.c', 'x')")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query("INSERT INTO projects (title, owner_id) VALUES ('p', 7)")
            .execute(sqlite)
            .await
            .unwrap();

        // Unknown owner is rejected
        assert!(sqlx::query("INSERT INTO projects (title, owner_id) VALUES ('p', 99)")
            .execute(sqlite)
            .await
            .is_err());

        sqlx::query("DELETE FROM accounts WHERE id = 7")
            .execute(sqlite)
            .await
            .unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects")
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);\n-- trailing";
        assert_eq!(split_sql_statements(sql_with_comments).len(), 1);

        for migration in MIGRATIONS {
            assert!(!split_sql_statements(migration.up_sqlite).is_empty());
            assert!(!split_sql_statements(migration.up_mysql).is_empty());
        }
    }

    #[test]
    fn test_migration_versions_ascending() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
