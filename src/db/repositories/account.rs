//! Account repository
//!
//! Database operations for accounts.
//!
//! This module provides:
//! - `AccountRepository` trait defining the interface for account data access
//! - `SqlxAccountRepository` implementing the trait for SQLite and MySQL
//!
//! Emails are compared exactly; callers normalize to lowercase before
//! reaching this layer.

use super::{
    bind_mysql, bind_sqlite, like_pattern, mysql_pool, search_text, sqlite_pool, SqlValue,
    WhereClause,
};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Account, AccountFilter, AccountRole, AccountStatus, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Row, Sqlite};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, status, \
                               created_at, updated_at, last_login";

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account. Fails on a duplicate email.
    async fn create(&self, account: &Account) -> Result<Account>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Persist every mutable field and bump `updated_at`
    async fn update(&self, account: &Account) -> Result<Account>;

    async fn update_last_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Delete an account (and, through the foreign key, its projects).
    /// Returns false when no row matched.
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn count(&self) -> Result<i64>;

    /// Account totals keyed by role name
    async fn count_by_role(&self) -> Result<BTreeMap<String, i64>>;

    /// Account totals keyed by status name
    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>>;

    /// Filtered page, newest first, plus the filtered total
    async fn list(&self, filter: &AccountFilter, params: &ListParams) -> Result<(Vec<Account>, i64)>;
}

/// SQLx-based account repository implementation
pub struct SqlxAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAccountRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a shared repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccountRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccountRepository for SqlxAccountRepository {
    async fn create(&self, account: &Account) -> Result<Account> {
        let now = Utc::now();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_account::<Sqlite>(sqlx::query(INSERT_ACCOUNT), account, now)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to create account")?
                    .last_insert_rowid()
            }
            DatabaseDriver::Mysql => {
                insert_account::<MySql>(sqlx::query(INSERT_ACCOUNT), account, now)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to create account")?
                    .last_insert_id() as i64
            }
        };

        Ok(Account {
            id,
            created_at: now,
            updated_at: now,
            ..account.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to get account by ID")?;
                row.as_ref().map(row_to_account_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to get account by ID")?;
                row.as_ref().map(row_to_account_mysql).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE email = ?", ACCOUNT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to get account by email")?;
                row.as_ref().map(row_to_account_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to get account by email")?;
                row.as_ref().map(row_to_account_mysql).transpose()
            }
        }
    }

    async fn update(&self, account: &Account) -> Result<Account> {
        let now = Utc::now();
        let sql = r#"
            UPDATE accounts
            SET email = ?, password_hash = ?, first_name = ?, last_name = ?,
                role = ?, status = ?, updated_at = ?, search_text = ?
            WHERE id = ?
        "#;
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => update_account::<Sqlite>(sqlx::query(sql), account, now)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to update account")?
                .rows_affected(),
            DatabaseDriver::Mysql => update_account::<MySql>(sqlx::query(sql), account, now)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to update account")?
                .rows_affected(),
        };

        if affected == 0 {
            anyhow::bail!("Account {} not found for update", account.id);
        }

        self.get_by_id(account.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Account not found after update"))
    }

    async fn update_last_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let sql = "UPDATE accounts SET last_login = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(id)
                    .execute(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to update last login")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(id)
                    .execute(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to update last login")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM accounts WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to delete account")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to delete account")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn count(&self) -> Result<i64> {
        let (_, total) = self
            .list(&AccountFilter::default(), &ListParams::new(1, 1))
            .await?;
        Ok(total)
    }

    async fn count_by_role(&self) -> Result<BTreeMap<String, i64>> {
        self.grouped_counts("SELECT role, COUNT(*) FROM accounts GROUP BY role")
            .await
            .context("Failed to count accounts by role")
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        self.grouped_counts("SELECT status, COUNT(*) FROM accounts GROUP BY status")
            .await
            .context("Failed to count accounts by status")
    }

    async fn list(&self, filter: &AccountFilter, params: &ListParams) -> Result<(Vec<Account>, i64)> {
        let clause = account_where(filter);
        let where_sql = clause.sql();
        let select_sql = format!(
            "SELECT {} FROM accounts{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            ACCOUNT_COLUMNS, where_sql
        );
        let count_sql = format!("SELECT COUNT(*) FROM accounts{}", where_sql);

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite_pool(&self.pool)?;
                let rows = bind_sqlite(sqlx::query(&select_sql), clause.values())
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list accounts")?;
                let total: i64 = bind_sqlite(sqlx::query(&count_sql), clause.values())
                    .fetch_one(pool)
                    .await
                    .context("Failed to count accounts")?
                    .try_get(0)?;
                let accounts = rows
                    .iter()
                    .map(row_to_account_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                Ok((accounts, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql_pool(&self.pool)?;
                let rows = bind_mysql(sqlx::query(&select_sql), clause.values())
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list accounts")?;
                let total: i64 = bind_mysql(sqlx::query(&count_sql), clause.values())
                    .fetch_one(pool)
                    .await
                    .context("Failed to count accounts")?
                    .try_get(0)?;
                let accounts = rows
                    .iter()
                    .map(row_to_account_mysql)
                    .collect::<Result<Vec<_>>>()?;
                Ok((accounts, total))
            }
        }
    }
}

impl SqlxAccountRepository {
    async fn grouped_counts(&self, sql: &str) -> Result<BTreeMap<String, i64>> {
        let pairs: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query_as(sql).fetch_all(sqlite_pool(&self.pool)?).await?
            }
            DatabaseDriver::Mysql => {
                sqlx::query_as(sql).fetch_all(mysql_pool(&self.pool)?).await?
            }
        };
        Ok(pairs.into_iter().collect())
    }
}

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO accounts (email, password_hash, first_name, last_name, role, status, created_at, updated_at, search_text)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

fn account_where(filter: &AccountFilter) -> WhereClause {
    let mut clause = WhereClause::default();
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        clause.push("search_text LIKE ? ESCAPE '!'", [SqlValue::Text(pattern)]);
    }
    if let Some(role) = filter.role {
        clause.push("role = ?", [SqlValue::Text(role.as_str().to_string())]);
    }
    if let Some(status) = filter.status {
        clause.push("status = ?", [SqlValue::Text(status.as_str().to_string())]);
    }
    clause
}

// Both backends take the same binds in the same order.
fn insert_account<'q, DB>(
    query: sqlx::query::Query<'q, DB, <DB as sqlx::database::HasArguments<'q>>::Arguments>,
    account: &'q Account,
    now: DateTime<Utc>,
) -> sqlx::query::Query<'q, DB, <DB as sqlx::database::HasArguments<'q>>::Arguments>
where
    DB: sqlx::Database,
    &'q str: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<&'q str>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    DateTime<Utc>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    query
        .bind(account.email.as_str())
        .bind(account.password_hash.as_str())
        .bind(account.first_name.as_deref())
        .bind(account.last_name.as_deref())
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(now)
        .bind(now)
        .bind(account_search_text(account))
}

fn update_account<'q, DB>(
    query: sqlx::query::Query<'q, DB, <DB as sqlx::database::HasArguments<'q>>::Arguments>,
    account: &'q Account,
    now: DateTime<Utc>,
) -> sqlx::query::Query<'q, DB, <DB as sqlx::database::HasArguments<'q>>::Arguments>
where
    DB: sqlx::Database,
    &'q str: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<&'q str>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    DateTime<Utc>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    query
        .bind(account.email.as_str())
        .bind(account.password_hash.as_str())
        .bind(account.first_name.as_deref())
        .bind(account.last_name.as_deref())
        .bind(account.role.as_str())
        .bind(account.status.as_str())
        .bind(now)
        .bind(account_search_text(account))
        .bind(account.id)
}

fn account_search_text(account: &Account) -> String {
    search_text([
        Some(account.email.as_str()),
        account.first_name.as_deref(),
        account.last_name.as_deref(),
    ])
}

fn parse_role(raw: &str) -> Result<AccountRole> {
    AccountRole::from_str(raw).with_context(|| format!("Invalid role in database: {}", raw))
}

fn parse_status(raw: &str) -> Result<AccountStatus> {
    AccountStatus::from_str(raw).with_context(|| format!("Invalid status in database: {}", raw))
}

fn row_to_account_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: parse_role(&role)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_login: row.try_get("last_login")?,
    })
}

fn row_to_account_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: parse_role(&role)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_login: row.try_get("last_login")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::services::password::hash_password;

    async fn setup_test_repo() -> (DynDatabasePool, SqlxAccountRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxAccountRepository::new(pool.clone());
        (pool, repo)
    }

    fn test_account(email: &str, role: AccountRole) -> Account {
        Account::new(
            email.to_string(),
            hash_password("test_password").expect("Failed to hash password"),
            role,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let (_pool, repo) = setup_test_repo().await;
        let account = test_account("alice@example.com", AccountRole::User)
            .with_name(Some("Alice".into()), None);

        let created = repo.create(&account).await.expect("Failed to create account");
        assert!(created.id > 0);

        let found = repo
            .get_by_id(created.id)
            .await
            .expect("Failed to get account")
            .expect("Account not found");
        assert_eq!(found.email, "alice@example.com");
        assert_eq!(found.first_name.as_deref(), Some("Alice"));
        assert_eq!(found.role, AccountRole::User);
        assert_eq!(found.status, AccountStatus::Active);
        assert!(found.password_hash.starts_with("$argon2id$"));
        assert!(found.last_login.is_none());

        let by_email = repo
            .get_by_email("alice@example.com")
            .await
            .expect("Failed to get account")
            .expect("Account not found");
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn test_get_missing_account() {
        let (_pool, repo) = setup_test_repo().await;
        assert!(repo.get_by_id(999).await.unwrap().is_none());
        assert!(repo.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&test_account("dup@example.com", AccountRole::User))
            .await
            .expect("Failed to create first account");

        let err = repo
            .create(&test_account("dup@example.com", AccountRole::Admin))
            .await
            .expect_err("Duplicate email should fail");
        assert!(super::super::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_update_account() {
        let (_pool, repo) = setup_test_repo().await;
        let mut created = repo
            .create(&test_account("bob@example.com", AccountRole::User))
            .await
            .unwrap();

        created.status = AccountStatus::Suspended;
        created.role = AccountRole::Admin;
        created.last_name = Some("Builder".into());

        let updated = repo.update(&created).await.expect("Failed to update account");
        assert_eq!(updated.status, AccountStatus::Suspended);
        assert_eq!(updated.role, AccountRole::Admin);
        assert_eq!(updated.last_name.as_deref(), Some("Builder"));
        assert!(updated.updated_at >= created.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_account_fails() {
        let (_pool, repo) = setup_test_repo().await;
        let mut ghost = test_account("ghost@example.com", AccountRole::User);
        ghost.id = 42;
        assert!(repo.update(&ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo
            .create(&test_account("login@example.com", AccountRole::User))
            .await
            .unwrap();

        let at = Utc::now();
        repo.update_last_login(created.id, at).await.unwrap();

        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        let stored = found.last_login.expect("last_login should be set");
        assert_eq!(stored.timestamp(), at.timestamp());
    }

    #[tokio::test]
    async fn test_delete_account() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo
            .create(&test_account("gone@example.com", AccountRole::User))
            .await
            .unwrap();

        assert!(repo.delete(created.id).await.unwrap());
        assert!(!repo.delete(created.id).await.unwrap());
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&test_account("ann@example.com", AccountRole::User))
            .await
            .unwrap();
        repo.create(&test_account("ben@example.com", AccountRole::Admin))
            .await
            .unwrap();
        let mut carl = repo
            .create(&test_account("carl@sample.org", AccountRole::User))
            .await
            .unwrap();
        carl.status = AccountStatus::Suspended;
        repo.update(&carl).await.unwrap();

        let (all, total) = repo
            .list(&AccountFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let filter = AccountFilter {
            search: Some("EXAMPLE".into()),
            ..Default::default()
        };
        let (_, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 2);

        let filter = AccountFilter {
            role: Some(AccountRole::User),
            status: Some(AccountStatus::Suspended),
            ..Default::default()
        };
        let (found, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].email, "carl@sample.org");

        let (page, total) = repo
            .list(&AccountFilter::default(), &ListParams::new(2, 2))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&test_account("plain@example.com", AccountRole::User))
            .await
            .unwrap();

        let filter = AccountFilter {
            search: Some("%".into()),
            ..Default::default()
        };
        let (_, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_search_matches_non_ascii_names() {
        let (_pool, repo) = setup_test_repo().await;
        let mut zoe = repo
            .create(
                &test_account("zoe@example.com", AccountRole::User)
                    .with_name(Some("Zoë".into()), Some("Ørsted".into())),
            )
            .await
            .unwrap();

        let filter = AccountFilter {
            search: Some("ørsted".into()),
            ..Default::default()
        };
        let (found, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].id, zoe.id);

        zoe.last_name = Some("Åberg".into());
        repo.update(&zoe).await.unwrap();
        let (_, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 0);

        let filter = AccountFilter {
            search: Some("ÅBERG".into()),
            ..Default::default()
        };
        let (_, total) = repo.list(&filter, &ListParams::default()).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_counts() {
        let (_pool, repo) = setup_test_repo().await;
        assert_eq!(repo.count().await.unwrap(), 0);

        repo.create(&test_account("u1@example.com", AccountRole::User))
            .await
            .unwrap();
        repo.create(&test_account("u2@example.com", AccountRole::User))
            .await
            .unwrap();
        repo.create(&test_account("a1@example.com", AccountRole::SuperAdmin))
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 3);

        let by_role = repo.count_by_role().await.unwrap();
        assert_eq!(by_role.get("USER"), Some(&2));
        assert_eq!(by_role.get("SUPER_ADMIN"), Some(&1));

        let by_status = repo.count_by_status().await.unwrap();
        assert_eq!(by_status.get("ACTIVE"), Some(&3));
    }
}
