//! Project repository
//!
//! Database operations for projects.
//!
//! This module provides:
//! - `ProjectRepository` trait defining the interface for project data access
//! - `SqlxProjectRepository` implementing the trait for SQLite and MySQL
//!
//! List queries always AND the caller's `ReadScope` with the explicit
//! `ProjectFilter`; a filter can narrow the scope but never widen it.

use super::{
    bind_mysql, bind_sqlite, like_pattern, mysql_pool, search_text, sqlite_pool, SqlValue,
    WhereClause,
};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    CreateProjectInput, ListParams, Project, ProjectFilter, ProjectStatus, ReadScope,
    UpdateProjectInput, Visibility,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;

const PROJECT_COLUMNS: &str =
    "id, title, description, category, owner_id, visibility, status, created_at, updated_at";

/// Project repository trait
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create(&self, input: &CreateProjectInput) -> Result<Project>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Project>>;

    /// Apply a partial update. `None` when the project does not exist.
    async fn update(&self, id: i64, input: &UpdateProjectInput) -> Result<Option<Project>>;

    /// Returns false when no row matched
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Filtered, scoped page, newest first, plus the matching total
    async fn list(
        &self,
        filter: &ProjectFilter,
        scope: ReadScope,
        params: &ListParams,
    ) -> Result<(Vec<Project>, i64)>;

    async fn count(&self) -> Result<i64>;

    /// Project totals keyed by status name
    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>>;

    /// Project totals keyed by visibility name
    async fn count_by_visibility(&self) -> Result<BTreeMap<String, i64>>;
}

/// SQLx-based project repository implementation
pub struct SqlxProjectRepository {
    pool: DynDatabasePool,
}

impl SqlxProjectRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a shared repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ProjectRepository> {
        Arc::new(Self::new(pool))
    }

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

#[async_trait]
impl ProjectRepository for SqlxProjectRepository {
    async fn create(&self, input: &CreateProjectInput) -> Result<Project> {
        let now = Utc::now();
        let visibility = input.visibility.unwrap_or_default();
        let status = input.status.unwrap_or_default();
        let search = project_search_text(&input.title, input.description.as_deref());
        let sql = r#"
            INSERT INTO projects (title, description, category, owner_id, visibility, status, created_at, updated_at, search_text)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&input.title)
                .bind(&input.description)
                .bind(&input.category)
                .bind(input.owner_id)
                .bind(visibility.as_str())
                .bind(status.as_str())
                .bind(now)
                .bind(now)
                .bind(&search)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to create project")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&input.title)
                .bind(&input.description)
                .bind(&input.category)
                .bind(input.owner_id)
                .bind(visibility.as_str())
                .bind(status.as_str())
                .bind(now)
                .bind(now)
                .bind(&search)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to create project")?
                .last_insert_id() as i64,
        };

        Ok(Project {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            category: input.category.clone(),
            owner_id: input.owner_id,
            visibility,
            status,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to get project by ID")?;
                row.as_ref().map(row_to_project_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to get project by ID")?;
                row.as_ref().map(row_to_project_mysql).transpose()
            }
        }
    }

    async fn update(&self, id: i64, input: &UpdateProjectInput) -> Result<Option<Project>> {
        let Some(mut project) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        input.apply_to(&mut project);
        let now = Utc::now();
        let search = project_search_text(&project.title, project.description.as_deref());

        // owner_id is intentionally absent from the SET list
        let sql = r#"
            UPDATE projects
            SET title = ?, description = ?, category = ?, visibility = ?, status = ?,
                updated_at = ?, search_text = ?
            WHERE id = ?
        "#;
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&project.title)
                .bind(&project.description)
                .bind(&project.category)
                .bind(project.visibility.as_str())
                .bind(project.status.as_str())
                .bind(now)
                .bind(&search)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to update project")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&project.title)
                .bind(&project.description)
                .bind(&project.category)
                .bind(project.visibility.as_str())
                .bind(project.status.as_str())
                .bind(now)
                .bind(&search)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to update project")?
                .rows_affected(),
        };

        // Deleted between the read and the write
        if affected == 0 {
            return Ok(None);
        }

        project.updated_at = now;
        Ok(Some(project))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM projects WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to delete project")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql_pool(&self.pool)?)
                .await
                .context("Failed to delete project")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(
        &self,
        filter: &ProjectFilter,
        scope: ReadScope,
        params: &ListParams,
    ) -> Result<(Vec<Project>, i64)> {
        if scope == ReadScope::Nothing {
            return Ok((Vec::new(), 0));
        }

        let clause = project_where(filter, scope);
        let where_sql = clause.sql();
        let select_sql = format!(
            "SELECT {} FROM projects{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            PROJECT_COLUMNS, where_sql
        );
        let count_sql = format!("SELECT COUNT(*) FROM projects{}", where_sql);

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite_pool(&self.pool)?;
                let rows = bind_sqlite(sqlx::query(&select_sql), clause.values())
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list projects")?;
                let total: i64 = bind_sqlite(sqlx::query(&count_sql), clause.values())
                    .fetch_one(pool)
                    .await
                    .context("Failed to count projects")?
                    .try_get(0)?;
                let projects = rows
                    .iter()
                    .map(row_to_project_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                Ok((projects, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql_pool(&self.pool)?;
                let rows = bind_mysql(sqlx::query(&select_sql), clause.values())
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list projects")?;
                let total: i64 = bind_mysql(sqlx::query(&count_sql), clause.values())
                    .fetch_one(pool)
                    .await
                    .context("Failed to count projects")?
                    .try_get(0)?;
                let projects = rows
                    .iter()
                    .map(row_to_project_mysql)
                    .collect::<Result<Vec<_>>>()?;
                Ok((projects, total))
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let by_status = self.count_by_status().await?;
        Ok(by_status.values().sum())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        self.grouped_counts("SELECT status, COUNT(*) FROM projects GROUP BY status")
            .await
            .context("Failed to count projects by status")
    }

    async fn count_by_visibility(&self) -> Result<BTreeMap<String, i64>> {
        self.grouped_counts("SELECT visibility, COUNT(*) FROM projects GROUP BY visibility")
            .await
            .context("Failed to count projects by visibility")
    }
}

fn project_where(filter: &ProjectFilter, scope: ReadScope) -> WhereClause {
    let mut clause = WhereClause::default();

    match scope {
        ReadScope::Everything => {}
        // Handled before any SQL is built; kept for exhaustiveness
        ReadScope::Nothing => clause.push("1 = 0", []),
        ReadScope::PublicOnly => clause.push(
            "(visibility = ? AND status = ?)",
            public_published_values(),
        ),
        ReadScope::PublicOrOwnedBy(owner) => {
            let mut values = public_published_values().to_vec();
            values.push(SqlValue::Int(owner));
            clause.push("((visibility = ? AND status = ?) OR owner_id = ?)", values);
        }
    }

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        clause.push("search_text LIKE ? ESCAPE '!'", [SqlValue::Text(pattern)]);
    }
    if let Some(status) = filter.status {
        clause.push("status = ?", [SqlValue::Text(status.as_str().to_string())]);
    }
    if let Some(visibility) = filter.visibility {
        clause.push("visibility = ?", [SqlValue::Text(visibility.as_str().to_string())]);
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
        clause.push("category = ?", [SqlValue::Text(category.to_string())]);
    }
    if let Some(owner_id) = filter.owner_id {
        clause.push("owner_id = ?", [SqlValue::Int(owner_id)]);
    }

    clause
}

fn project_search_text(title: &str, description: Option<&str>) -> String {
    search_text([Some(title), description])
}

fn public_published_values() -> [SqlValue; 2] {
    [
        SqlValue::Text(Visibility::Public.as_str().to_string()),
        SqlValue::Text(ProjectStatus::Published.as_str().to_string()),
    ]
}

fn parse_visibility(raw: &str) -> Result<Visibility> {
    Visibility::parse(raw).with_context(|| format!("Invalid visibility in database: {}", raw))
}

fn parse_status(raw: &str) -> Result<ProjectStatus> {
    ProjectStatus::parse(raw).with_context(|| format!("Invalid project status in database: {}", raw))
}

fn row_to_project_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Project> {
    let visibility: String = row.try_get("visibility")?;
    let status: String = row.try_get("status")?;
    Ok(Project {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        owner_id: row.try_get("owner_id")?,
        visibility: parse_visibility(&visibility)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_project_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Project> {
    let visibility: String = row.try_get("visibility")?;
    let status: String = row.try_get("status")?;
    Ok(Project {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        owner_id: row.try_get("owner_id")?,
        visibility: parse_visibility(&visibility)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{AccountRepository, SqlxAccountRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Account, AccountRole};

    struct Fixture {
        repo: SqlxProjectRepository,
        accounts: SqlxAccountRepository,
        alice: i64,
        bob: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let accounts = SqlxAccountRepository::new(pool.clone());
        let alice = accounts
            .create(&Account::new("alice@example.com".into(), "h".into(), AccountRole::User))
            .await
            .unwrap()
            .id;
        let bob = accounts
            .create(&Account::new("bob@example.com".into(), "h".into(), AccountRole::User))
            .await
            .unwrap()
            .id;
        Fixture {
            repo: SqlxProjectRepository::new(pool),
            accounts,
            alice,
            bob,
        }
    }

    async fn seed(f: &Fixture) {
        let inputs = [
            CreateProjectInput::new("Alice public", f.alice)
                .with_visibility(Visibility::Public)
                .with_status(ProjectStatus::Published)
                .with_description("A rust web service")
                .with_category("web"),
            CreateProjectInput::new("Alice private", f.alice).with_status(ProjectStatus::Published),
            CreateProjectInput::new("Alice draft", f.alice).with_visibility(Visibility::Public),
            CreateProjectInput::new("Bob public", f.bob)
                .with_visibility(Visibility::Public)
                .with_status(ProjectStatus::Published)
                .with_category("cli"),
            CreateProjectInput::new("Bob archived", f.bob)
                .with_visibility(Visibility::Public)
                .with_status(ProjectStatus::Archived),
        ];
        for input in &inputs {
            f.repo.create(input).await.expect("Failed to create project");
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let f = setup().await;
        let created = f
            .repo
            .create(&CreateProjectInput::new("Fresh", f.alice))
            .await
            .unwrap();

        assert!(created.id > 0);
        assert_eq!(created.visibility, Visibility::Private);
        assert_eq!(created.status, ProjectStatus::Draft);

        let found = f.repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Fresh");
        assert_eq!(found.owner_id, f.alice);
        assert_eq!(found.visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn test_create_with_unknown_owner_fails() {
        let f = setup().await;
        assert!(f.repo.create(&CreateProjectInput::new("Orphan", 9999)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_partial() {
        let f = setup().await;
        let created = f
            .repo
            .create(&CreateProjectInput::new("Before", f.alice).with_description("keep me"))
            .await
            .unwrap();

        let update = UpdateProjectInput {
            title: Some("After".into()),
            visibility: Some(Visibility::Public),
            ..Default::default()
        };
        let updated = f.repo.update(created.id, &update).await.unwrap().unwrap();

        assert_eq!(updated.title, "After");
        assert_eq!(updated.visibility, Visibility::Public);
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert_eq!(updated.owner_id, f.alice);

        let stored = f.repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "After");
    }

    #[tokio::test]
    async fn test_update_missing_project() {
        let f = setup().await;
        let update = UpdateProjectInput {
            title: Some("x".into()),
            ..Default::default()
        };
        assert!(f.repo.update(404, &update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let f = setup().await;
        let created = f
            .repo
            .create(&CreateProjectInput::new("Doomed", f.bob))
            .await
            .unwrap();

        assert!(f.repo.delete(created.id).await.unwrap());
        assert!(!f.repo.delete(created.id).await.unwrap());
        assert!(f.repo.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_projects_removed_with_owner() {
        let f = setup().await;
        seed(&f).await;
        assert_eq!(f.repo.count().await.unwrap(), 5);

        f.accounts.delete(f.bob).await.unwrap();
        assert_eq!(f.repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_scopes() {
        let f = setup().await;
        seed(&f).await;
        let all = ProjectFilter::default();
        let params = ListParams::default();

        let (items, total) = f.repo.list(&all, ReadScope::PublicOnly, &params).await.unwrap();
        assert_eq!(total, 2);
        assert!(items.iter().all(|p| p.is_public_and_published()));

        let (_, total) = f
            .repo
            .list(&all, ReadScope::PublicOrOwnedBy(f.alice), &params)
            .await
            .unwrap();
        assert_eq!(total, 4);

        let (_, total) = f.repo.list(&all, ReadScope::Everything, &params).await.unwrap();
        assert_eq!(total, 5);

        let (items, total) = f.repo.list(&all, ReadScope::Nothing, &params).await.unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_filter_cannot_widen_scope() {
        let f = setup().await;
        seed(&f).await;

        let drafts = ProjectFilter {
            status: Some(ProjectStatus::Draft),
            ..Default::default()
        };
        let (_, total) = f
            .repo
            .list(&drafts, ReadScope::PublicOnly, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 0);

        let private = ProjectFilter {
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        let (_, total) = f
            .repo
            .list(&private, ReadScope::PublicOrOwnedBy(f.bob), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let f = setup().await;
        seed(&f).await;
        let params = ListParams::default();

        let search = ProjectFilter {
            search: Some("RUST".into()),
            ..Default::default()
        };
        let (items, _) = f.repo.list(&search, ReadScope::Everything, &params).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Alice public");

        let description_only = ProjectFilter {
            search: Some("web service".into()),
            ..Default::default()
        };
        let (items, _) = f
            .repo
            .list(&description_only, ReadScope::Everything, &params)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);

        let category = ProjectFilter {
            category: Some("cli".into()),
            ..Default::default()
        };
        let (items, _) = f.repo.list(&category, ReadScope::Everything, &params).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].owner_id, f.bob);

        let owner = ProjectFilter {
            owner_id: Some(f.bob),
            status: Some(ProjectStatus::Archived),
            ..Default::default()
        };
        let (items, _) = f.repo.list(&owner, ReadScope::Everything, &params).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Bob archived");
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let f = setup().await;
        let created = f
            .repo
            .create(&CreateProjectInput::new("Äpfel Übersicht", f.alice))
            .await
            .unwrap();
        let params = ListParams::default();

        for term in ["äpfel", "Äpfel", "ÜBERSICHT"] {
            let filter = ProjectFilter {
                search: Some(term.into()),
                ..Default::default()
            };
            let (items, total) = f.repo.list(&filter, ReadScope::Everything, &params).await.unwrap();
            assert_eq!(total, 1, "search {:?}", term);
            assert_eq!(items[0].id, created.id);
        }

        // The stored search text follows renames
        let rename = UpdateProjectInput {
            title: Some("Birnen".into()),
            ..Default::default()
        };
        f.repo.update(created.id, &rename).await.unwrap();
        let filter = ProjectFilter {
            search: Some("äpfel".into()),
            ..Default::default()
        };
        let (_, total) = f.repo.list(&filter, ReadScope::Everything, &params).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_pagination_past_end() {
        let f = setup().await;
        seed(&f).await;

        let (items, total) = f
            .repo
            .list(&ProjectFilter::default(), ReadScope::Everything, &ListParams::new(2, 3))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.len(), 2);

        let (items, total) = f
            .repo
            .list(&ProjectFilter::default(), ReadScope::Everything, &ListParams::new(9, 3))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_grouped_counts() {
        let f = setup().await;
        seed(&f).await;

        let by_status = f.repo.count_by_status().await.unwrap();
        assert_eq!(by_status.get("PUBLISHED"), Some(&3));
        assert_eq!(by_status.get("DRAFT"), Some(&1));
        assert_eq!(by_status.get("ARCHIVED"), Some(&1));

        let by_visibility = f.repo.count_by_visibility().await.unwrap();
        assert_eq!(by_visibility.get("PUBLIC"), Some(&4));
        assert_eq!(by_visibility.get("PRIVATE"), Some(&1));
    }
}
