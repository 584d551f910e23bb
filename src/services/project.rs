//! Project service
//!
//! Every operation follows the same shape: validate the input, resolve the
//! project, ask `can`, then delegate to the repository. List operations use
//! `read_scope` so the permission check happens inside the query.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::db::repositories::ProjectRepository;
use crate::models::{
    CreateProjectInput, ListParams, PagedResult, Project, ProjectFilter, ReadScope,
    UpdateProjectInput,
};
use crate::services::access::{can, read_scope, Action, Resource, Subject};
use crate::services::validation::{
    check_max_length, FieldErrors, MAX_CATEGORY_LENGTH, MAX_DESCRIPTION_LENGTH, MAX_TITLE_LENGTH,
};

/// Error types for project service operations
#[derive(Debug, thiserror::Error)]
pub enum ProjectServiceError {
    #[error("Validation failed: {0}")]
    ValidationError(FieldErrors),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Project not found: {0}")]
    NotFound(i64),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_visibility: BTreeMap<String, i64>,
}

/// Project service
pub struct ProjectService {
    repo: Arc<dyn ProjectRepository>,
}

impl ProjectService {
    pub fn new(repo: Arc<dyn ProjectRepository>) -> Self {
        Self { repo }
    }

    /// Create a project owned by the subject.
    ///
    /// The owner always comes from the subject; `input.owner_id` is overwritten.
    pub async fn create(
        &self,
        subject: &Subject,
        mut input: CreateProjectInput,
    ) -> Result<Project, ProjectServiceError> {
        let owner_id = subject
            .account_id()
            .ok_or(ProjectServiceError::Unauthenticated)?;

        input.title = input.title.trim().to_string();
        let mut errors = FieldErrors::new();
        check_title(&mut errors, Some(&input.title));
        check_max_length(
            &mut errors,
            "description",
            input.description.as_deref(),
            MAX_DESCRIPTION_LENGTH,
        );
        check_max_length(
            &mut errors,
            "category",
            input.category.as_deref(),
            MAX_CATEGORY_LENGTH,
        );
        errors.into_result().map_err(ProjectServiceError::ValidationError)?;

        ensure(can(subject, Action::Create, &Resource::NewProject))?;

        input.owner_id = owner_id;
        input.description = input.description.filter(|d| !d.trim().is_empty());
        input.category = input
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let project = self
            .repo
            .create(&input)
            .await
            .context("Failed to create project")?;
        tracing::info!(project_id = project.id, owner_id, "Project created");
        Ok(project)
    }

    pub async fn get(&self, subject: &Subject, id: i64) -> Result<Project, ProjectServiceError> {
        let project = self.find(id).await?;
        ensure(can(subject, Action::Read, &Resource::from(&project)))?;
        Ok(project)
    }

    /// Page of projects visible to the subject, narrowed by `filter`
    pub async fn list(
        &self,
        subject: &Subject,
        filter: &ProjectFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Project>, ProjectServiceError> {
        self.list_scoped(filter, read_scope(subject), params).await
    }

    /// The subject's own projects, whatever their visibility or status
    pub async fn list_mine(
        &self,
        subject: &Subject,
        filter: &ProjectFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Project>, ProjectServiceError> {
        let owner_id = subject
            .account_id()
            .ok_or(ProjectServiceError::Unauthenticated)?;
        let filter = ProjectFilter {
            owner_id: Some(owner_id),
            ..filter.clone()
        };
        self.list_scoped(&filter, read_scope(subject), params).await
    }

    /// Every project, for the admin dashboard
    pub async fn list_all(
        &self,
        subject: &Subject,
        filter: &ProjectFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Project>, ProjectServiceError> {
        ensure(can(subject, Action::Read, &Resource::AdminPanel))?;
        self.list_scoped(filter, ReadScope::Everything, params).await
    }

    pub async fn update(
        &self,
        subject: &Subject,
        id: i64,
        mut input: UpdateProjectInput,
    ) -> Result<Project, ProjectServiceError> {
        if !input.has_changes() {
            return Err(ProjectServiceError::ValidationError(FieldErrors::single(
                "body",
                "at least one field must be provided",
            )));
        }

        input.title = input.title.map(|t| t.trim().to_string());
        let mut errors = FieldErrors::new();
        check_title(&mut errors, input.title.as_deref());
        check_max_length(
            &mut errors,
            "description",
            input.description.as_deref(),
            MAX_DESCRIPTION_LENGTH,
        );
        check_max_length(
            &mut errors,
            "category",
            input.category.as_deref(),
            MAX_CATEGORY_LENGTH,
        );
        errors.into_result().map_err(ProjectServiceError::ValidationError)?;

        let project = self.find(id).await?;
        ensure(can(subject, Action::Update, &Resource::from(&project)))?;

        // Deleted between the read and the write
        self.repo
            .update(id, &input)
            .await
            .context("Failed to update project")?
            .ok_or(ProjectServiceError::NotFound(id))
    }

    pub async fn delete(&self, subject: &Subject, id: i64) -> Result<(), ProjectServiceError> {
        let project = self.find(id).await?;
        ensure(can(subject, Action::Delete, &Resource::from(&project)))?;

        if !self
            .repo
            .delete(id)
            .await
            .context("Failed to delete project")?
        {
            return Err(ProjectServiceError::NotFound(id));
        }
        tracing::info!(project_id = id, actor = ?subject.account_id(), "Project deleted");
        Ok(())
    }

    pub async fn stats(&self) -> Result<ProjectStats, ProjectServiceError> {
        let by_status = self.repo.count_by_status().await?;
        let by_visibility = self.repo.count_by_visibility().await?;
        Ok(ProjectStats {
            total: by_status.values().sum(),
            by_status,
            by_visibility,
        })
    }

    async fn list_scoped(
        &self,
        filter: &ProjectFilter,
        scope: ReadScope,
        params: &ListParams,
    ) -> Result<PagedResult<Project>, ProjectServiceError> {
        let (items, total) = self
            .repo
            .list(filter, scope, params)
            .await
            .context("Failed to list projects")?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn find(&self, id: i64) -> Result<Project, ProjectServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get project")?
            .ok_or(ProjectServiceError::NotFound(id))
    }
}

fn check_title(errors: &mut FieldErrors, title: Option<&str>) {
    if let Some(title) = title {
        if title.is_empty() {
            errors.add("title", "must not be empty");
        }
    }
    check_max_length(errors, "title", title, MAX_TITLE_LENGTH);
}

fn ensure(allowed: bool) -> Result<(), ProjectServiceError> {
    if allowed {
        Ok(())
    } else {
        Err(ProjectServiceError::Forbidden(
            "You do not have permission to access this project".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{AccountRepository, SqlxAccountRepository, SqlxProjectRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Account, AccountRole, AccountStatus, ProjectStatus, Visibility};

    struct Fixture {
        service: ProjectService,
        accounts: Arc<dyn AccountRepository>,
        alice: Subject,
        bob: Subject,
        admin: Subject,
    }

    async fn add_account(repo: &Arc<dyn AccountRepository>, email: &str, role: AccountRole) -> Subject {
        let account = repo
            .create(&Account::new(email.into(), "hash".into(), role))
            .await
            .expect("Failed to create account");
        Subject::from(&account)
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let alice = add_account(&accounts, "alice@example.com", AccountRole::User).await;
        let bob = add_account(&accounts, "bob@example.com", AccountRole::User).await;
        let admin = add_account(&accounts, "admin@example.com", AccountRole::Admin).await;

        Fixture {
            service: ProjectService::new(SqlxProjectRepository::boxed(pool)),
            accounts,
            alice,
            bob,
            admin,
        }
    }

    async fn private_draft(f: &Fixture) -> Project {
        f.service
            .create(&f.alice, CreateProjectInput::new("Secret plans", 0))
            .await
            .expect("Failed to create project")
    }

    #[tokio::test]
    async fn test_create_sets_owner_and_defaults() {
        let f = setup().await;
        let project = f
            .service
            .create(
                &f.alice,
                CreateProjectInput::new("  Roadmap  ", 999).with_category(" infra "),
            )
            .await
            .unwrap();

        assert_eq!(project.owner_id, f.alice.account_id().unwrap());
        assert_eq!(project.title, "Roadmap");
        assert_eq!(project.category.as_deref(), Some("infra"));
        assert_eq!(project.visibility, Visibility::Private);
        assert_eq!(project.status, ProjectStatus::Draft);

        let fetched = f.service.get(&f.alice, project.id).await.unwrap();
        assert_eq!(fetched.id, project.id);
        assert_eq!(fetched.title, project.title);
    }

    #[tokio::test]
    async fn test_create_requires_account() {
        let f = setup().await;
        let result = f
            .service
            .create(&Subject::Anonymous, CreateProjectInput::new("Nope", 1))
            .await;
        assert!(matches!(result, Err(ProjectServiceError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = setup().await;
        let result = f
            .service
            .create(
                &f.alice,
                CreateProjectInput::new("   ", 0).with_description("x".repeat(5001)),
            )
            .await;

        match result {
            Err(ProjectServiceError::ValidationError(errors)) => {
                assert!(errors.get("title").is_some());
                assert!(errors.get("description").is_some());
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let long_title = f
            .service
            .create(&f.alice, CreateProjectInput::new("t".repeat(201), 0))
            .await;
        assert!(matches!(long_title, Err(ProjectServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_read_private() {
        let f = setup().await;
        let project = private_draft(&f).await;

        assert!(matches!(
            f.service.get(&f.bob, project.id).await,
            Err(ProjectServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.get(&Subject::Anonymous, project.id).await,
            Err(ProjectServiceError::Forbidden(_))
        ));
        assert!(f.service.get(&f.admin, project.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let f = setup().await;
        assert!(matches!(
            f.service.get(&f.alice, 4242).await,
            Err(ProjectServiceError::NotFound(4242))
        ));
    }

    #[tokio::test]
    async fn test_owner_update_and_delete() {
        let f = setup().await;
        let project = private_draft(&f).await;

        let updated = f
            .service
            .update(
                &f.alice,
                project.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Published),
                    visibility: Some(Visibility::Public),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ProjectStatus::Published);
        assert_eq!(updated.owner_id, project.owner_id);

        // Now everyone can read it
        assert!(f.service.get(&f.bob, project.id).await.is_ok());
        assert!(f.service.get(&Subject::Anonymous, project.id).await.is_ok());

        // ...but only the owner can change it
        assert!(matches!(
            f.service
                .update(
                    &f.bob,
                    project.id,
                    UpdateProjectInput {
                        title: Some("Hijacked".into()),
                        ..Default::default()
                    }
                )
                .await,
            Err(ProjectServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.delete(&f.bob, project.id).await,
            Err(ProjectServiceError::Forbidden(_))
        ));

        f.service.delete(&f.alice, project.id).await.unwrap();
        assert!(matches!(
            f.service.delete(&f.alice, project.id).await,
            Err(ProjectServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let f = setup().await;
        let project = private_draft(&f).await;
        assert!(matches!(
            f.service
                .update(&f.alice, project.id, UpdateProjectInput::default())
                .await,
            Err(ProjectServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_full_access() {
        let f = setup().await;
        let project = private_draft(&f).await;

        f.service
            .update(
                &f.admin,
                project.id,
                UpdateProjectInput {
                    title: Some("Reviewed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        f.service.delete(&f.admin, project.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_suspended_owner_is_locked_out() {
        let f = setup().await;
        let project = private_draft(&f).await;

        let alice_id = f.alice.account_id().unwrap();
        let mut alice = f.accounts.get_by_id(alice_id).await.unwrap().unwrap();
        alice.status = AccountStatus::Suspended;
        f.accounts.update(&alice).await.unwrap();
        let suspended = Subject::from(&alice);

        assert!(matches!(
            f.service.get(&suspended, project.id).await,
            Err(ProjectServiceError::Forbidden(_))
        ));
        let page = f
            .service
            .list(&suspended, &ProjectFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_list_scopes() {
        let f = setup().await;
        private_draft(&f).await;
        f.service
            .create(
                &f.bob,
                CreateProjectInput::new("Open source", 0)
                    .with_visibility(Visibility::Public)
                    .with_status(ProjectStatus::Published),
            )
            .await
            .unwrap();

        let params = ListParams::default();
        let all = ProjectFilter::default();

        let anon = f.service.list(&Subject::Anonymous, &all, &params).await.unwrap();
        assert_eq!(anon.total, 1);
        assert!(anon.items.iter().all(|p| p.is_public_and_published()));

        let bob_view = f.service.list(&f.bob, &all, &params).await.unwrap();
        assert_eq!(bob_view.total, 1);

        let alice_view = f.service.list(&f.alice, &all, &params).await.unwrap();
        assert_eq!(alice_view.total, 2);

        let mine = f.service.list_mine(&f.alice, &all, &params).await.unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.items[0].title, "Secret plans");

        // An owner filter cannot widen the scope
        let widened = ProjectFilter {
            owner_id: f.alice.account_id(),
            ..Default::default()
        };
        assert_eq!(f.service.list(&f.bob, &widened, &params).await.unwrap().total, 0);

        assert_eq!(f.service.list_all(&f.admin, &all, &params).await.unwrap().total, 2);
        assert!(matches!(
            f.service.list_all(&f.alice, &all, &params).await,
            Err(ProjectServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let f = setup().await;
        private_draft(&f).await;
        f.service
            .create(
                &f.bob,
                CreateProjectInput::new("Launch", 0).with_status(ProjectStatus::Published),
            )
            .await
            .unwrap();

        let stats = f.service.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("DRAFT"), Some(&1));
        assert_eq!(stats.by_visibility.get("PRIVATE"), Some(&2));
    }
}
