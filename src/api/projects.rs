//! Project API endpoints
//!
//! - GET    /api/v1/projects - Projects visible to the requester
//! - GET    /api/v1/projects/mine - The requester's own projects
//! - GET    /api/v1/projects/{id} - One project
//! - POST   /api/v1/projects - Create
//! - PUT    /api/v1/projects/{id} - Partial update
//! - DELETE /api/v1/projects/{id} - Delete

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{validation_failed, ApiJson, ApiPath, ApiQuery, ProjectListQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedAccount, CurrentSubject};
use crate::api::responses::PageResponse;
use crate::models::{CreateProjectInput, Project, ProjectStatus, UpdateProjectInput, Visibility};
use crate::services::validation::FieldErrors;

/// Request body for creating a project
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub visibility: Option<String>,
    pub status: Option<String>,
}

/// Request body for updating a project.
///
/// Unknown fields such as `ownerId` are ignored.
#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub visibility: Option<String>,
    pub status: Option<String>,
}

/// Routes readable without a token
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects))
        .route("/{id}", get(get_project))
}

/// Routes that need a valid access token
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_project))
        .route("/mine", get(list_my_projects))
        .route("/{id}", axum::routing::put(update_project).delete(delete_project))
}

fn parse_enums(
    errors: &mut FieldErrors,
    visibility: Option<&str>,
    status: Option<&str>,
) -> (Option<Visibility>, Option<ProjectStatus>) {
    let visibility = visibility.and_then(|v| {
        let parsed = Visibility::parse(v.trim());
        if parsed.is_none() {
            errors.add("visibility", "must be one of PUBLIC, PRIVATE");
        }
        parsed
    });
    let status = status.and_then(|s| {
        let parsed = ProjectStatus::parse(s.trim());
        if parsed.is_none() {
            errors.add("status", "must be one of DRAFT, PUBLISHED, ARCHIVED");
        }
        parsed
    });
    (visibility, status)
}

/// GET /api/v1/projects
async fn list_projects(
    State(state): State<AppState>,
    CurrentSubject(subject): CurrentSubject,
    ApiQuery(query): ApiQuery<ProjectListQuery>,
) -> Result<Json<PageResponse<Project>>, ApiError> {
    let mut filter = query.filter()?;
    filter.owner_id = None;

    let page = state
        .project_service
        .list(&subject, &filter, &query.params())
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/projects/mine
async fn list_my_projects(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiQuery(query): ApiQuery<ProjectListQuery>,
) -> Result<Json<PageResponse<Project>>, ApiError> {
    let filter = query.filter()?;
    let page = state
        .project_service
        .list_mine(&account.subject(), &filter, &query.params())
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/projects/{id}
async fn get_project(
    State(state): State<AppState>,
    CurrentSubject(subject): CurrentSubject,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Project>, ApiError> {
    let project = state.project_service.get(&subject, id).await?;
    Ok(Json(project))
}

/// POST /api/v1/projects
async fn create_project(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiJson(body): ApiJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let mut errors = FieldErrors::new();
    if body.title.is_none() {
        errors.add("title", "is required");
    }
    let (visibility, status) =
        parse_enums(&mut errors, body.visibility.as_deref(), body.status.as_deref());
    errors.into_result().map_err(validation_failed)?;

    let input = CreateProjectInput {
        title: body.title.unwrap_or_default(),
        description: body.description,
        category: body.category,
        owner_id: account.0.id,
        visibility,
        status,
    };

    let project = state
        .project_service
        .create(&account.subject(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// PUT /api/v1/projects/{id}
async fn update_project(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let mut errors = FieldErrors::new();
    let (visibility, status) =
        parse_enums(&mut errors, body.visibility.as_deref(), body.status.as_deref());
    errors.into_result().map_err(validation_failed)?;

    let input = UpdateProjectInput {
        title: body.title,
        description: body.description,
        category: body.category,
        visibility,
        status,
    };

    let project = state
        .project_service
        .update(&account.subject(), id, input)
        .await?;
    Ok(Json(project))
}

/// DELETE /api/v1/projects/{id}
async fn delete_project(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .project_service
        .delete(&account.subject(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
