//! Admin API endpoints
//!
//! - GET    /api/v1/admin/stats - Dashboard counts and process stats
//! - GET    /api/v1/admin/users - Paged account list
//! - GET    /api/v1/admin/users/{id}
//! - PUT    /api/v1/admin/users/{id}/status
//! - PUT    /api/v1/admin/users/{id}/role (super-admin)
//! - DELETE /api/v1/admin/users/{id}
//! - GET    /api/v1/admin/projects - Every project
//!
//! All routes sit behind `require_auth` + `require_admin`.

use std::process;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::api::common::{
    parse_role, parse_status, validation_failed, AccountListQuery, ApiJson, ApiPath, ApiQuery,
    ProjectListQuery,
};
use crate::api::middleware::{ApiError, AppState, AuthenticatedAccount};
use crate::api::responses::{AccountResponse, PageResponse};
use crate::models::{Account, Project};
use crate::services::account::AccountStats;
use crate::services::project::ProjectStats;
use crate::services::validation::FieldErrors;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Response for dashboard stats
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub accounts: AccountStats,
    pub projects: ProjectStats,
    pub system: SystemStats,
}

/// Process-level stats
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub version: String,
    /// Process memory usage in bytes
    pub memory_bytes: u64,
    /// e.g. "45.20 MB"
    pub memory_formatted: String,
    pub uptime_seconds: u64,
    /// e.g. "2h 15m"
    pub uptime_formatted: String,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user).delete(delete_user))
        .route("/users/{id}/status", put(update_user_status))
        .route("/users/{id}/role", put(update_user_role))
        .route("/projects", get(list_all_projects))
}

/// GET /api/v1/admin/stats
async fn get_stats(
    State(state): State<AppState>,
    _account: AuthenticatedAccount,
) -> Result<Json<DashboardResponse>, ApiError> {
    let accounts = state.account_service.stats().await?;
    let projects = state.project_service.stats().await?;

    let uptime_seconds = state.request_stats.uptime_seconds();
    let memory_bytes = tokio::task::spawn_blocking(process_memory)
        .await
        .unwrap_or(0);
    let system = SystemStats {
        version: APP_VERSION.to_string(),
        memory_bytes,
        memory_formatted: format_bytes(memory_bytes),
        uptime_seconds,
        uptime_formatted: format_uptime(uptime_seconds),
        total_requests: state.request_stats.total_requests(),
        avg_response_time_ms: state.request_stats.avg_response_time_us() / 1000.0,
    };

    Ok(Json(DashboardResponse {
        accounts,
        projects,
        system,
    }))
}

/// Resident memory of this process, 0 if it cannot be read
fn process_memory() -> u64 {
    let pid = Pid::from_u32(process::id());
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    sys.process(pid)
        .map(|p| p.memory())
        .unwrap_or(0)
}

/// GET /api/v1/admin/users
async fn list_users(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiQuery(query): ApiQuery<AccountListQuery>,
) -> Result<Json<PageResponse<Account>>, ApiError> {
    let filter = query.filter()?;
    let page = state
        .account_service
        .list(&account.subject(), &filter, &query.params())
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/admin/users/{id}
async fn get_user(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<AccountResponse>, ApiError> {
    let target = state.account_service.get(&account.subject(), id).await?;
    Ok(Json(target.into()))
}

/// PUT /api/v1/admin/users/{id}/status
async fn update_user_status(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<StatusRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let status = parse_status(&body.status)
        .map_err(|e| validation_failed(FieldErrors::single("status", e)))?;
    let updated = state
        .account_service
        .set_status(&account.subject(), id, status)
        .await?;
    Ok(Json(updated.into()))
}

/// PUT /api/v1/admin/users/{id}/role
async fn update_user_role(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<RoleRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let role =
        parse_role(&body.role).map_err(|e| validation_failed(FieldErrors::single("role", e)))?;
    let updated = state
        .account_service
        .set_role(&account.subject(), id, role)
        .await?;
    Ok(Json(updated.into()))
}

/// DELETE /api/v1/admin/users/{id}
async fn delete_user(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .account_service
        .delete(&account.subject(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/projects
async fn list_all_projects(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiQuery(query): ApiQuery<ProjectListQuery>,
) -> Result<Json<PageResponse<Project>>, ApiError> {
    let filter = query.filter()?;
    let page = state
        .project_service
        .list_all(&account.subject(), &filter, &query.params())
        .await?;
    Ok(Json(page.into()))
}

/// Format uptime to human readable string
fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

/// Format bytes to human readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
