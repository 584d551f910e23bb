//! Common API utilities and shared types
//!
//! Extractor wrappers that report malformed input in the standard error
//! body, plus pagination and filter query parsing.

use axum::extract::{FromRequest, FromRequestParts};
use serde::Deserialize;

use crate::api::middleware::ApiError;
use crate::models::{
    AccountFilter, AccountRole, AccountStatus, ListParams, ProjectFilter, ProjectStatus,
    Visibility,
};
use crate::services::validation::FieldErrors;

/// `axum::Json` with `ApiError` rejections
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Query` with `ApiError` rejections
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `axum::extract::Path` with `ApiError` rejections
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

// ============================================================================
// Pagination
// ============================================================================

/// Build clamped pagination from raw `page` / `limit` query values.
///
/// The values are taken as signed integers so out-of-range input clamps
/// instead of failing to parse.
pub fn list_params(page: Option<i64>, limit: Option<i64>) -> ListParams {
    let defaults = ListParams::default();
    ListParams::new(
        page.map_or(defaults.page, clamp_to_u32),
        limit.map_or(defaults.limit, clamp_to_u32),
    )
}

fn clamp_to_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Project filters
// ============================================================================

/// Query string for project lists
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub category: Option<String>,
    /// Only honoured on the admin listing
    pub owner_id: Option<i64>,
}

impl ProjectListQuery {
    pub fn params(&self) -> ListParams {
        list_params(self.page, self.limit)
    }

    /// Parse into a filter; unknown enum values are validation errors
    pub fn filter(&self) -> Result<ProjectFilter, ApiError> {
        let mut errors = FieldErrors::new();

        let status = non_blank(&self.status).and_then(|s| {
            let parsed = ProjectStatus::parse(&s);
            if parsed.is_none() {
                errors.add("status", "must be one of DRAFT, PUBLISHED, ARCHIVED");
            }
            parsed
        });
        let visibility = non_blank(&self.visibility).and_then(|v| {
            let parsed = Visibility::parse(&v);
            if parsed.is_none() {
                errors.add("visibility", "must be one of PUBLIC, PRIVATE");
            }
            parsed
        });
        errors.into_result().map_err(validation_failed)?;

        Ok(ProjectFilter {
            search: non_blank(&self.search),
            status,
            visibility,
            category: non_blank(&self.category),
            owner_id: self.owner_id,
        })
    }
}

// ============================================================================
// Account filters
// ============================================================================

/// Query string for the admin account list
#[derive(Debug, Default, Deserialize)]
pub struct AccountListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

impl AccountListQuery {
    pub fn params(&self) -> ListParams {
        list_params(self.page, self.limit)
    }

    pub fn filter(&self) -> Result<AccountFilter, ApiError> {
        let mut errors = FieldErrors::new();

        let role = non_blank(&self.role).and_then(|r| match parse_role(&r) {
            Ok(role) => Some(role),
            Err(e) => {
                errors.add("role", e);
                None
            }
        });
        let status = non_blank(&self.status).and_then(|s| match parse_status(&s) {
            Ok(status) => Some(status),
            Err(e) => {
                errors.add("status", e);
                None
            }
        });
        errors.into_result().map_err(validation_failed)?;

        Ok(AccountFilter {
            search: non_blank(&self.search),
            role,
            status,
        })
    }
}

pub fn parse_role(value: &str) -> Result<AccountRole, String> {
    value
        .trim()
        .parse()
        .map_err(|_| "must be one of USER, ADMIN, SUPER_ADMIN".to_string())
}

pub fn parse_status(value: &str) -> Result<AccountStatus, String> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            "must be one of ACTIVE, INACTIVE, SUSPENDED, PENDING_VERIFICATION".to_string()
        })
}

/// Wrap field errors in the standard validation response
pub fn validation_failed(errors: FieldErrors) -> ApiError {
    ApiError::with_details(
        "VALIDATION_ERROR",
        "Request validation failed",
        serde_json::to_value(&errors).unwrap_or_default(),
    )
}
