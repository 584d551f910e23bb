//! API middleware
//!
//! Contains:
//! - Application state shared by every handler
//! - `ApiError`, the single translator from service errors to HTTP responses
//! - Bearer token authentication (required and optional)
//! - The admin panel gate
//! - Per-IP rate limiting
//! - Request statistics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, rejection::QueryRejection},
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::common::validation_failed;
use crate::config::Config;
use crate::db::repositories::{is_unique_violation, SqlxAccountRepository, SqlxProjectRepository};
use crate::db::DynDatabasePool;
use crate::models::Account;
use crate::services::access::{can, Action, Resource, Subject};
use crate::services::account::{AccountService, AccountServiceError};
use crate::services::project::{ProjectService, ProjectServiceError};
use crate::services::rate_limiter::{DynRateLimiter, FixedWindowLimiter, RateDecision, Unlimited};
use crate::services::token::{TokenError, TokenService};

// ============================================================================
// Request Statistics
// ============================================================================

/// Request count and cumulative latency for the admin dashboard
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Sum of response times in microseconds
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count one request that took `duration_us`
    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in microseconds
    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Handles shared by every handler and middleware
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub account_service: Arc<AccountService>,
    pub project_service: Arc<ProjectService>,
    /// Login and registration attempts per client IP
    pub auth_limiter: DynRateLimiter,
    /// Every `/api/v1` request per client IP
    pub api_limiter: DynRateLimiter,
    pub request_stats: Arc<RequestStats>,
    pub expose_errors: bool,
}

impl AppState {
    /// Wire repositories, services and limiters from configuration
    pub fn new(pool: DynDatabasePool, config: &Config) -> Self {
        let tokens = TokenService::new(&config.auth);
        let account_service = AccountService::new(
            SqlxAccountRepository::boxed(pool.clone()),
            tokens,
            config.auth.min_password_length,
        );
        let project_service = ProjectService::new(SqlxProjectRepository::boxed(pool.clone()));

        let limits = &config.rate_limit;
        let (auth_limiter, api_limiter): (DynRateLimiter, DynRateLimiter) = if limits.enabled {
            (
                FixedWindowLimiter::shared(
                    limits.auth_max_requests,
                    Duration::from_millis(limits.auth_window_ms),
                ),
                FixedWindowLimiter::shared(
                    limits.api_max_requests,
                    Duration::from_millis(limits.api_window_ms),
                ),
            )
        } else {
            (Arc::new(Unlimited), Arc::new(Unlimited))
        };

        Self {
            pool,
            account_service: Arc::new(account_service),
            project_service: Arc::new(project_service),
            auth_limiter,
            api_limiter,
            request_stats: Arc::new(RequestStats::new()),
            expose_errors: config.server.expose_errors,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

static EXPOSE_INTERNAL_ERRORS: AtomicBool = AtomicBool::new(false);

/// Show internal error messages to clients instead of a generic message
pub fn set_expose_internal_errors(expose: bool) {
    EXPOSE_INTERNAL_ERRORS.store(expose, Ordering::Relaxed);
}

/// JSON error body: `{"error": {"code", "message", "details"?}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::with_details(
            "RATE_LIMITED",
            "Too many requests, please try again later",
            serde_json::json!({ "retryAfter": retry_after_secs }),
        )
    }

    /// Log an unexpected failure and hide its details unless configured otherwise
    pub fn internal(err: &anyhow::Error) -> Self {
        tracing::error!(error = ?err, "Internal error");
        if EXPOSE_INTERNAL_ERRORS.load(Ordering::Relaxed) {
            Self::new("INTERNAL_ERROR", format!("{:#}", err))
        } else {
            Self::new("INTERNAL_ERROR", "Internal server error")
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self
            .error
            .details
            .as_ref()
            .and_then(|d| d.get("retryAfter"))
            .and_then(|v| v.as_u64());

        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

impl From<AccountServiceError> for ApiError {
    fn from(err: AccountServiceError) -> Self {
        match err {
            AccountServiceError::ValidationError(errors) => validation_failed(errors),
            AccountServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            AccountServiceError::AccountLocked(status) => {
                ApiError::forbidden(format!("Account is {}", status.as_str().to_lowercase()))
            }
            AccountServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            AccountServiceError::AccountExists(_) => {
                ApiError::conflict("An account with this email already exists")
            }
            AccountServiceError::NotFound => ApiError::not_found("Account not found"),
            AccountServiceError::Token(e) => e.into(),
            AccountServiceError::InternalError(e) if is_unique_violation(&e) => {
                ApiError::conflict("Resource already exists")
            }
            AccountServiceError::InternalError(e) => ApiError::internal(&e),
        }
    }
}

impl From<ProjectServiceError> for ApiError {
    fn from(err: ProjectServiceError) -> Self {
        match err {
            ProjectServiceError::ValidationError(errors) => validation_failed(errors),
            ProjectServiceError::Unauthenticated => {
                ApiError::unauthorized("Authentication required")
            }
            ProjectServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ProjectServiceError::NotFound(id) => {
                ApiError::not_found(format!("Project not found: {}", id))
            }
            ProjectServiceError::InternalError(e) if is_unique_violation(&e) => {
                ApiError::conflict("Resource already exists")
            }
            ProjectServiceError::InternalError(e) => ApiError::internal(&e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation_error(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation_error(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation_error(rejection.body_text())
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated account extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub Account);

impl AuthenticatedAccount {
    pub fn subject(&self) -> Subject {
        Subject::from(&self.0)
    }
}

impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedAccount>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// The requester as seen by the access model; anonymous without a valid token
#[derive(Debug, Clone, Copy)]
pub struct CurrentSubject(pub Subject);

impl<S> FromRequestParts<S> for CurrentSubject
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentSubject(
            parts
                .extensions
                .get::<AuthenticatedAccount>()
                .map(AuthenticatedAccount::subject)
                .unwrap_or(Subject::Anonymous),
        ))
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Rejects requests without a valid access token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let account = state.account_service.authenticate(token).await?;

    request
        .extensions_mut()
        .insert(AuthenticatedAccount(account));
    Ok(next.run(request).await)
}

/// Attaches the account when a valid token is present
///
/// A missing or unusable token leaves the request anonymous.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer_token(request.headers()) {
        match state.account_service.authenticate(token).await {
            Ok(account) => {
                request
                    .extensions_mut()
                    .insert(AuthenticatedAccount(account));
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring unusable bearer token"),
        }
    }
    next.run(request).await
}

/// Admin panel middleware; must run after `require_auth`
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let account = request
        .extensions()
        .get::<AuthenticatedAccount>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !can(&account.subject(), Action::Read, &Resource::AdminPanel) {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// address, else "unknown"
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn enforce(limiter: &DynRateLimiter, scope: &str, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    match limiter.check(&ip).await {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after_secs } => {
            tracing::warn!(ip = %ip, scope, retry_after_secs, "Rate limit exceeded");
            ApiError::rate_limited(retry_after_secs).into_response()
        }
    }
}

/// General API rate limit
pub async fn api_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    enforce(&state.api_limiter, "api", request, next).await
}

/// Login and registration rate limit; every attempt counts
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state.auth_limiter, "auth", request, next).await
}

/// Times every request, including fallbacks
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .request_stats
        .record(start.elapsed().as_micros() as u64);
    response
}
