//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Register a USER account
//! - POST /api/v1/auth/login - USER login
//! - POST /api/v1/auth/admin/login - ADMIN / SUPER_ADMIN login
//! - POST /api/v1/auth/refresh - Exchange a refresh token
//! - POST /api/v1/auth/logout - Client-side logout
//! - GET  /api/v1/auth/profile - Current account
//! - PUT  /api/v1/auth/profile - Update names
//! - PUT  /api/v1/auth/password - Change password

use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{validation_failed, ApiJson};
use crate::api::middleware::{self, ApiError, AppState, AuthenticatedAccount};
use crate::api::responses::{AccountResponse, TokensResponse};
use crate::services::account::{
    AuthSession, LoginInput, LoginKind, RegisterInput, UpdateProfileInput,
};
use crate::services::validation::FieldErrors;

/// Request body for registration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Request body for both login endpoints
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Both credentials, or a validation error naming each missing one
fn require_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Result<(String, String), ApiError> {
    match (email, password) {
        (Some(email), Some(password)) => Ok((email, password)),
        (email, password) => {
            let mut errors = FieldErrors::new();
            if email.is_none() {
                errors.add("email", "is required");
            }
            if password.is_none() {
                errors.add("password", "is required");
            }
            Err(validation_failed(errors))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Routes that need no token; login and registration are rate limited
pub fn public_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/admin/login", post(admin_login))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::auth_rate_limit,
        ))
        .route("/refresh", post(refresh))
}

/// Routes that need a valid access token
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/password", put(change_password))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    let (email, password) = require_credentials(body.email, body.password)?;
    let session = state
        .account_service
        .register(RegisterInput {
            email,
            password,
            first_name: body.first_name,
            last_name: body.last_name,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let (email, password) = require_credentials(body.email, body.password)?;
    let session = state
        .account_service
        .login(LoginInput::new(email, password), LoginKind::User)
        .await?;
    Ok(Json(session))
}

/// POST /api/v1/auth/admin/login
async fn admin_login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let (email, password) = require_credentials(body.email, body.password)?;
    let session = state
        .account_service
        .login(LoginInput::new(email, password), LoginKind::Admin)
        .await?;
    Ok(Json(session))
}

/// POST /api/v1/auth/refresh
async fn refresh(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> Result<Json<TokensResponse>, ApiError> {
    let tokens = state.account_service.refresh(&body.refresh_token).await?;
    Ok(Json(TokensResponse { tokens }))
}

/// POST /api/v1/auth/logout
///
/// Tokens are stateless; the client discards them. The route still
/// requires a valid token so clients get consistent 401s.
async fn logout(account: AuthenticatedAccount) -> StatusCode {
    tracing::info!(account_id = account.0.id, "Logout");
    StatusCode::NO_CONTENT
}

/// GET /api/v1/auth/profile
async fn get_profile(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .account_service
        .get(&account.subject(), account.0.id)
        .await?;
    Ok(Json(account.into()))
}

/// PUT /api/v1/auth/profile
async fn update_profile(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiJson(body): ApiJson<UpdateProfileRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let updated = state
        .account_service
        .update_profile(
            &account.subject(),
            account.0.id,
            UpdateProfileInput {
                first_name: body.first_name,
                last_name: body.last_name,
            },
        )
        .await?;
    Ok(Json(updated.into()))
}

/// PUT /api/v1/auth/password
async fn change_password(
    State(state): State<AppState>,
    account: AuthenticatedAccount,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .account_service
        .change_password(
            &account.subject(),
            account.0.id,
            &body.current_password,
            &body.new_password,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_credentials_names_missing_fields() {
        let (email, password) =
            require_credentials(Some("a@example.com".into()), Some("secret".into())).unwrap();
        assert_eq!(email, "a@example.com");
        assert_eq!(password, "secret");

        let err = require_credentials(None, None).unwrap_err();
        assert_eq!(err.error.code, "VALIDATION_ERROR");
        let details = err.error.details.unwrap();
        assert_eq!(details["email"], "is required");
        assert_eq!(details["password"], "is required");

        let err = require_credentials(Some("a@example.com".into()), None).unwrap_err();
        let details = err.error.details.unwrap();
        assert!(details.get("email").is_none());
        assert!(details.get("password").is_some());
    }
}
