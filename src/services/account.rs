//! Account service
//!
//! Registration, the two login namespaces, token refresh, self-service
//! profile changes and the admin-side account management operations.
//!
//! Login never reveals whether an email exists: unknown emails, wrong
//! passwords and accounts from the other namespace all fail the same way.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use crate::db::repositories::{is_unique_violation, AccountRepository};
use crate::models::{Account, AccountFilter, AccountRole, AccountStatus, ListParams, PagedResult};
use crate::services::access::{can, can_manage_account, Action, Resource, Subject};
use crate::services::password::{hash_password, verify_against_dummy, verify_password};
use crate::services::token::{TokenError, TokenPair, TokenService};
use crate::services::validation::{
    check_max_length, check_password, is_valid_email, normalize_email, trimmed, FieldErrors,
    MAX_NAME_LENGTH,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Error types for account service operations
#[derive(Debug, thiserror::Error)]
pub enum AccountServiceError {
    #[error("Validation failed: {0}")]
    ValidationError(FieldErrors),

    /// Bad credentials or an unusable token
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Account is {0}")]
    AccountLocked(AccountStatus),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Account not found")]
    NotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Which credential namespace a login targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    /// `/auth/login`: USER accounts only
    User,
    /// `/auth/admin/login`: ADMIN and SUPER_ADMIN accounts only
    Admin,
}

impl LoginKind {
    fn admits(&self, role: AccountRole) -> bool {
        match self {
            LoginKind::User => !role.is_admin(),
            LoginKind::Admin => role.is_admin(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl RegisterInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Self-service profile change; `Some("")` clears a name
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Result of a successful registration or login
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub account: Account,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    pub total: i64,
    pub by_role: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
}

/// Account service
pub struct AccountService {
    repo: Arc<dyn AccountRepository>,
    tokens: TokenService,
    min_password_length: usize,
}

impl AccountService {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        tokens: TokenService,
        min_password_length: usize,
    ) -> Self {
        Self {
            repo,
            tokens,
            min_password_length,
        }
    }

    /// Register a new USER account and sign it in.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for a malformed email, short password or long names
    /// - `AccountExists` if the email is taken
    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession, AccountServiceError> {
        let email = normalize_email(&input.email);

        let mut errors = FieldErrors::new();
        if !is_valid_email(&email) {
            errors.add("email", "must be a valid email address");
        }
        check_password(&mut errors, "password", &input.password, self.min_password_length);
        check_max_length(&mut errors, "firstName", input.first_name.as_deref(), MAX_NAME_LENGTH);
        check_max_length(&mut errors, "lastName", input.last_name.as_deref(), MAX_NAME_LENGTH);
        errors.into_result().map_err(AccountServiceError::ValidationError)?;

        if self
            .repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(AccountServiceError::AccountExists(email));
        }

        let password_hash = hash_password(&input.password)?;
        let account = Account::new(email.clone(), password_hash, AccountRole::User).with_name(
            trimmed(input.first_name.as_deref()),
            trimmed(input.last_name.as_deref()),
        );

        // A concurrent registration can still slip past the pre-check
        let created = self.repo.create(&account).await.map_err(|e| {
            if is_unique_violation(&e) {
                AccountServiceError::AccountExists(email.clone())
            } else {
                AccountServiceError::InternalError(e)
            }
        })?;

        tracing::info!(account_id = created.id, "Account registered");

        let tokens = self.tokens.issue(created.id, created.role)?;
        Ok(AuthSession {
            account: created,
            tokens,
        })
    }

    /// Authenticate against one credential namespace.
    ///
    /// # Errors
    ///
    /// - `AuthenticationError` for unknown email, wrong password or wrong namespace
    /// - `AccountLocked` when the credentials are right but the account is
    ///   suspended or inactive
    pub async fn login(
        &self,
        input: LoginInput,
        kind: LoginKind,
    ) -> Result<AuthSession, AccountServiceError> {
        let email = normalize_email(&input.email);

        let Some(account) = self
            .repo
            .get_by_email(&email)
            .await
            .context("Failed to look up account")?
        else {
            verify_against_dummy(&input.password);
            tracing::warn!(?kind, "Login failed: unknown email");
            return Err(invalid_credentials());
        };

        let password_ok = verify_password(&input.password, &account.password_hash)
            .context("Failed to verify password")?;
        if !password_ok || !kind.admits(account.role) {
            tracing::warn!(account_id = account.id, ?kind, "Login failed");
            return Err(invalid_credentials());
        }

        if account.is_locked() {
            tracing::warn!(account_id = account.id, status = %account.status, "Login refused for locked account");
            return Err(AccountServiceError::AccountLocked(account.status));
        }

        let now = Utc::now();
        if let Err(e) = self.repo.update_last_login(account.id, now).await {
            tracing::warn!(account_id = account.id, error = %e, "Failed to record last login");
        }

        tracing::info!(account_id = account.id, ?kind, "Login succeeded");

        let tokens = self.tokens.issue(account.id, account.role)?;
        Ok(AuthSession {
            account: Account {
                last_login: Some(now),
                ..account
            },
            tokens,
        })
    }

    /// Exchange a refresh token for a new pair carrying the account's current role
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AccountServiceError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let account = self
            .repo
            .get_by_id(claims.account_id()?)
            .await
            .context("Failed to load account for refresh")?
            .ok_or_else(|| AccountServiceError::AuthenticationError("Account no longer exists".into()))?;

        if account.is_locked() {
            return Err(AccountServiceError::AccountLocked(account.status));
        }

        Ok(self.tokens.issue(account.id, account.role)?)
    }

    /// Resolve a bearer access token to the current account row.
    ///
    /// Status is not checked here; locked accounts are refused by the
    /// access rules on every operation instead.
    pub async fn authenticate(&self, access_token: &str) -> Result<Account, AccountServiceError> {
        let claims = self.tokens.verify_access(access_token)?;
        self.repo
            .get_by_id(claims.account_id()?)
            .await
            .context("Failed to load authenticated account")?
            .ok_or_else(|| AccountServiceError::AuthenticationError("Account no longer exists".into()))
    }

    /// Read an account the subject is allowed to see
    pub async fn get(&self, subject: &Subject, id: i64) -> Result<Account, AccountServiceError> {
        let account = self.find(id).await?;
        ensure(can(subject, Action::Read, &Resource::Account { id }))?;
        Ok(account)
    }

    pub async fn update_profile(
        &self,
        subject: &Subject,
        id: i64,
        input: UpdateProfileInput,
    ) -> Result<Account, AccountServiceError> {
        let mut errors = FieldErrors::new();
        if input.first_name.is_none() && input.last_name.is_none() {
            errors.add("body", "at least one field must be provided");
        }
        check_max_length(&mut errors, "firstName", input.first_name.as_deref(), MAX_NAME_LENGTH);
        check_max_length(&mut errors, "lastName", input.last_name.as_deref(), MAX_NAME_LENGTH);
        errors.into_result().map_err(AccountServiceError::ValidationError)?;

        let mut account = self.find(id).await?;
        ensure(can(subject, Action::Update, &Resource::Account { id }))?;

        if let Some(first_name) = input.first_name.as_deref() {
            account.first_name = trimmed(Some(first_name));
        }
        if let Some(last_name) = input.last_name.as_deref() {
            account.last_name = trimmed(Some(last_name));
        }

        Ok(self.repo.update(&account).await?)
    }

    /// Change a password after re-checking the current one
    pub async fn change_password(
        &self,
        subject: &Subject,
        id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountServiceError> {
        let mut errors = FieldErrors::new();
        check_password(&mut errors, "newPassword", new_password, self.min_password_length);
        if current_password == new_password {
            errors.add("newPassword", "must differ from the current password");
        }
        errors.into_result().map_err(AccountServiceError::ValidationError)?;

        let mut account = self.find(id).await?;
        ensure(can(subject, Action::Update, &Resource::Account { id }))?;

        if !verify_password(current_password, &account.password_hash)? {
            return Err(AccountServiceError::ValidationError(FieldErrors::single(
                "currentPassword",
                "is incorrect",
            )));
        }

        account.password_hash = hash_password(new_password)?;
        self.repo.update(&account).await?;
        tracing::info!(account_id = id, "Password changed");
        Ok(())
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    pub async fn list(
        &self,
        subject: &Subject,
        filter: &AccountFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Account>, AccountServiceError> {
        ensure(can(subject, Action::Read, &Resource::AdminPanel))?;
        let (items, total) = self.repo.list(filter, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn set_status(
        &self,
        actor: &Subject,
        id: i64,
        status: AccountStatus,
    ) -> Result<Account, AccountServiceError> {
        let mut target = self.find(id).await?;
        ensure(can_manage_account(actor, &target, false))?;

        let previous = target.status;
        target.status = status;
        let updated = self.repo.update(&target).await?;
        tracing::info!(
            actor = ?actor.account_id(),
            account_id = id,
            from = %previous,
            to = %status,
            "Account status changed"
        );
        Ok(updated)
    }

    pub async fn set_role(
        &self,
        actor: &Subject,
        id: i64,
        role: AccountRole,
    ) -> Result<Account, AccountServiceError> {
        let mut target = self.find(id).await?;
        ensure(can_manage_account(actor, &target, true))?;

        let previous = target.role;
        target.role = role;
        let updated = self.repo.update(&target).await?;
        tracing::info!(
            actor = ?actor.account_id(),
            account_id = id,
            from = %previous,
            to = %role,
            "Account role changed"
        );
        Ok(updated)
    }

    /// Delete an account together with its projects
    pub async fn delete(&self, actor: &Subject, id: i64) -> Result<(), AccountServiceError> {
        let target = self.find(id).await?;
        ensure(can_manage_account(actor, &target, false))?;

        if !self.repo.delete(id).await? {
            return Err(AccountServiceError::NotFound);
        }
        tracing::info!(actor = ?actor.account_id(), account_id = id, "Account deleted");
        Ok(())
    }

    pub async fn stats(&self) -> Result<AccountStats, AccountServiceError> {
        let by_role = self.repo.count_by_role().await?;
        let by_status = self.repo.count_by_status().await?;
        Ok(AccountStats {
            total: by_role.values().sum(),
            by_role,
            by_status,
        })
    }

    /// Create the configured super-admin unless the email is already taken.
    ///
    /// Returns true when an account was created.
    pub async fn bootstrap_super_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<bool, AccountServiceError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AccountServiceError::ValidationError(FieldErrors::single(
                "bootstrap.admin_email",
                "must be a valid email address",
            )));
        }
        let mut errors = FieldErrors::new();
        check_password(&mut errors, "bootstrap.admin_password", password, self.min_password_length);
        errors.into_result().map_err(AccountServiceError::ValidationError)?;

        if let Some(existing) = self.repo.get_by_email(&email).await? {
            if existing.role != AccountRole::SuperAdmin {
                tracing::warn!(
                    account_id = existing.id,
                    role = %existing.role,
                    "Bootstrap admin email belongs to a non-super-admin account; leaving it unchanged"
                );
            }
            return Ok(false);
        }

        let account = Account::new(email, hash_password(password)?, AccountRole::SuperAdmin);
        let created = self.repo.create(&account).await?;
        tracing::info!(account_id = created.id, "Bootstrap super-admin created");
        Ok(true)
    }

    async fn find(&self, id: i64) -> Result<Account, AccountServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get account")?
            .ok_or(AccountServiceError::NotFound)
    }
}

fn invalid_credentials() -> AccountServiceError {
    AccountServiceError::AuthenticationError(INVALID_CREDENTIALS.to_string())
}

fn ensure(allowed: bool) -> Result<(), AccountServiceError> {
    if allowed {
        Ok(())
    } else {
        Err(AccountServiceError::Forbidden(
            "You do not have permission to perform this action".to_string(),
        ))
    }
}
