//! Account model
//!
//! This module defines the Account entity and related types. Accounts are
//! both the credential store (email + argon2 hash) and the subject of every
//! authorization decision (role + status).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account entity representing a registered user or administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique identifier
    pub id: i64,
    /// Email address (unique, lowercase)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Account role
    pub role: AccountRole,
    /// Account status
    pub status: AccountStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new active account.
    ///
    /// Note: The password should already be hashed before calling this function.
    /// Use `services::password::hash_password()` to hash the password.
    pub fn new(email: String, password_hash: String, role: AccountRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            email,
            password_hash,
            first_name: None,
            last_name: None,
            role,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    /// Set first and last name
    pub fn with_name(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }

    /// Check if the account holds an administrative role
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Check if the account is a super-admin
    pub fn is_super_admin(&self) -> bool {
        self.role == AccountRole::SuperAdmin
    }

    /// Suspended and inactive accounts may not sign in or act
    pub fn is_locked(&self) -> bool {
        self.status.is_locked()
    }
}

/// Account role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountRole {
    /// Regular user - owns projects
    User,
    /// Administrator - full access to every resource
    Admin,
    /// Super administrator - additionally manages other admins and roles
    SuperAdmin,
}

impl Default for AccountRole {
    fn default() -> Self {
        Self::User
    }
}

impl AccountRole {
    /// Convert role to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::User => "USER",
            AccountRole::Admin => "ADMIN",
            AccountRole::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AccountRole::Admin | AccountRole::SuperAdmin)
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(AccountRole::User),
            "ADMIN" => Ok(AccountRole::Admin),
            "SUPER_ADMIN" => Ok(AccountRole::SuperAdmin),
            _ => Err(anyhow::anyhow!("Invalid account role: {}", s)),
        }
    }
}

/// Account status for account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Normal access
    Active,
    /// Deactivated - cannot sign in or act
    Inactive,
    /// Suspended by an administrator - cannot sign in or act
    Suspended,
    /// Registered but not yet verified
    PendingVerification,
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl AccountStatus {
    /// Convert status to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::PendingVerification => "PENDING_VERIFICATION",
        }
    }

    /// Statuses that deny every operation
    pub fn is_locked(&self) -> bool {
        matches!(self, AccountStatus::Suspended | AccountStatus::Inactive)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "INACTIVE" => Ok(AccountStatus::Inactive),
            "SUSPENDED" => Ok(AccountStatus::Suspended),
            "PENDING_VERIFICATION" => Ok(AccountStatus::PendingVerification),
            _ => Err(anyhow::anyhow!("Invalid account status: {}", s)),
        }
    }
}

/// Admin listing filters; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Case-insensitive substring over email, first and last name
    pub search: Option<String>,
    pub role: Option<AccountRole>,
    pub status: Option<AccountStatus>,
}
