//! Services layer - Business logic
//!
//! Services validate input, resolve the records an operation touches, ask
//! the access model for a decision and only then call the repositories.

pub mod access;
pub mod account;
pub mod password;
pub mod project;
pub mod rate_limiter;
pub mod token;
pub mod validation;

pub use access::{can, can_manage_account, read_scope, Action, Resource, Subject};
pub use account::{
    AccountService, AccountServiceError, AccountStats, AuthSession, LoginInput, LoginKind,
    RegisterInput, UpdateProfileInput,
};
pub use password::{hash_password, verify_password};
pub use project::{ProjectService, ProjectServiceError, ProjectStats};
pub use rate_limiter::{DynRateLimiter, FixedWindowLimiter, RateDecision, RateLimiter, Unlimited};
pub use token::{Claims, TokenError, TokenPair, TokenService, TokenType};
pub use validation::FieldErrors;
