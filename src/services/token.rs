//! Token issuing and verification
//!
//! Access and refresh tokens are HS256 JWTs signed with two different
//! secrets, so one can never be replayed as the other even before the
//! `typ` claim is checked. Tokens are stateless: nothing is stored and
//! nothing is revoked, they simply expire.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::AccountRole;

/// Clock skew tolerated when checking `exp`, in seconds
const LEEWAY_SECS: u64 = 5;

/// Which of the two token kinds a JWT is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims carried by both token kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    /// Role at issue time. Authorization always reloads the account.
    pub role: AccountRole,
    pub typ: TokenType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

impl Claims {
    /// Parse `sub` back into an account id
    pub fn account_id(&self) -> Result<i64, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

/// Token verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
}

/// Issued token pair, as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and verifies access/refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    access: Arc<Keys>,
    refresh: Arc<Keys>,
    validation: Arc<Validation>,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        if config.access_token_secret.len() < 32 || config.refresh_token_secret.len() < 32 {
            tracing::warn!("JWT secrets shorter than 32 bytes are not recommended");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = LEEWAY_SECS;

        Self {
            access: Arc::new(Keys::from_secret(&config.access_token_secret)),
            refresh: Arc::new(Keys::from_secret(&config.refresh_token_secret)),
            validation: Arc::new(validation),
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    /// Issue a fresh access/refresh pair for an account
    pub fn issue(&self, account_id: i64, role: AccountRole) -> anyhow::Result<TokenPair> {
        let access_token = self.sign(account_id, role, TokenType::Access, self.access_ttl_secs)?;
        let refresh_token =
            self.sign(account_id, role, TokenType::Refresh, self.refresh_ttl_secs)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl_secs,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenType::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenType::Refresh)
    }

    fn keys(&self, typ: TokenType) -> &Keys {
        match typ {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    fn sign(
        &self,
        account_id: i64,
        role: AccountRole,
        typ: TokenType,
        ttl_secs: i64,
    ) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            role,
            typ,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl_secs,
            jti: Uuid::new_v4().to_string(),
        };
        self.encode_claims(&claims)
    }

    fn encode_claims(&self, claims: &Claims) -> anyhow::Result<String> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys(claims.typ).encoding,
        )
        .context("Failed to sign token")
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.keys(expected).decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?;

        if data.claims.typ != expected {
            return Err(TokenError::Invalid);
        }
        data.claims.account_id()?;
        Ok(data.claims)
    }
}
