//! Server settings
//!
//! Read from `config.yml` (path from `PROJECTHUB_CONFIG`), then patched by
//! `PROJECTHUB_*` environment variables. Absent keys take defaults; the two
//! token secrets have none and `validate` refuses to start without them.

use serde::{Deserialize, Serialize};

/// Root of `config.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token and password settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Initial super-admin account
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the SPA)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Include internal error messages in 500 responses
    #[serde(default)]
    pub expose_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            expose_errors: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite` or `mysql`
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// File path or `:memory:` for SQLite, connection string for MySQL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/projecthub.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Token and credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    #[serde(default, skip_serializing)]
    pub access_token_secret: String,
    /// HMAC secret for refresh tokens (must differ from the access secret)
    #[serde(default, skip_serializing)]
    pub refresh_token_secret: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: i64,
    /// `iss` claim written into and required on every token
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Minimum accepted password length
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: String::new(),
            refresh_token_secret: String::new(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            issuer: default_issuer(),
            min_password_length: default_min_password_length(),
        }
    }
}

fn default_access_ttl() -> i64 {
    15 * 60
}

fn default_refresh_ttl() -> i64 {
    7 * 24 * 60 * 60
}

fn default_issuer() -> String {
    "projecthub".to_string()
}

fn default_min_password_length() -> usize {
    8
}

/// Fixed-window rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch for both limiters
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attempts allowed per window on login/register endpoints
    #[serde(default = "default_auth_max_requests")]
    pub auth_max_requests: u32,
    /// Window length for the auth limiter, in milliseconds
    #[serde(default = "default_window_ms")]
    pub auth_window_ms: u64,
    /// Requests allowed per window across the whole API
    #[serde(default = "default_api_max_requests")]
    pub api_max_requests: u32,
    /// Window length for the API limiter, in milliseconds
    #[serde(default = "default_window_ms")]
    pub api_window_ms: u64,
    /// How often stale windows are purged
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_max_requests: default_auth_max_requests(),
            auth_window_ms: default_window_ms(),
            api_max_requests: default_api_max_requests(),
            api_window_ms: default_window_ms(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_auth_max_requests() -> u32 {
    3
}

fn default_api_max_requests() -> u32 {
    300
}

fn default_window_ms() -> u64 {
    15 * 60 * 1000
}

fn default_cleanup_interval() -> u64 {
    300
}

/// Super-admin created on startup when no account with this email exists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default, skip_serializing)]
    pub admin_password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Parse `path`; a missing or blank file yields `Config::default()`.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// `load` followed by environment overrides:
    /// - PROJECTHUB_SERVER_HOST / PROJECTHUB_SERVER_PORT / PROJECTHUB_SERVER_CORS_ORIGIN
    /// - PROJECTHUB_DATABASE_DRIVER / PROJECTHUB_DATABASE_URL
    /// - PROJECTHUB_JWT_ACCESS_SECRET / PROJECTHUB_JWT_REFRESH_SECRET
    /// - PROJECTHUB_JWT_ACCESS_TTL_SECS / PROJECTHUB_JWT_REFRESH_TTL_SECS
    /// - PROJECTHUB_RATE_LIMIT_ENABLED / PROJECTHUB_RATE_LIMIT_AUTH_MAX / PROJECTHUB_RATE_LIMIT_API_MAX
    /// - PROJECTHUB_ADMIN_EMAIL / PROJECTHUB_ADMIN_PASSWORD
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PROJECTHUB_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PROJECTHUB_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("PROJECTHUB_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("PROJECTHUB_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("PROJECTHUB_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(secret) = std::env::var("PROJECTHUB_JWT_ACCESS_SECRET") {
            self.auth.access_token_secret = secret;
        }
        if let Ok(secret) = std::env::var("PROJECTHUB_JWT_REFRESH_SECRET") {
            self.auth.refresh_token_secret = secret;
        }
        if let Ok(ttl) = std::env::var("PROJECTHUB_JWT_ACCESS_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.access_token_ttl_secs = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("PROJECTHUB_JWT_REFRESH_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.refresh_token_ttl_secs = ttl;
            }
        }

        if let Ok(enabled) = std::env::var("PROJECTHUB_RATE_LIMIT_ENABLED") {
            if let Ok(enabled) = enabled.parse::<bool>() {
                self.rate_limit.enabled = enabled;
            }
        }
        if let Ok(max) = std::env::var("PROJECTHUB_RATE_LIMIT_AUTH_MAX") {
            if let Ok(max) = max.parse::<u32>() {
                self.rate_limit.auth_max_requests = max;
            }
        }
        if let Ok(max) = std::env::var("PROJECTHUB_RATE_LIMIT_API_MAX") {
            if let Ok(max) = max.parse::<u32>() {
                self.rate_limit.api_max_requests = max;
            }
        }

        if let Ok(email) = std::env::var("PROJECTHUB_ADMIN_EMAIL") {
            self.bootstrap.admin_email = Some(email);
        }
        if let Ok(password) = std::env::var("PROJECTHUB_ADMIN_PASSWORD") {
            self.bootstrap.admin_password = Some(password);
        }
    }

    /// Check values that have no usable default
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.access_token_secret.is_empty() || self.auth.refresh_token_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.access_token_secret and auth.refresh_token_secret must be set".to_string(),
            ));
        }
        if self.auth.access_token_secret == self.auth.refresh_token_secret {
            return Err(ConfigError::ValidationError(
                "access and refresh token secrets must differ".to_string(),
            ));
        }
        if self.auth.access_token_ttl_secs <= 0 || self.auth.refresh_token_ttl_secs <= 0 {
            return Err(ConfigError::ValidationError(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.auth_window_ms == 0 || self.rate_limit.api_window_ms == 0)
        {
            return Err(ConfigError::ValidationError(
                "rate limit windows must be non-zero".to_string(),
            ));
        }
        match (&self.bootstrap.admin_email, &self.bootstrap.admin_password) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::ValidationError(
                "bootstrap.admin_email and bootstrap.admin_password must be set together"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Prefix serde_yaml errors with their line and column
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
