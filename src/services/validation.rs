//! Input validation helpers shared by the services
//!
//! Validation failures are collected per field so clients can show every
//! problem at once.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex is valid")
});

pub const MAX_EMAIL_LENGTH: usize = 255;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_NAME_LENGTH: usize = 50;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;
pub const MAX_CATEGORY_LENGTH: usize = 50;

/// Field name to message, serialized as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a problem; the first message for a field wins
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Trim and lowercase an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LENGTH && EMAIL_REGEX.is_match(email)
}

/// Check password length bounds, counted in characters
pub fn check_password(errors: &mut FieldErrors, field: &str, password: &str, min_length: usize) {
    let length = password.chars().count();
    if length < min_length {
        errors.add(field, format!("must be at least {} characters", min_length));
    } else if length > MAX_PASSWORD_LENGTH {
        errors.add(field, format!("must be at most {} characters", MAX_PASSWORD_LENGTH));
    }
}

/// Check an optional free-text field against a maximum length
pub fn check_max_length(errors: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) {
    if let Some(value) = value {
        if value.chars().count() > max {
            errors.add(field, format!("must be at most {} characters", max));
        }
    }
}

/// Trimmed value, or `None` when nothing is left
pub fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@host"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email(&format!("{}@example.com", "a".repeat(250))));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_field_errors() {
        let mut errors = FieldErrors::new();
        assert!(errors.clone().into_result().is_ok());

        errors.add("email", "is invalid");
        errors.add("email", "ignored");
        errors.add("password", "too short");

        assert_eq!(errors.get("email"), Some("is invalid"));
        assert_eq!(errors.to_string(), "email: is invalid; password: too short");

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["password"], "too short");
    }

    #[test]
    fn test_password_bounds() {
        let mut errors = FieldErrors::new();
        check_password(&mut errors, "password", "short", 8);
        assert!(errors.get("password").is_some());

        let mut errors = FieldErrors::new();
        check_password(&mut errors, "password", "long enough", 8);
        assert!(errors.is_empty());

        let mut errors = FieldErrors::new();
        check_password(&mut errors, "password", &"x".repeat(200), 8);
        assert!(errors.get("password").is_some());
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Some("  hi ")), Some("hi".to_string()));
        assert_eq!(trimmed(Some("   ")), None);
        assert_eq!(trimmed(None), None);
    }
}
