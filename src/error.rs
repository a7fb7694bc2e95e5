//! Error types for refgate
//!
//! Two failure kinds are kept apart: an [`AuthError`] is a
//! deliberate denial that is safe to show to the user, while a
//! [`PermissionBackendError`] means the decision could not be made at all.
//! Configuration problems are reported through [`ConfigError`] at load time.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared, clonable error cause.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },

    #[error("Invalid ref pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid permission rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// A permission was denied.
#[derive(Error, Debug, Clone)]
#[error("{message}{}", advice_suffix(.advice))]
pub struct AuthError {
    message: String,
    advice: Option<String>,
    #[source]
    cause: Option<SharedError>,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            advice: None,
            cause: None,
        }
    }

    /// Denial of `permission`, phrased the way it is shown to users.
    pub fn not_permitted(permission: impl fmt::Display) -> Self {
        Self::new(format!("{} not permitted", permission))
    }

    pub fn with_advice(mut self, advice: impl Into<String>) -> Self {
        self.advice = Some(advice.into());
        self
    }

    pub fn with_cause(mut self, cause: Option<SharedError>) -> Self {
        self.cause = cause;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn advice(&self) -> Option<&str> {
        self.advice.as_deref()
    }

    pub fn cause(&self) -> Option<&SharedError> {
        self.cause.as_ref()
    }
}

fn advice_suffix(advice: &Option<String>) -> String {
    advice
        .as_ref()
        .map(|a| format!("\n\n{}", a))
        .unwrap_or_default()
}

/// The permission check itself could not be completed.
#[derive(Error, Debug, Clone)]
pub enum PermissionBackendError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("cannot check visibility of tag ref {0}; filter tags in bulk")]
    TagRefNotSupported(String),

    #[error("{message}")]
    Unavailable {
        message: String,
        #[source]
        cause: Option<SharedError>,
    },
}

impl PermissionBackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        PermissionBackendError::Unavailable {
            message: message.into(),
            cause: None,
        }
    }

    pub fn unavailable_with_cause(message: impl Into<String>, cause: Option<SharedError>) -> Self {
        PermissionBackendError::Unavailable {
            message: message.into(),
            cause,
        }
    }

    /// True if this error, or any error in its cause chain, reports a
    /// repository that does not exist.
    pub fn is_repository_not_found(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            let err = unshare(err);
            if let Some(PermissionBackendError::RepositoryNotFound(_)) =
                err.downcast_ref::<PermissionBackendError>()
            {
                return true;
            }
            current = err.source();
        }
        false
    }
}

/// The error behind a [`SharedError`] cause.
///
/// A shared cause shows up in a `source()` chain as the `Arc` itself, and the
/// `Arc`'s own `source()` skips the wrapped error.
fn unshare<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    match err.downcast_ref::<SharedError>() {
        Some(shared) => &**shared,
        None => err,
    }
}

/// Failure of a `check` call: either a denial or a backend failure.
#[derive(Error, Debug, Clone)]
pub enum PermissionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Backend(#[from] PermissionBackendError),
}

impl PermissionError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PermissionError::Auth(_))
    }

    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            PermissionError::Auth(e) => Some(e),
            PermissionError::Backend(_) => None,
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for `test` style calls
pub type BackendResult<T> = std::result::Result<T, PermissionBackendError>;

/// Result type alias for `check` style calls
pub type CheckResult = std::result::Result<(), PermissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display_includes_advice() {
        let err = AuthError::not_permitted("push on refs/heads/master")
            .with_advice("To push into this reference you need 'Push' rights.");
        let text = err.to_string();
        assert!(text.starts_with("push on refs/heads/master not permitted"));
        assert!(text.ends_with("you need 'Push' rights."));
        assert_eq!(err.message(), "push on refs/heads/master not permitted");
    }

    #[test]
    fn test_repository_not_found_in_cause_chain() {
        let direct = PermissionBackendError::RepositoryNotFound("p".into());
        assert!(direct.is_repository_not_found());

        let wrapped = PermissionBackendError::unavailable_with_cause(
            "project 'p' is unavailable",
            Some(Arc::new(direct)),
        );
        assert!(wrapped.is_repository_not_found());

        let twice = PermissionBackendError::unavailable_with_cause(
            "cannot list projects",
            Some(Arc::new(wrapped)),
        );
        assert!(twice.is_repository_not_found());

        assert!(!PermissionBackendError::unavailable("storage offline").is_repository_not_found());
    }

    #[test]
    fn test_config_error_constructors() {
        let err = ConfigError::invalid_pattern("^^refs/*", "bad regex");
        assert!(err.to_string().contains("^^refs/*"));

        let err = ConfigError::invalid_rule("grant group x", "unknown action");
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    fn test_permission_error_kinds() {
        let err: PermissionError = AuthError::new("nope").into();
        assert!(err.is_auth());
        assert_eq!(err.as_auth().map(AuthError::message), Some("nope"));

        let err: PermissionError = PermissionBackendError::unavailable("down").into();
        assert!(!err.is_auth());
    }

    #[test]
    fn test_app_error_wraps_both_sources() {
        fn load() -> Result<()> {
            Err(ConfigError::invalid("bad").into())
        }
        fn deny() -> Result<()> {
            Err(PermissionError::from(AuthError::new("nope")).into())
        }

        assert!(matches!(load(), Err(AppError::Config(_))));
        let err = deny().unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
