//! Scopes that fail every check
//!
//! When narrowing a scope runs into a failure (a project that cannot be
//! loaded, a change that cannot be read) the result is still a scope value,
//! so callers keep the same shape and fail safely on their next check.

use crate::backend::scope::{ForChange, ForProject, ForRef};
use crate::backend::{change_path, project_path, ref_path};
use crate::change::ChangeId;
use crate::error::{AuthError, PermissionBackendError, PermissionError, SharedError};
use crate::identity::Identity;

#[derive(Debug, Clone)]
pub(crate) enum Failure {
    /// `check` reports a denial, `test` a backend failure
    Denied {
        message: String,
        cause: Option<SharedError>,
    },
    /// Both `check` and `test` report the backend failure
    Unavailable(PermissionBackendError),
}

/// Target and failure of a scope that cannot grant anything
#[derive(Debug, Clone)]
pub(crate) struct FailedScope {
    identity: Identity,
    project: String,
    ref_name: Option<String>,
    change: Option<ChangeId>,
    failure: Failure,
}

impl FailedScope {
    fn new(identity: Identity, project: impl Into<String>, failure: Failure) -> Self {
        Self {
            identity,
            project: project.into(),
            ref_name: None,
            change: None,
            failure,
        }
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn project(&self) -> &str {
        &self.project
    }

    pub(crate) fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    pub(crate) fn change(&self) -> Option<ChangeId> {
        self.change
    }

    pub(crate) fn with_user(&self, identity: Identity) -> Self {
        Self {
            identity,
            ..self.clone()
        }
    }

    pub(crate) fn with_ref(&self, ref_name: &str) -> Self {
        Self {
            ref_name: Some(ref_name.to_string()),
            ..self.clone()
        }
    }

    pub(crate) fn with_change(&self, change: ChangeId) -> Self {
        Self {
            change: Some(change),
            ..self.clone()
        }
    }

    pub(crate) fn resource_path(&self) -> String {
        match (self.change, &self.ref_name) {
            (Some(change), _) => change_path(&self.project, change),
            (None, Some(ref_name)) => ref_path(&self.project, ref_name),
            (None, None) => project_path(&self.project),
        }
    }

    pub(crate) fn check_error(&self) -> PermissionError {
        match &self.failure {
            Failure::Denied { message, cause } => {
                AuthError::new(message.clone()).with_cause(cause.clone()).into()
            }
            Failure::Unavailable(e) => e.clone().into(),
        }
    }

    pub(crate) fn test_error(&self) -> PermissionBackendError {
        match &self.failure {
            Failure::Denied { message, cause } => {
                PermissionBackendError::unavailable_with_cause(message.clone(), cause.clone())
            }
            Failure::Unavailable(e) => e.clone(),
        }
    }
}

/// Scopes whose checks always fail with an auth error
///
/// Used when an upstream failure has already been observed and must become
/// a permanent, explicit denial. `test` on these scopes fails with a backend
/// error carrying the same message and cause.
pub struct AuthDeniedPermissionBackend;

impl AuthDeniedPermissionBackend {
    fn failure(message: impl Into<String>, cause: Option<SharedError>) -> Failure {
        Failure::Denied {
            message: message.into(),
            cause,
        }
    }

    pub fn project(
        identity: Identity,
        project: &str,
        message: impl Into<String>,
        cause: Option<SharedError>,
    ) -> ForProject {
        ForProject::failed(FailedScope::new(
            identity,
            project,
            Self::failure(message, cause),
        ))
    }

    pub fn ref_(
        identity: Identity,
        project: &str,
        ref_name: &str,
        message: impl Into<String>,
        cause: Option<SharedError>,
    ) -> ForRef {
        ForRef::failed(
            FailedScope::new(identity, project, Self::failure(message, cause)).with_ref(ref_name),
        )
    }

    pub fn change(
        identity: Identity,
        project: &str,
        change: ChangeId,
        message: impl Into<String>,
        cause: Option<SharedError>,
    ) -> ForChange {
        ForChange::failed(
            FailedScope::new(identity, project, Self::failure(message, cause)).with_change(change),
        )
    }
}

/// Scopes whose checks and tests always fail with a backend error
pub struct FailedPermissionBackend;

impl FailedPermissionBackend {
    pub fn project(identity: Identity, project: &str, error: PermissionBackendError) -> ForProject {
        ForProject::failed(FailedScope::new(
            identity,
            project,
            Failure::Unavailable(error),
        ))
    }

    pub fn ref_(
        identity: Identity,
        project: &str,
        ref_name: &str,
        error: PermissionBackendError,
    ) -> ForRef {
        ForRef::failed(
            FailedScope::new(identity, project, Failure::Unavailable(error)).with_ref(ref_name),
        )
    }

    pub fn change(
        identity: Identity,
        project: &str,
        change: ChangeId,
        error: PermissionBackendError,
    ) -> ForChange {
        ForChange::failed(
            FailedScope::new(identity, project, Failure::Unavailable(error)).with_change(change),
        )
    }
}
