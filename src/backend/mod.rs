//! Permission backend
//!
//! The public entry point of the engine. A [`PermissionBackend`] is narrowed
//! one scope at a time:
//!
//! ```ignore
//! let backend = PermissionBackend::builder(projects, groups, changes).build();
//! backend
//!     .user(identity)
//!     .project("app")
//!     .ref_("refs/heads/master")
//!     .check(&RefPermission::Update)?;
//! ```
//!
//! Every scope is an immutable value implementing [`PermissionScope`], so
//! `check`, `test`, `test_or_false` and `check_any` work the same way at every
//! level.

pub mod condition;
mod control;
pub mod denied;
pub mod scope;
pub mod visibility;

pub use condition::{BooleanCondition, ConditionTarget, PermissionBackendCondition};
pub use control::CapabilityCollection;
pub use denied::{AuthDeniedPermissionBackend, FailedPermissionBackend};
pub use scope::{ForChange, ForProject, ForRef, PermissionScope, WithUser};
pub use visibility::{RefFilterOptions, RefVisibilityControl};

use crate::access_control::{
    ANONYMOUS_USERS, AccessResolver, GroupBackend, GroupUuid, ProjectProvider, SectionSortCache,
};
use crate::change::{ChangeData, ChangeId, ChangeProvider};
use crate::identity::{AccountId, IdentifiedUser, Identity};
use crate::util::ResourcePath;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default capacity of the per-user project control cache
pub const DEFAULT_REQUEST_CACHE_SIZE: usize = 50;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Root of every project hierarchy; holds the global capabilities
    pub all_projects: String,
    /// Project holding account refs
    pub all_users: String,
    /// Project controls a single user scope keeps before evicting
    pub request_cache_size: usize,
    /// Skip per-ref filtering when the user can read `refs/*`
    pub skip_full_ref_evaluation: bool,
    /// Groups allowed to fetch
    pub upload_groups: Vec<GroupUuid>,
    /// Groups allowed to push
    pub receive_groups: Vec<GroupUuid>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            all_projects: "All-Projects".to_string(),
            all_users: "All-Users".to_string(),
            request_cache_size: DEFAULT_REQUEST_CACHE_SIZE,
            skip_full_ref_evaluation: true,
            upload_groups: vec![ANONYMOUS_USERS],
            receive_groups: vec![ANONYMOUS_USERS],
        }
    }
}

/// Collaborators and settings shared by every scope
pub(crate) struct BackendInner {
    pub(crate) projects: Arc<dyn ProjectProvider>,
    pub(crate) groups: Arc<dyn GroupBackend>,
    pub(crate) changes: Arc<dyn ChangeProvider>,
    pub(crate) resolver: AccessResolver,
    pub(crate) settings: BackendSettings,
}

/// Entry point for permission checks
#[derive(Clone)]
pub struct PermissionBackend {
    inner: Arc<BackendInner>,
}

impl PermissionBackend {
    pub fn builder(
        projects: Arc<dyn ProjectProvider>,
        groups: Arc<dyn GroupBackend>,
        changes: Arc<dyn ChangeProvider>,
    ) -> PermissionBackendBuilder {
        PermissionBackendBuilder {
            projects,
            groups,
            changes,
            settings: BackendSettings::default(),
            sort_cache: None,
        }
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.inner.settings
    }

    pub fn sort_cache(&self) -> &Arc<SectionSortCache> {
        self.inner.resolver.sort_cache()
    }

    /// Scope checks to `identity`
    pub fn user(&self, identity: Identity) -> WithUser {
        WithUser::new(Arc::clone(&self.inner), identity)
    }

    /// Scope checks to an account that is not the caller, e.g. to test what
    /// a reviewer could see
    pub fn absent_user(&self, account: AccountId) -> WithUser {
        self.user(Identity::Identified(IdentifiedUser::new(account)))
    }

    /// Change `id` of `project`, loaded from the change provider on first use
    pub fn change_data(&self, project: &str, id: ChangeId) -> ChangeData {
        ChangeData::lazy(project, id, Arc::clone(&self.inner.changes))
    }

    /// Evaluate every distinct (user, resource, permission) once and store
    /// the result on all conditions sharing it
    pub fn bulk_evaluate_test<'a>(
        &self,
        conditions: impl IntoIterator<Item = &'a PermissionBackendCondition>,
    ) {
        let conditions: Vec<_> = conditions
            .into_iter()
            .map(|condition| (condition.key(), condition))
            .collect();

        // A result set before the call is shared with every duplicate
        let mut results: HashMap<(String, String, String), bool> = HashMap::new();
        for (key, condition) in &conditions {
            if let Some(value) = condition.preset() {
                results.entry(key.clone()).or_insert(value);
            }
        }

        let mut evaluated = 0usize;
        for (key, condition) in &conditions {
            let value = match results.get(key) {
                Some(value) => *value,
                None => {
                    evaluated += 1;
                    let value = condition.evaluate();
                    results.insert(key.clone(), value);
                    value
                }
            };
            condition.set(value);
        }

        debug!(
            total = conditions.len(),
            evaluated, "Bulk evaluated permission conditions"
        );
    }
}

impl fmt::Debug for PermissionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionBackend")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PermissionBackend`]
pub struct PermissionBackendBuilder {
    projects: Arc<dyn ProjectProvider>,
    groups: Arc<dyn GroupBackend>,
    changes: Arc<dyn ChangeProvider>,
    settings: BackendSettings,
    sort_cache: Option<Arc<SectionSortCache>>,
}

impl PermissionBackendBuilder {
    pub fn settings(mut self, settings: BackendSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a sort cache with the project store, so reloading a project
    /// invalidates orderings computed with it
    pub fn sort_cache(mut self, cache: Arc<SectionSortCache>) -> Self {
        self.sort_cache = Some(cache);
        self
    }

    pub fn build(self) -> PermissionBackend {
        let sort_cache = self.sort_cache.unwrap_or_default();
        PermissionBackend {
            inner: Arc::new(BackendInner {
                projects: self.projects,
                groups: self.groups,
                changes: self.changes,
                resolver: AccessResolver::new(sort_cache),
                settings: self.settings,
            }),
        }
    }
}

pub(crate) fn project_path(project: &str) -> String {
    ResourcePath::new("projects").encoded(project).build()
}

pub(crate) fn ref_path(project: &str, ref_name: &str) -> String {
    ResourcePath::new("projects")
        .encoded(project)
        .literal("+refs")
        .raw(ref_name)
        .build()
}

pub(crate) fn change_path(project: &str, change: ChangeId) -> String {
    ResourcePath::new("projects")
        .encoded(project)
        .literal("+changes")
        .encoded(change)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BackendSettings::default();
        assert_eq!(settings.all_projects, "All-Projects");
        assert_eq!(settings.request_cache_size, DEFAULT_REQUEST_CACHE_SIZE);
        assert_eq!(settings.upload_groups, vec![ANONYMOUS_USERS]);
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(project_path("team/app"), "/projects/team%2Fapp");
        assert_eq!(
            ref_path("app", "refs/heads/master"),
            "/projects/app/+refs/refs/heads/master"
        );
        assert_eq!(change_path("app", ChangeId(42)), "/projects/app/+changes/42");
    }
}
