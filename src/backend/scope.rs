//! Scope values of the permission backend
//!
//! [`WithUser`] narrows to [`ForProject`], then [`ForRef`], then
//! [`ForChange`]. Narrowing never fails: a project that cannot be loaded, or
//! a change that cannot be read, yields a scope whose checks fail instead.

use crate::access_control::{GroupMembership, PermissionRange, ProjectChain};
use crate::backend::condition::{BooleanCondition, ConditionTarget, PermissionBackendCondition};
use crate::backend::control::{
    ChangeControl, ProjectControl, RefControl, UserContext, ref_denial_advice,
};
use crate::backend::denied::{AuthDeniedPermissionBackend, FailedPermissionBackend, FailedScope};
use crate::backend::visibility::{RefFilterOptions, RefVisibilityControl};
use crate::backend::{BackendInner, change_path, project_path, ref_path};
use crate::change::{Change, ChangeData, ChangeId};
use crate::error::{AuthError, BackendResult, CheckResult, PermissionBackendError, PermissionError};
use crate::identity::Identity;
use crate::permissions::{
    ChangeScopePermission, GlobalPermission, LabelPermission, LabelPermissionWithValue,
    LabelType, ProjectPermission, RefPermission,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Operations shared by every scope
pub trait PermissionScope {
    type Permission: fmt::Display;

    /// The user checks are made for
    fn identity(&self) -> &Identity;

    /// Path of the checked resource, used in logs and condition keys
    fn resource_path(&self) -> String;

    /// Whether the permission is granted.
    ///
    /// Fails only when the check could not be completed.
    fn test(&self, permission: &Self::Permission) -> BackendResult<bool>;

    /// Succeed if the permission is granted, fail with an auth error if not.
    fn check(&self, permission: &Self::Permission) -> CheckResult;

    /// The granted subset of `permissions`, in input order
    fn test_set<I>(&self, permissions: I) -> BackendResult<Vec<Self::Permission>>
    where
        I: IntoIterator<Item = Self::Permission>,
    {
        let mut allowed = Vec::new();
        for permission in permissions {
            if self.test(&permission)? {
                allowed.push(permission);
            }
        }
        Ok(allowed)
    }

    /// Like [`PermissionScope::test`], treating failures as denial.
    ///
    /// Only for hints shown to users; never gate a change on it.
    fn test_or_false(&self, permission: &Self::Permission) -> bool {
        match self.test(permission) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    user = %self.identity(),
                    resource = %self.resource_path(),
                    permission = %permission,
                    error = %e,
                    "Cannot test permission, assuming false"
                );
                false
            }
        }
    }

    /// Succeed if any of `permissions` passes [`PermissionScope::check`].
    ///
    /// Returns the last denial if none does; an empty set succeeds.
    fn check_any<I>(&self, permissions: I) -> CheckResult
    where
        I: IntoIterator<Item = Self::Permission>,
    {
        let mut denied = None;
        for permission in permissions {
            match self.check(&permission) {
                Ok(()) => return Ok(()),
                Err(PermissionError::Auth(e)) => denied = Some(e),
                Err(e) => return Err(e),
            }
        }
        match denied {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn check_with(allowed: BackendResult<bool>, denial: impl FnOnce() -> AuthError) -> CheckResult {
    if allowed? {
        Ok(())
    } else {
        Err(denial().into())
    }
}

/// Advice for checks refused because of the project state
fn state_advice(control: &ProjectControl) -> String {
    format!(
        "Project {} is {} and does not permit this operation.",
        control.name(),
        control.state()
    )
}

// =============================================================================
// WithUser
// =============================================================================

/// Checks on behalf of one user
///
/// Clones share the cache of resolved projects.
#[derive(Clone)]
pub struct WithUser {
    user: Arc<UserContext>,
    projects: Arc<Mutex<LruCache<String, Arc<ProjectControl>>>>,
}

impl WithUser {
    pub(crate) fn new(backend: Arc<BackendInner>, identity: Identity) -> Self {
        let capacity =
            NonZeroUsize::new(backend.settings.request_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            user: Arc::new(UserContext::new(backend, identity)),
            projects: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Effective groups of the user
    pub fn groups(&self) -> &GroupMembership {
        &self.user.groups
    }

    fn project_control(&self, name: &str) -> BackendResult<Arc<ProjectControl>> {
        if let Some(control) = self.projects.lock().get(name) {
            trace!(project = name, "Project control cache hit");
            return Ok(Arc::clone(control));
        }

        let backend = &self.user.backend;
        let chain = ProjectChain::resolve(
            backend.projects.as_ref(),
            name,
            &backend.settings.all_projects,
        )?;
        let control = Arc::new(ProjectControl::new(Arc::clone(&self.user), chain));
        self.projects
            .lock()
            .put(name.to_string(), Arc::clone(&control));
        Ok(control)
    }

    /// Scope to a project; a project that cannot be loaded fails every check
    pub fn project(&self, name: &str) -> ForProject {
        match self.project_control(name) {
            Ok(control) => ForProject(ProjectScope::Resolved(control)),
            Err(e) => {
                debug!(user = %self.identity(), project = name, error = %e, "Cannot load project");
                FailedPermissionBackend::project(self.identity().clone(), name, e)
            }
        }
    }

    /// Shorthand for `project(project).ref_(ref_name)`
    pub fn ref_(&self, project: &str, ref_name: &str) -> ForRef {
        self.project(project).ref_(ref_name)
    }

    /// Scope to a change through its destination ref.
    ///
    /// A change that cannot be loaded yields a scope denying everything.
    pub fn change(&self, cd: &ChangeData) -> ForChange {
        self.project(cd.project()).change(cd)
    }

    /// Projects on which `permission` passes [`PermissionScope::check`].
    ///
    /// Denied and missing projects are left out; other backend failures are
    /// returned.
    pub fn filter<I>(
        &self,
        permission: ProjectPermission,
        projects: I,
    ) -> BackendResult<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut allowed = Vec::new();
        for name in projects {
            let name = name.into();
            match self.project(&name).check(&permission) {
                Ok(()) => allowed.push(name),
                Err(PermissionError::Auth(_)) => {}
                Err(PermissionError::Backend(e)) if e.is_repository_not_found() => {
                    debug!(project = %name, "Skipping missing project");
                }
                Err(PermissionError::Backend(e)) => return Err(e),
            }
        }
        Ok(allowed)
    }

    /// Deferred test of a global capability
    pub fn test_cond(&self, permission: GlobalPermission) -> BooleanCondition {
        BooleanCondition::permission(PermissionBackendCondition::new(ConditionTarget::Global(
            self.clone(),
            permission,
        )))
    }
}

impl PermissionScope for WithUser {
    type Permission = GlobalPermission;

    fn identity(&self) -> &Identity {
        &self.user.identity
    }

    fn resource_path(&self) -> String {
        "/config/server".to_string()
    }

    fn test(&self, permission: &GlobalPermission) -> BackendResult<bool> {
        self.user.can(*permission)
    }

    fn check(&self, permission: &GlobalPermission) -> CheckResult {
        check_with(self.test(permission), || {
            AuthError::not_permitted(permission.describe())
        })
    }
}

impl fmt::Debug for WithUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithUser")
            .field("identity", &self.user.identity)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ForProject
// =============================================================================

#[derive(Clone)]
enum ProjectScope {
    Resolved(Arc<ProjectControl>),
    Failed(FailedScope),
}

/// Checks on one project
#[derive(Clone)]
pub struct ForProject(ProjectScope);

impl ForProject {
    pub(crate) fn failed(scope: FailedScope) -> Self {
        ForProject(ProjectScope::Failed(scope))
    }

    pub fn project_name(&self) -> &str {
        match &self.0 {
            ProjectScope::Resolved(control) => control.name(),
            ProjectScope::Failed(failed) => failed.project(),
        }
    }

    /// The same project, checked for another user
    pub fn user(&self, identity: Identity) -> ForProject {
        match &self.0 {
            ProjectScope::Resolved(control) => {
                WithUser::new(Arc::clone(&control.user().backend), identity).project(control.name())
            }
            ProjectScope::Failed(failed) => ForProject::failed(failed.with_user(identity)),
        }
    }

    /// Scope to a ref, or to a ref pattern such as `refs/heads/*`
    pub fn ref_(&self, ref_name: &str) -> ForRef {
        match &self.0 {
            ProjectScope::Resolved(control) => {
                ForRef(RefScope::Resolved(control.control_for_ref(ref_name)))
            }
            ProjectScope::Failed(failed) => ForRef::failed(failed.with_ref(ref_name)),
        }
    }

    /// Scope to a change of this project through its destination ref
    pub fn change(&self, cd: &ChangeData) -> ForChange {
        match cd.change() {
            Ok(change) => self.loaded_change(change),
            Err(e) => {
                debug!(change = %cd.id(), error = %e, "Change unavailable, denying");
                AuthDeniedPermissionBackend::change(
                    self.identity().clone(),
                    cd.project(),
                    cd.id(),
                    "change unavailable",
                    Some(Arc::new(e)),
                )
            }
        }
    }

    pub(crate) fn loaded_change(&self, change: Arc<Change>) -> ForChange {
        match &self.0 {
            ProjectScope::Resolved(control) if change.project() != control.name() => {
                FailedPermissionBackend::change(
                    self.identity().clone(),
                    change.project(),
                    change.id(),
                    PermissionBackendError::unavailable(format!(
                        "change {} belongs to {}, not {}",
                        change.id(),
                        change.project(),
                        control.name()
                    )),
                )
            }
            ProjectScope::Resolved(control) => ForChange(ChangeScope::Resolved(
                control.control_for_ref(change.dest()).change_control(change),
            )),
            ProjectScope::Failed(failed) => ForChange::failed(
                failed
                    .with_ref(change.dest())
                    .with_change(change.id()),
            ),
        }
    }

    /// Visibility rules for the refs of this project
    pub fn ref_visibility(&self) -> BackendResult<RefVisibilityControl> {
        match &self.0 {
            ProjectScope::Resolved(control) => Ok(RefVisibilityControl::new(Arc::clone(control))),
            ProjectScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    /// Refs among `ref_names` the user may see
    pub fn filter<I>(&self, ref_names: I, options: &RefFilterOptions) -> BackendResult<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.ref_visibility()?.filter(ref_names, options)
    }

    /// Deferred test of a project permission
    pub fn test_cond(&self, permission: ProjectPermission) -> BooleanCondition {
        BooleanCondition::permission(PermissionBackendCondition::new(ConditionTarget::Project(
            self.clone(),
            permission,
        )))
    }
}

impl PermissionScope for ForProject {
    type Permission = ProjectPermission;

    fn identity(&self) -> &Identity {
        match &self.0 {
            ProjectScope::Resolved(control) => control.identity(),
            ProjectScope::Failed(failed) => failed.identity(),
        }
    }

    fn resource_path(&self) -> String {
        project_path(self.project_name())
    }

    fn test(&self, permission: &ProjectPermission) -> BackendResult<bool> {
        match &self.0 {
            ProjectScope::Resolved(control) => {
                Ok(control.state_permits(permission.is_write())? && control.can(*permission)?)
            }
            ProjectScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    fn check(&self, permission: &ProjectPermission) -> CheckResult {
        match &self.0 {
            ProjectScope::Resolved(control) => {
                if !control.state_permits(permission.is_write())? {
                    return Err(AuthError::not_permitted(permission.describe())
                        .with_advice(state_advice(control))
                        .into());
                }
                check_with(control.can(*permission), || {
                    AuthError::not_permitted(permission.describe())
                })
            }
            ProjectScope::Failed(failed) => Err(failed.check_error()),
        }
    }
}

impl fmt::Debug for ForProject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForProject")
            .field("identity", self.identity())
            .field("project", &self.project_name())
            .field("failed", &matches!(self.0, ProjectScope::Failed(_)))
            .finish()
    }
}

// =============================================================================
// ForRef
// =============================================================================

#[derive(Clone)]
enum RefScope {
    Resolved(RefControl),
    Failed(FailedScope),
}

/// Checks on one ref of a project
#[derive(Clone)]
pub struct ForRef(RefScope);

impl ForRef {
    pub(crate) fn failed(scope: FailedScope) -> Self {
        ForRef(RefScope::Failed(scope))
    }

    pub fn project_name(&self) -> &str {
        match &self.0 {
            RefScope::Resolved(rc) => rc.project().name(),
            RefScope::Failed(failed) => failed.project(),
        }
    }

    pub fn ref_name(&self) -> &str {
        match &self.0 {
            RefScope::Resolved(rc) => rc.ref_name(),
            RefScope::Failed(failed) => failed.ref_name().unwrap_or_default(),
        }
    }

    /// The same ref, checked for another user
    pub fn user(&self, identity: Identity) -> ForRef {
        match &self.0 {
            RefScope::Resolved(rc) => {
                let project = rc.project();
                WithUser::new(Arc::clone(&project.user().backend), identity)
                    .ref_(project.name(), rc.ref_name())
            }
            RefScope::Failed(failed) => ForRef::failed(failed.with_user(identity)),
        }
    }

    /// Scope to a change; checks use the change's own destination ref
    pub fn change(&self, cd: &ChangeData) -> ForChange {
        match &self.0 {
            RefScope::Resolved(rc) => {
                ForProject(ProjectScope::Resolved(Arc::clone(rc.project()))).change(cd)
            }
            RefScope::Failed(failed) => ForChange::failed(failed.with_change(cd.id())),
        }
    }

    /// Vote range for a label permission on this ref, ignoring change
    /// ownership
    pub fn range(&self, permission: &LabelPermission) -> BackendResult<PermissionRange> {
        match &self.0 {
            RefScope::Resolved(rc) => Ok(rc.range(&permission.permission_name(), false)),
            RefScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    /// Deferred test of a ref permission
    pub fn test_cond(&self, permission: RefPermission) -> BooleanCondition {
        BooleanCondition::permission(PermissionBackendCondition::new(ConditionTarget::Ref(
            self.clone(),
            permission,
        )))
    }
}

impl PermissionScope for ForRef {
    type Permission = RefPermission;

    fn identity(&self) -> &Identity {
        match &self.0 {
            RefScope::Resolved(rc) => rc.project().identity(),
            RefScope::Failed(failed) => failed.identity(),
        }
    }

    fn resource_path(&self) -> String {
        ref_path(self.project_name(), self.ref_name())
    }

    fn test(&self, permission: &RefPermission) -> BackendResult<bool> {
        match &self.0 {
            RefScope::Resolved(rc) => {
                Ok(rc.project().state_permits(permission.is_write())? && rc.can(*permission)?)
            }
            RefScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    fn check(&self, permission: &RefPermission) -> CheckResult {
        match &self.0 {
            RefScope::Resolved(rc) => check_ref(rc, *permission),
            RefScope::Failed(failed) => Err(failed.check_error()),
        }
    }
}

fn check_ref(rc: &RefControl, permission: RefPermission) -> CheckResult {
    let denial = || {
        AuthError::new(format!(
            "{} not permitted for {}",
            permission.describe(),
            rc.ref_name()
        ))
    };
    if !rc.project().state_permits(permission.is_write())? {
        return Err(denial().with_advice(state_advice(rc.project())).into());
    }
    check_with(rc.can(permission), || {
        denial().with_advice(ref_denial_advice(permission, rc.ref_name()))
    })
}

impl fmt::Debug for ForRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForRef")
            .field("identity", self.identity())
            .field("project", &self.project_name())
            .field("ref", &self.ref_name())
            .field("failed", &matches!(self.0, RefScope::Failed(_)))
            .finish()
    }
}

// =============================================================================
// ForChange
// =============================================================================

#[derive(Clone)]
enum ChangeScope {
    Resolved(ChangeControl),
    Failed(FailedScope),
}

/// Checks on one change
#[derive(Clone)]
pub struct ForChange(ChangeScope);

impl ForChange {
    pub(crate) fn failed(scope: FailedScope) -> Self {
        ForChange(ChangeScope::Failed(scope))
    }

    pub fn project_name(&self) -> &str {
        match &self.0 {
            ChangeScope::Resolved(cc) => cc.change().project(),
            ChangeScope::Failed(failed) => failed.project(),
        }
    }

    pub fn change_id(&self) -> Option<ChangeId> {
        match &self.0 {
            ChangeScope::Resolved(cc) => Some(cc.change().id()),
            ChangeScope::Failed(failed) => failed.change(),
        }
    }

    /// The same change, checked for another user
    pub fn user(&self, identity: Identity) -> ForChange {
        match &self.0 {
            ChangeScope::Resolved(cc) => {
                let project = cc.ref_control().project();
                WithUser::new(Arc::clone(&project.user().backend), identity)
                    .project(project.name())
                    .loaded_change(Arc::clone(cc.change()))
            }
            ChangeScope::Failed(failed) => ForChange::failed(failed.with_user(identity)),
        }
    }

    /// Votes of `label` the user may cast
    pub fn test_label(&self, label: &LabelType) -> BackendResult<Vec<LabelPermissionWithValue>> {
        let mut allowed = Vec::new();
        for vote in label.permissions() {
            if self.test(&ChangeScopePermission::LabelValue(vote.clone()))? {
                allowed.push(vote);
            }
        }
        Ok(allowed)
    }

    /// Votes of every label in `labels` the user may cast
    pub fn test_labels(&self, labels: &[LabelType]) -> BackendResult<Vec<LabelPermissionWithValue>> {
        let mut allowed = Vec::new();
        for label in labels {
            allowed.extend(self.test_label(label)?);
        }
        Ok(allowed)
    }

    /// Vote range of a label permission, counting change ownership
    pub fn range(&self, permission: &LabelPermission) -> BackendResult<PermissionRange> {
        match &self.0 {
            ChangeScope::Resolved(cc) => Ok(cc.label_range(permission)),
            ChangeScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    /// Deferred test of a change permission
    pub fn test_cond(&self, permission: impl Into<ChangeScopePermission>) -> BooleanCondition {
        BooleanCondition::permission(PermissionBackendCondition::new(ConditionTarget::Change(
            self.clone(),
            permission.into(),
        )))
    }

    fn evaluate(cc: &ChangeControl, permission: &ChangeScopePermission) -> BackendResult<bool> {
        match permission {
            ChangeScopePermission::Change(p) => cc.can(*p),
            ChangeScopePermission::Label(p) => Ok(cc.can_label(p)),
            ChangeScopePermission::LabelValue(p) => Ok(cc.can_label_value(p)),
        }
    }
}

/// Votes modify the change just like other non-read permissions
fn is_write(permission: &ChangeScopePermission) -> bool {
    match permission {
        ChangeScopePermission::Change(p) => p.is_write(),
        ChangeScopePermission::Label(_) | ChangeScopePermission::LabelValue(_) => true,
    }
}

impl PermissionScope for ForChange {
    type Permission = ChangeScopePermission;

    fn identity(&self) -> &Identity {
        match &self.0 {
            ChangeScope::Resolved(cc) => cc.ref_control().project().identity(),
            ChangeScope::Failed(failed) => failed.identity(),
        }
    }

    fn resource_path(&self) -> String {
        match &self.0 {
            ChangeScope::Resolved(cc) => change_path(cc.change().project(), cc.change().id()),
            ChangeScope::Failed(failed) => failed.resource_path(),
        }
    }

    fn test(&self, permission: &ChangeScopePermission) -> BackendResult<bool> {
        match &self.0 {
            ChangeScope::Resolved(cc) => {
                let project = cc.ref_control().project();
                Ok(project.state_permits(is_write(permission))?
                    && Self::evaluate(cc, permission)?)
            }
            ChangeScope::Failed(failed) => Err(failed.test_error()),
        }
    }

    fn check(&self, permission: &ChangeScopePermission) -> CheckResult {
        match &self.0 {
            ChangeScope::Resolved(cc) => {
                let project = cc.ref_control().project();
                if !project.state_permits(is_write(permission))? {
                    return Err(AuthError::not_permitted(permission.describe())
                        .with_advice(state_advice(project))
                        .into());
                }
                check_with(Self::evaluate(cc, permission), || {
                    AuthError::not_permitted(permission.describe())
                })
            }
            ChangeScope::Failed(failed) => Err(failed.check_error()),
        }
    }
}

impl fmt::Debug for ForChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForChange")
            .field("identity", self.identity())
            .field("project", &self.project_name())
            .field("change", &self.change_id())
            .field("failed", &matches!(self.0, ChangeScope::Failed(_)))
            .finish()
    }
}
