//! Permission evaluation for one user
//!
//! A [`UserContext`] holds the acting identity and its groups. From it,
//! [`ProjectControl`] evaluates project permissions over a resolved project
//! chain, [`RefControl`] narrows that to one ref and [`ChangeControl`] to one
//! change on that ref. Scoped permissions are translated into the
//! configuration-level permission names the access sections use.

use crate::access_control::groups::{GroupMembership, PROJECT_OWNERS};
use crate::access_control::patterns::ALL_REFS;
use crate::access_control::{
    PermissionRange, PermissionRule, Project, ProjectChain, ProjectState, RelevantRules,
};
use crate::backend::BackendInner;
use crate::change::Change;
use crate::error::BackendResult;
use crate::identity::{AccessPath, Identity};
use crate::permissions::{
    ChangePermission, GlobalPermission, LabelPermission, LabelPermissionWithValue,
    ProjectPermission, RefPermission, names,
};
use crate::util::refs;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Global capabilities, as granted on the root project
#[derive(Debug, Clone, Default)]
pub struct CapabilityCollection {
    rules: HashMap<String, Vec<PermissionRule>>,
}

impl CapabilityCollection {
    pub fn from_project(root: &Project) -> Self {
        let rules = root
            .capabilities()
            .iter()
            .map(|p| (p.name().to_string(), p.rules().to_vec()))
            .collect();
        Self { rules }
    }

    pub fn rules(&self, name: &str) -> &[PermissionRule] {
        self.rules.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// An ALLOW rule for `name` names one of `groups`
    pub fn allows(&self, name: &str, groups: &GroupMembership) -> bool {
        self.rules(name)
            .iter()
            .any(|r| r.is_allow() && groups.contains(r.group()))
    }

    /// No DENY or BLOCK rule for `name` names one of `groups`
    pub fn not_denied(&self, name: &str, groups: &GroupMembership) -> bool {
        !self
            .rules(name)
            .iter()
            .any(|r| !r.is_allow() && groups.contains(r.group()))
    }
}

/// The acting user of a request
pub(crate) struct UserContext {
    pub(crate) backend: Arc<BackendInner>,
    pub(crate) identity: Identity,
    pub(crate) groups: GroupMembership,
    capabilities: OnceLock<BackendResult<Arc<CapabilityCollection>>>,
}

impl UserContext {
    pub(crate) fn new(backend: Arc<BackendInner>, identity: Identity) -> Self {
        let groups = backend.groups.effective_groups(&identity);
        debug!(user = %identity, groups = groups.len(), "Resolved group membership");
        Self {
            backend,
            identity,
            groups,
            capabilities: OnceLock::new(),
        }
    }

    fn capabilities(&self) -> BackendResult<Arc<CapabilityCollection>> {
        self.capabilities
            .get_or_init(|| {
                let root = &self.backend.settings.all_projects;
                let collection = match self.backend.projects.get_project(root)? {
                    Some(project) => CapabilityCollection::from_project(&project),
                    None => {
                        warn!(project = %root, "Root project missing, no capabilities granted");
                        CapabilityCollection::default()
                    }
                };
                Ok(Arc::new(collection))
            })
            .clone()
    }

    pub(crate) fn is_admin(&self) -> BackendResult<bool> {
        self.can(GlobalPermission::AdministrateServer)
    }

    /// Evaluate a global capability
    pub(crate) fn can(&self, permission: GlobalPermission) -> BackendResult<bool> {
        if self.identity.is_internal() {
            return Ok(true);
        }

        let capabilities = self.capabilities()?;
        let has = |p: GlobalPermission| capabilities.allows(p.as_str(), &self.groups);
        let admin = || has(GlobalPermission::AdministrateServer);

        let allowed = match permission {
            GlobalPermission::AdministrateServer
            | GlobalPermission::AccessDatabase
            | GlobalPermission::RunAs => has(permission),
            GlobalPermission::EmailReviewers => {
                has(permission) || capabilities.not_denied(permission.as_str(), &self.groups)
            }
            GlobalPermission::FlushCaches
            | GlobalPermission::KillTask
            | GlobalPermission::RunGc
            | GlobalPermission::ViewCaches
            | GlobalPermission::ViewQueue => {
                has(permission) || has(GlobalPermission::MaintainServer) || admin()
            }
            _ => has(permission) || admin(),
        };

        trace!(user = %self.identity, permission = %permission, allowed, "Evaluated capability");
        Ok(allowed)
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("identity", &self.identity)
            .field("groups", &self.groups)
            .finish()
    }
}

/// Permissions of one user on one project
pub(crate) struct ProjectControl {
    user: Arc<UserContext>,
    chain: ProjectChain,
    /// User groups, plus PROJECT_OWNERS for declared owners
    groups: GroupMembership,
    declared_owner: bool,
    rules: Mutex<HashMap<String, Arc<RelevantRules>>>,
}

impl ProjectControl {
    pub(crate) fn new(user: Arc<UserContext>, chain: ProjectChain) -> Self {
        let all = Arc::new(user.backend.resolver.relevant(
            &chain,
            ALL_REFS,
            user.identity.username(),
        ));
        let declared_owner = all.can_perform(names::OWNER, &user.groups, false);
        let groups = if declared_owner {
            user.groups.with_group(PROJECT_OWNERS)
        } else {
            user.groups.clone()
        };

        debug!(
            user = %user.identity,
            project = chain.target().name(),
            declared_owner,
            "Created project control"
        );

        Self {
            rules: Mutex::new(HashMap::from([(ALL_REFS.to_string(), all)])),
            user,
            chain,
            groups,
            declared_owner,
        }
    }

    pub(crate) fn user(&self) -> &Arc<UserContext> {
        &self.user
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.user.identity
    }

    pub(crate) fn project(&self) -> &Arc<Project> {
        self.chain.target()
    }

    pub(crate) fn name(&self) -> &str {
        self.project().name()
    }

    pub(crate) fn state(&self) -> ProjectState {
        self.project().state()
    }

    pub(crate) fn groups(&self) -> &GroupMembership {
        &self.groups
    }

    fn relevant(&self, ref_name: &str) -> Arc<RelevantRules> {
        if let Some(rules) = self.rules.lock().get(ref_name) {
            return Arc::clone(rules);
        }
        let rules = Arc::new(self.user.backend.resolver.relevant(
            &self.chain,
            ref_name,
            self.identity().username(),
        ));
        self.rules
            .lock()
            .insert(ref_name.to_string(), Arc::clone(&rules));
        rules
    }

    /// Control for a ref, or for a ref pattern such as `refs/heads/*`
    pub(crate) fn control_for_ref(self: &Arc<Self>, ref_name: &str) -> RefControl {
        RefControl {
            project: Arc::clone(self),
            rules: self.relevant(ref_name),
            ref_name: ref_name.to_string(),
        }
    }

    pub(crate) fn is_admin(&self) -> BackendResult<bool> {
        self.user.is_admin()
    }

    pub(crate) fn is_owner(&self) -> BackendResult<bool> {
        Ok(self.declared_owner || self.is_admin()?)
    }

    /// Whether the project state admits a read (or write) for this user.
    ///
    /// Hidden projects remain readable by their owners.
    pub(crate) fn state_permits(&self, write: bool) -> BackendResult<bool> {
        let state = self.state();
        if write {
            return Ok(state.permits_write());
        }
        Ok(state.permits_read() || self.identity().is_internal() || self.is_owner()?)
    }

    /// Any section granting `name` to the user actually lets them perform it
    pub(crate) fn can_perform_on_any_ref(self: &Arc<Self>, name: &str) -> bool {
        for project in self.chain.iter() {
            for section in project.sections() {
                let Some(permission) = section.permission(name) else {
                    continue;
                };
                if permission
                    .rules()
                    .iter()
                    .any(|r| r.is_allow() && self.groups.contains(r.group()))
                    && self.control_for_ref(section.name()).can_perform(name)
                {
                    return true;
                }
            }
        }
        false
    }

    /// `name` is granted on `refs/*` and on every other pattern mentioning it,
    /// except the patterns in `ignore`
    pub(crate) fn can_perform_on_all_refs(self: &Arc<Self>, name: &str, ignore: &[&str]) -> bool {
        let mut patterns: Vec<String> = Vec::new();
        for project in self.chain.iter() {
            for section in project.sections() {
                if section.permission(name).is_some()
                    && !patterns.iter().any(|p| p == section.name())
                {
                    patterns.push(section.name().to_string());
                }
            }
        }
        if !patterns.iter().any(|p| p == ALL_REFS) {
            return false;
        }

        let mut can = false;
        for pattern in &patterns {
            if self.control_for_ref(pattern).can_perform(name) {
                can = true;
            } else if !ignore.contains(&pattern.as_str()) {
                return false;
            }
        }
        can
    }

    pub(crate) fn all_refs_are_visible(self: &Arc<Self>, ignore: &[&str]) -> bool {
        self.identity().is_internal() || self.can_perform_on_all_refs(names::READ, ignore)
    }

    fn can_create_changes(self: &Arc<Self>) -> bool {
        self.chain.iter().any(|project| {
            project.sections().iter().any(|section| {
                section.name().starts_with(refs::REFS_FOR)
                    && section.permission(names::PUSH).is_some()
                    && self.control_for_ref(section.name()).can_perform(names::PUSH)
            })
        })
    }

    /// Evaluate a project permission, ignoring the project state
    pub(crate) fn can(self: &Arc<Self>, permission: ProjectPermission) -> BackendResult<bool> {
        let settings = &self.user.backend.settings;
        let allowed = match permission {
            ProjectPermission::Access => {
                self.identity().is_internal()
                    || self.is_owner()?
                    || self.can_perform_on_any_ref(names::READ)
            }
            ProjectPermission::Read => self.all_refs_are_visible(&[]),
            ProjectPermission::CreateRef => self.can_perform_on_any_ref(names::CREATE),
            ProjectPermission::CreateTagRef => {
                self.can_perform_on_any_ref(names::CREATE_TAG)
                    || self.can_perform_on_any_ref(names::CREATE_SIGNED_TAG)
            }
            ProjectPermission::CreateChange => self.can_create_changes(),
            ProjectPermission::RunUploadPack => self.groups.contains_any(&settings.upload_groups),
            ProjectPermission::RunReceivePack => {
                self.groups.contains_any(&settings.receive_groups)
            }
            ProjectPermission::PushAtLeastOneRef => {
                self.can_perform_on_any_ref(names::PUSH)
                    || self.can_perform_on_any_ref(names::CREATE_TAG)
                    || self.is_owner()?
            }
            ProjectPermission::ReadConfig => {
                self.control_for_ref(refs::REFS_CONFIG).is_visible()
            }
            ProjectPermission::WriteConfig | ProjectPermission::BanCommit => self.is_owner()?,
            ProjectPermission::ReadReflog => {
                self.user.can(GlobalPermission::AccessDatabase)? || self.is_owner()?
            }
        };

        trace!(
            user = %self.identity(),
            project = self.name(),
            permission = %permission,
            allowed,
            "Evaluated project permission"
        );
        Ok(allowed)
    }
}

/// Permissions of one user on one ref of a project
#[derive(Clone)]
pub(crate) struct RefControl {
    project: Arc<ProjectControl>,
    ref_name: String,
    rules: Arc<RelevantRules>,
}

impl RefControl {
    pub(crate) fn project(&self) -> &Arc<ProjectControl> {
        &self.project
    }

    pub(crate) fn ref_name(&self) -> &str {
        &self.ref_name
    }

    fn groups(&self, change_owner: bool) -> Cow<'_, GroupMembership> {
        if change_owner {
            Cow::Owned(self.project.groups().with_change_owner())
        } else {
            Cow::Borrowed(self.project.groups())
        }
    }

    pub(crate) fn can_perform(&self, name: &str) -> bool {
        self.can_perform_as(name, false, false)
    }

    pub(crate) fn can_perform_as(&self, name: &str, change_owner: bool, with_force: bool) -> bool {
        self.rules
            .check(name, &self.groups(change_owner), with_force)
            .is_allowed()
    }

    fn is_blocked(&self, name: &str, with_force: bool) -> bool {
        self.rules.is_blocked(name, self.project.groups(), with_force)
    }

    pub(crate) fn range(&self, name: &str, change_owner: bool) -> PermissionRange {
        self.rules.range(name, &self.groups(change_owner))
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.project.identity().is_internal() || self.can_perform(names::READ)
    }

    /// Owner of this ref, or of the whole project
    pub(crate) fn is_owner(&self) -> BackendResult<bool> {
        Ok(self.can_perform(names::OWNER) || self.project.is_owner()?)
    }

    fn is_config(&self) -> bool {
        refs::is_config(&self.ref_name)
    }

    /// Control for the `refs/for/` ref changes for this ref are uploaded to
    fn for_ref_control(&self) -> RefControl {
        self.project.control_for_ref(&refs::for_ref(&self.ref_name))
    }

    fn access_path(&self) -> AccessPath {
        self.project.identity().access_path()
    }

    fn can_update(&self) -> BackendResult<bool> {
        // refs/meta/config rewrites the access rules themselves
        if self.is_config() && !self.project.is_owner()? {
            return Ok(false);
        }
        Ok(self.can_perform(names::PUSH))
    }

    fn can_push_with_force(&self) -> BackendResult<bool> {
        if self.is_config() && !self.project.is_owner()? {
            return Ok(false);
        }
        Ok(self.can_perform_as(names::PUSH, false, true))
    }

    /// Owners may force outside of git, unless a block on push says otherwise
    fn owner_may_force(&self) -> BackendResult<bool> {
        Ok((self.is_owner()? && !self.is_blocked(names::PUSH, true)) || self.project.is_admin()?)
    }

    fn can_force_update(&self) -> BackendResult<bool> {
        if self.can_push_with_force()? {
            return Ok(true);
        }
        match self.access_path() {
            AccessPath::Git => Ok(false),
            _ => self.owner_may_force(),
        }
    }

    fn can_delete(&self) -> BackendResult<bool> {
        if self.can_push_with_force()? || self.can_perform(names::DELETE) {
            return Ok(true);
        }
        match self.access_path() {
            AccessPath::Git => Ok(false),
            _ => self.owner_may_force(),
        }
    }

    pub(crate) fn can_submit(&self, change_owner: bool) -> BackendResult<bool> {
        if self.is_config() {
            return self.project.is_owner();
        }
        Ok(self.can_perform_as(names::SUBMIT, change_owner, false))
    }

    fn can_upload_merges(&self) -> bool {
        self.for_ref_control().can_perform(names::PUSH_MERGE)
    }

    pub(crate) fn can_add_patch_set(&self) -> bool {
        self.for_ref_control().can_perform(names::ADD_PATCH_SET)
    }

    /// Evaluate a ref permission, ignoring the project state
    pub(crate) fn can(&self, permission: RefPermission) -> BackendResult<bool> {
        let allowed = match permission {
            RefPermission::Read => self.is_visible(),
            RefPermission::Create => self.can_perform(names::CREATE),
            RefPermission::Delete => self.can_delete()?,
            RefPermission::Update => self.can_update()?,
            RefPermission::ForceUpdate => self.can_force_update()?,
            RefPermission::SetHead => self.project.is_owner()?,
            RefPermission::ForgeAuthor => self.can_perform(names::FORGE_AUTHOR),
            RefPermission::ForgeCommitter => self.can_perform(names::FORGE_COMMITTER),
            RefPermission::ForgeServer => self.can_perform(names::FORGE_SERVER),
            RefPermission::Merge => self.can_upload_merges(),
            RefPermission::SkipValidation => {
                self.can_perform(names::FORGE_AUTHOR)
                    && self.can_perform(names::FORGE_COMMITTER)
                    && self.can_perform(names::FORGE_SERVER)
                    && self.can_upload_merges()
            }
            RefPermission::CreateChange => self.for_ref_control().can_perform(names::PUSH),
            RefPermission::CreateTag => self.can_perform(names::CREATE_TAG),
            RefPermission::CreateSignedTag => self.can_perform(names::CREATE_SIGNED_TAG),
            RefPermission::UpdateBySubmit => self.for_ref_control().can_submit(true)?,
            RefPermission::ReadPrivateChanges => self.can_perform(names::VIEW_PRIVATE_CHANGES),
            RefPermission::ReadConfig => self
                .project
                .control_for_ref(refs::REFS_CONFIG)
                .is_visible(),
            RefPermission::WriteConfig => self.is_owner()?,
        };

        trace!(
            user = %self.project.identity(),
            project = self.project.name(),
            ref_name = %self.ref_name,
            permission = %permission,
            allowed,
            "Evaluated ref permission"
        );
        Ok(allowed)
    }

    pub(crate) fn change_control(&self, change: Arc<Change>) -> ChangeControl {
        ChangeControl {
            ref_control: self.clone(),
            change,
        }
    }
}

/// Advice appended to the denial of a ref permission
pub(crate) fn ref_denial_advice(permission: RefPermission, ref_name: &str) -> &'static str {
    match permission {
        RefPermission::Update if refs::is_config(ref_name) => {
            "Configuration changes can only be pushed by project owners\n\
             who also have 'Push' rights on refs/meta/config"
        }
        RefPermission::Update => "To push into this reference you need 'Push' rights.",
        RefPermission::Delete => {
            "You need 'Delete Reference' rights or 'Push' rights with the \n\
             'Force Push' flag set to delete references."
        }
        RefPermission::CreateChange => {
            "You need 'Create Change' rights to upload code review requests.\n\
             Verify that you are pushing to the right branch."
        }
        RefPermission::Create => "You need 'Create' rights to create new references.",
        RefPermission::CreateSignedTag => {
            "You need 'Create Signed Tag' rights to push a signed tag."
        }
        RefPermission::CreateTag => "You need 'Create Tag' rights to push a normal tag.",
        RefPermission::ForceUpdate => {
            "You need 'Push' rights with 'Force' flag set to do a non-fastforward push."
        }
        RefPermission::ForgeAuthor => {
            "You need 'Forge Author' rights to push commits with another user as author."
        }
        RefPermission::ForgeCommitter => {
            "You need 'Forge Committer' rights to push commits with another user as committer."
        }
        RefPermission::ForgeServer => {
            "You need 'Forge Server' rights to push merge commits authored by the server."
        }
        RefPermission::Merge => {
            "You need 'Push Merge' in addition to 'Push' rights to push merge commits."
        }
        RefPermission::Read => "You need 'Read' rights to fetch or clone this ref.",
        RefPermission::ReadConfig => {
            "You need 'Read' rights on refs/meta/config to see the configuration."
        }
        RefPermission::ReadPrivateChanges => {
            "You need 'Read Private Changes' to see private changes."
        }
        RefPermission::SetHead => "You need 'Set HEAD' rights to set the default branch.",
        RefPermission::SkipValidation => {
            "You need 'Forge Author', 'Forge Server', 'Forge Committer'\n\
             and 'Push Merge' rights to skip validation."
        }
        RefPermission::UpdateBySubmit => {
            "You need 'Submit' rights on refs/for/ to submit changes during change upload."
        }
        RefPermission::WriteConfig => "You need 'Write' rights on refs/meta/config.",
    }
}

/// Permissions of one user on one change
#[derive(Clone)]
pub(crate) struct ChangeControl {
    ref_control: RefControl,
    change: Arc<Change>,
}

impl ChangeControl {
    pub(crate) fn change(&self) -> &Arc<Change> {
        &self.change
    }

    pub(crate) fn ref_control(&self) -> &RefControl {
        &self.ref_control
    }

    fn identity(&self) -> &Identity {
        self.ref_control.project().identity()
    }

    fn is_change_owner(&self) -> bool {
        self.identity().account_id() == Some(self.change.owner())
    }

    fn is_reviewer(&self) -> bool {
        self.identity()
            .account_id()
            .is_some_and(|id| self.change.is_reviewer(id))
    }

    fn is_private_visible(&self) -> bool {
        self.is_change_owner()
            || self.is_reviewer()
            || self.identity().is_internal()
            || self.ref_control.can_perform(names::VIEW_PRIVATE_CHANGES)
    }

    pub(crate) fn is_visible(&self) -> bool {
        if self.change.is_private() && !self.is_private_visible() {
            return false;
        }
        self.ref_control.is_visible()
    }

    /// Change owner, ref owner or project owner
    fn is_manager(&self) -> BackendResult<bool> {
        Ok(self.is_change_owner() || self.ref_control.is_owner()?)
    }

    fn can_add_patch_set(&self) -> BackendResult<bool> {
        if !self.ref_control.can(RefPermission::CreateChange)? {
            return Ok(false);
        }
        Ok(self.is_change_owner() || self.ref_control.can_add_patch_set())
    }

    fn can_rebase(&self) -> BackendResult<bool> {
        let owner = self.is_change_owner();
        let may_rebase = owner
            || self.ref_control.can_submit(owner)?
            || self.ref_control.can_perform(names::REBASE);
        Ok(may_rebase && self.ref_control.can(RefPermission::CreateChange)?)
    }

    /// Evaluate a change permission, ignoring the project state
    pub(crate) fn can(&self, permission: ChangePermission) -> BackendResult<bool> {
        let rc = &self.ref_control;
        let owner = self.is_change_owner();
        let allowed = match permission {
            ChangePermission::Read => self.is_visible(),
            ChangePermission::Abandon | ChangePermission::Restore => {
                self.is_manager()? || rc.can_perform(names::ABANDON)
            }
            ChangePermission::Delete => {
                rc.can_perform(names::DELETE_CHANGES)
                    || (owner && rc.can_perform_as(names::DELETE_OWN_CHANGES, true, false))
                    || rc.project().is_admin()?
            }
            ChangePermission::AddPatchSet => self.can_add_patch_set()?,
            ChangePermission::EditAssignee => {
                self.is_manager()? || rc.can_perform(names::EDIT_ASSIGNEE)
            }
            ChangePermission::EditDescription => self.change.is_open() && self.is_manager()?,
            ChangePermission::EditHashtags => {
                self.is_manager()? || rc.can_perform(names::EDIT_HASHTAGS)
            }
            ChangePermission::EditTopicName if self.change.is_open() => {
                self.is_manager()? || rc.can_perform(names::EDIT_TOPIC_NAME)
            }
            // Closed changes need the force flag
            ChangePermission::EditTopicName => {
                rc.can_perform_as(names::EDIT_TOPIC_NAME, false, true)
            }
            ChangePermission::RemoveReviewer => {
                self.is_manager()? || rc.can_perform(names::REMOVE_REVIEWER)
            }
            ChangePermission::Rebase => self.can_rebase()?,
            ChangePermission::Revert => rc.can_perform(names::REVERT),
            ChangePermission::Submit => rc.can_submit(owner)?,
            ChangePermission::SubmitAs => rc.can_perform(names::SUBMIT_AS),
            ChangePermission::ToggleWorkInProgressState => {
                self.is_manager()? || rc.can_perform(names::TOGGLE_WIP_STATE)
            }
        };

        trace!(
            user = %self.identity(),
            change = %self.change.id(),
            permission = %permission,
            allowed,
            "Evaluated change permission"
        );
        Ok(allowed)
    }

    pub(crate) fn label_range(&self, permission: &LabelPermission) -> PermissionRange {
        self.ref_control
            .range(&permission.permission_name(), self.is_change_owner())
    }

    pub(crate) fn can_label(&self, permission: &LabelPermission) -> bool {
        self.label_range(permission).allows_any_vote()
    }

    pub(crate) fn can_label_value(&self, permission: &LabelPermissionWithValue) -> bool {
        let range = self.label_range(permission.permission());
        if permission.permission().is_on_behalf_of() && !range.allows_any_vote() {
            return false;
        }
        range.contains(permission.value())
    }
}
