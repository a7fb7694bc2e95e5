//! Shared fixture for integration tests
//!
//! Builds an `All-Projects -> parent -> local` hierarchy and lets tests add
//! rules to any level before creating a backend.

#![allow(dead_code)]

use refgate::access_control::{
    GroupUuid, Permission, PermissionRule, Project, ProjectProvider, ProjectState, ProjectStore,
    SectionSortCache, StaticGroupBackend,
};
use refgate::backend::{BackendSettings, PermissionBackend};
use refgate::change::{Change, ChangeId, ChangeProvider, StaticChangeProvider};
use refgate::identity::{AccessPath, AccountId, IdentifiedUser, Identity};
use std::sync::Arc;

pub const ALL_PROJECTS: &str = "All-Projects";
pub const ALL_USERS: &str = "All-Users";
pub const PARENT: &str = "parent";
pub const LOCAL: &str = "local";

pub const ADMIN: u32 = 1;
pub const DEV: u32 = 2;
pub const OTHER: u32 = 3;
pub const FIXER: u32 = 4;

pub fn admins() -> GroupUuid {
    GroupUuid::new("admins")
}

pub fn devs() -> GroupUuid {
    GroupUuid::new("devs")
}

pub fn fixers() -> GroupUuid {
    GroupUuid::new("fixers")
}

pub struct Fixture {
    pub store: Arc<ProjectStore>,
    pub changes: Arc<StaticChangeProvider>,
    pub sort_cache: Arc<SectionSortCache>,
    groups: StaticGroupBackend,
    settings: BackendSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let sort_cache = Arc::new(SectionSortCache::new());
        let store = ProjectStore::new().with_sort_cache(Arc::clone(&sort_cache));
        store.insert(
            Project::new(ALL_PROJECTS).with_capability(
                Permission::new("administrateServer").with_rule(PermissionRule::allow(admins())),
            ),
        );
        store.insert(Project::new(ALL_USERS));
        store.insert(Project::new(PARENT));
        store.insert(Project::new(LOCAL).with_parent(PARENT));

        let groups = StaticGroupBackend::new()
            .with_account(AccountId(ADMIN), [admins()])
            .with_account(AccountId(DEV), [devs()])
            .with_account(AccountId(FIXER), [devs(), fixers()]);

        Self {
            store: Arc::new(store),
            changes: Arc::new(StaticChangeProvider::new()),
            sort_cache,
            groups,
            settings: BackendSettings::default(),
        }
    }

    /// Apply `f` to a copy of `project` and store it
    pub fn update(&self, project: &str, f: impl FnOnce(&mut Project)) {
        let mut copy = self
            .store
            .get_project(project)
            .unwrap()
            .map(|p| (*p).clone())
            .unwrap_or_else(|| Project::new(project));
        f(&mut copy);
        self.store.insert(copy);
    }

    pub fn add_project(&self, project: Project) {
        self.store.insert(project);
    }

    pub fn add_rule(&self, project: &str, permission: &str, pattern: &str, rule: PermissionRule) {
        self.update(project, |p| {
            p.section_mut(pattern)
                .unwrap()
                .permission_mut(permission)
                .add_rule(rule);
        });
    }

    pub fn allow(&self, project: &str, permission: &str, group: GroupUuid, pattern: &str) {
        self.add_rule(project, permission, pattern, PermissionRule::allow(group));
    }

    pub fn allow_force(&self, project: &str, permission: &str, group: GroupUuid, pattern: &str) {
        self.add_rule(
            project,
            permission,
            pattern,
            PermissionRule::allow(group).with_force(true),
        );
    }

    pub fn allow_range(
        &self,
        project: &str,
        permission: &str,
        min: i32,
        max: i32,
        group: GroupUuid,
        pattern: &str,
    ) {
        self.add_rule(
            project,
            permission,
            pattern,
            PermissionRule::allow(group).with_range(min, max),
        );
    }

    pub fn deny(&self, project: &str, permission: &str, group: GroupUuid, pattern: &str) {
        self.add_rule(project, permission, pattern, PermissionRule::deny(group));
    }

    pub fn block(&self, project: &str, permission: &str, group: GroupUuid, pattern: &str) {
        self.add_rule(project, permission, pattern, PermissionRule::block(group));
    }

    pub fn block_force(&self, project: &str, permission: &str, group: GroupUuid, pattern: &str) {
        self.add_rule(
            project,
            permission,
            pattern,
            PermissionRule::block(group).with_force(true),
        );
    }

    pub fn block_range(
        &self,
        project: &str,
        permission: &str,
        min: i32,
        max: i32,
        group: GroupUuid,
        pattern: &str,
    ) {
        self.add_rule(
            project,
            permission,
            pattern,
            PermissionRule::block(group).with_range(min, max),
        );
    }

    pub fn exclusive(&self, project: &str, permission: &str, pattern: &str) {
        self.update(project, |p| {
            p.section_mut(pattern)
                .unwrap()
                .permission_mut(permission)
                .set_exclusive(true);
        });
    }

    pub fn capability(&self, name: &str, rule: PermissionRule) {
        self.update(ALL_PROJECTS, |p| p.capability_mut(name).add_rule(rule));
    }

    pub fn set_state(&self, project: &str, state: ProjectState) {
        self.update(project, |p| p.set_state(state));
    }

    pub fn add_account(&mut self, account: u32, groups: impl IntoIterator<Item = GroupUuid>) {
        self.groups.add_account(AccountId(account), groups);
    }

    pub fn add_change(&self, change: Change) {
        self.changes.insert(change);
    }

    pub fn settings(&mut self) -> &mut BackendSettings {
        &mut self.settings
    }

    pub fn backend(&self) -> PermissionBackend {
        self.backend_with(
            self.store.clone() as Arc<dyn ProjectProvider>,
            self.changes.clone() as Arc<dyn ChangeProvider>,
        )
    }

    /// Backend over the fixture's groups and settings, reading projects and
    /// changes from the given providers
    pub fn backend_with(
        &self,
        projects: Arc<dyn ProjectProvider>,
        changes: Arc<dyn ChangeProvider>,
    ) -> PermissionBackend {
        PermissionBackend::builder(projects, Arc::new(self.groups.clone()), changes)
            .settings(self.settings.clone())
            .sort_cache(Arc::clone(&self.sort_cache))
            .build()
    }
}

/// Identified user with a username derived from the account id
pub fn user(account: u32) -> Identity {
    Identity::Identified(IdentifiedUser::new(AccountId(account)).with_username(username(account)))
}

/// The same user, connected over git
pub fn git_user(account: u32) -> Identity {
    Identity::Identified(
        IdentifiedUser::new(AccountId(account))
            .with_username(username(account))
            .with_access_path(AccessPath::Git),
    )
}

pub fn username(account: u32) -> String {
    match account {
        ADMIN => "admin".to_string(),
        DEV => "dev".to_string(),
        FIXER => "fixer".to_string(),
        other => format!("user{}", other),
    }
}

pub fn change(id: u32, project: &str, branch: &str, owner: u32) -> Change {
    Change::new(ChangeId(id), project, branch, AccountId(owner))
}
