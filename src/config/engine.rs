//! Turning configuration into engine collaborators
//!
//! The TOML-backed project store, group backend and change provider built
//! here are reference implementations used by the CLI and the tests.

use crate::access_control::{
    GroupUuid, Permission, PermissionRule, Project, ProjectStore, SectionSortCache,
    StaticGroupBackend,
};
use crate::backend::{BackendSettings, PermissionBackend};
use crate::change::{Change, ChangeId, StaticChangeProvider};
use crate::config::types::{
    AccountConfig, AppConfig, ChangeConfig, EngineConfig, PermissionConfig, ProjectConfig,
};
use crate::error::ConfigError;
use crate::identity::{AccountId, IdentifiedUser, Identity};
use crate::permissions::{GlobalPermission, names};
use std::sync::Arc;
use tracing::debug;

impl PermissionConfig {
    fn parse_rules(&self) -> Result<Vec<PermissionRule>, ConfigError> {
        self.rules.iter().map(|r| r.parse()).collect()
    }

    fn apply_to(&self, permission: &mut Permission) -> Result<(), ConfigError> {
        for rule in self.parse_rules()? {
            permission.add_rule(rule);
        }
        if self.exclusive {
            permission.set_exclusive(true);
        }
        Ok(())
    }
}

impl ProjectConfig {
    /// Build the project snapshot, validating patterns, permission names
    /// and rules
    pub fn to_project(&self) -> Result<Project, ConfigError> {
        let mut project = Project::new(&self.name).with_state(self.state);
        if let Some(parent) = &self.parent {
            project = project.with_parent(parent);
        }

        for capability in &self.capabilities {
            if GlobalPermission::try_parse(&capability.name).is_none() {
                return Err(ConfigError::invalid(format!(
                    "projects.{}: unknown capability '{}'",
                    self.name, capability.name
                )));
            }
            capability.apply_to(project.capability_mut(&capability.name))?;
        }

        for section in &self.sections {
            // Validates the pattern even for sections without permissions
            let access = project.section_mut(&section.pattern)?;
            for permission in &section.permissions {
                if !names::is_valid(&permission.name) {
                    return Err(ConfigError::invalid(format!(
                        "projects.{}: unknown permission '{}' in section '{}'",
                        self.name, permission.name, section.pattern
                    )));
                }
                permission.apply_to(access.permission_mut(&permission.name))?;
            }
        }

        Ok(project)
    }
}

impl AccountConfig {
    pub fn identity(&self) -> Identity {
        let mut user = IdentifiedUser::new(AccountId(self.id));
        if let Some(username) = &self.username {
            user = user.with_username(username);
        }
        Identity::Identified(user)
    }
}

impl ChangeConfig {
    pub fn to_change(&self) -> Change {
        self.reviewers.iter().fold(
            Change::new(
                ChangeId(self.id),
                &self.project,
                &self.branch,
                AccountId(self.owner),
            )
            .with_status(self.status)
            .with_private(self.private),
            |change, reviewer| change.with_reviewer(AccountId(*reviewer)),
        )
    }
}

impl EngineConfig {
    pub fn to_settings(&self) -> BackendSettings {
        BackendSettings {
            all_projects: self.all_projects.clone(),
            all_users: self.all_users.clone(),
            request_cache_size: self.request_cache_size,
            skip_full_ref_evaluation: self.skip_full_ref_evaluation,
            upload_groups: self.upload_allow_groups.iter().map(GroupUuid::new).collect(),
            receive_groups: self.receive_allow_groups.iter().map(GroupUuid::new).collect(),
        }
    }
}

impl AppConfig {
    /// Project store holding every configured project
    pub fn project_store(
        &self,
        sort_cache: Arc<SectionSortCache>,
    ) -> Result<ProjectStore, ConfigError> {
        let store = ProjectStore::new().with_sort_cache(sort_cache);
        for project in &self.projects {
            store.insert(project.to_project()?);
        }
        Ok(store)
    }

    pub fn group_backend(&self) -> StaticGroupBackend {
        let mut groups = StaticGroupBackend::new();
        for account in &self.accounts {
            groups.add_account(
                AccountId(account.id),
                account.groups.iter().map(GroupUuid::new),
            );
        }
        groups
    }

    pub fn change_provider(&self) -> StaticChangeProvider {
        let changes = StaticChangeProvider::new();
        for change in &self.changes {
            changes.insert(change.to_change());
        }
        changes
    }

    /// Identity of account `id`, with its configured username if any
    pub fn identity(&self, id: u32) -> Identity {
        self.account(id)
            .map(AccountConfig::identity)
            .unwrap_or_else(|| Identity::account(id))
    }

    /// Assemble a permission backend over the configured collaborators
    pub fn build_backend(&self) -> Result<PermissionBackend, ConfigError> {
        let sort_cache = Arc::new(SectionSortCache::new());
        let projects = self.project_store(Arc::clone(&sort_cache))?;

        debug!(
            projects = projects.len(),
            accounts = self.accounts.len(),
            changes = self.changes.len(),
            "Building permission backend"
        );

        Ok(PermissionBackend::builder(
            Arc::new(projects),
            Arc::new(self.group_backend()),
            Arc::new(self.change_provider()),
        )
        .settings(self.engine.to_settings())
        .sort_cache(sort_cache)
        .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::ProjectState;
    use crate::change::ChangeStatus;

    fn permission(name: &str, rules: &[&str]) -> PermissionConfig {
        PermissionConfig {
            name: name.to_string(),
            exclusive: false,
            rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_to_project_merges_repeated_permissions() {
        let config = ProjectConfig {
            name: "app".to_string(),
            parent: Some("parent".to_string()),
            state: ProjectState::ReadOnly,
            capabilities: vec![],
            sections: vec![
                crate::config::SectionConfig {
                    pattern: "refs/heads/*".to_string(),
                    permissions: vec![permission("push", &["allow group devs"])],
                },
                crate::config::SectionConfig {
                    pattern: "refs/heads/*".to_string(),
                    permissions: vec![permission("push", &["block group guests"])],
                },
            ],
        };

        let project = config.to_project().unwrap();
        assert_eq!(project.parent(), Some("parent"));
        assert_eq!(project.state(), ProjectState::ReadOnly);
        assert_eq!(project.sections().len(), 1);
        let push = project.sections()[0].permission("push").unwrap();
        assert_eq!(push.rules().len(), 2);
    }

    #[test]
    fn test_to_project_rejects_unknown_capability() {
        let config = ProjectConfig {
            name: "All-Projects".to_string(),
            parent: None,
            state: ProjectState::Active,
            capabilities: vec![permission("becomeRoot", &["allow group admins"])],
            sections: vec![],
        };
        let err = config.to_project().unwrap_err();
        assert!(err.to_string().contains("becomeRoot"));
    }

    #[test]
    fn test_change_config_to_change() {
        let change = ChangeConfig {
            id: 9,
            project: "app".to_string(),
            branch: "master".to_string(),
            owner: 3,
            status: ChangeStatus::Merged,
            private: true,
            reviewers: vec![4, 5],
        }
        .to_change();

        assert_eq!(change.dest(), "refs/heads/master");
        assert!(change.is_private());
        assert!(!change.is_open());
        assert!(change.is_reviewer(AccountId(5)));
    }

    #[test]
    fn test_identity_falls_back_to_bare_account() {
        let config = AppConfig::default();
        assert_eq!(config.identity(8), Identity::account(8));
    }
}
