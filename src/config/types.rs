//! Configuration types
//!
//! Projects, sections and permissions are arrays of tables rather than maps,
//! so names such as `All-Projects` or `label-Code-Review` keep their case.

use crate::access_control::ProjectState;
use crate::backend::DEFAULT_REQUEST_CACHE_SIZE;
use crate::change::ChangeStatus;
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine settings
    pub engine: EngineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Project hierarchy with access sections
    pub projects: Vec<ProjectConfig>,

    /// Accounts and their group memberships
    pub accounts: Vec<AccountConfig>,

    /// Changes known to the reference change provider
    pub changes: Vec<ChangeConfig>,
}

impl AppConfig {
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn account(&self, id: u32) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root project; holds global capabilities
    pub all_projects: String,

    /// Project holding account refs
    pub all_users: String,

    /// Maximum project controls cached per user scope
    pub request_cache_size: usize,

    /// Return every ref without per-ref checks when `refs/*` is readable
    pub skip_full_ref_evaluation: bool,

    /// Groups allowed to fetch over git
    pub upload_allow_groups: Vec<String>,

    /// Groups allowed to push over git
    pub receive_allow_groups: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            all_projects: "All-Projects".to_string(),
            all_users: "All-Users".to_string(),
            request_cache_size: DEFAULT_REQUEST_CACHE_SIZE,
            skip_full_ref_evaluation: true,
            upload_allow_groups: vec!["global:Anonymous-Users".to_string()],
            receive_allow_groups: vec!["global:Anonymous-Users".to_string()],
        }
    }
}

/// Access configuration of one project
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Parent project; the root project is used when unset
    #[serde(default)]
    pub parent: Option<String>,

    /// Lifecycle state
    #[serde(default)]
    pub state: ProjectState,

    /// Global capabilities, only read on the root project
    #[serde(default)]
    pub capabilities: Vec<PermissionConfig>,

    /// Ref-scoped access sections
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

/// Rules for one ref pattern
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SectionConfig {
    /// Ref pattern, e.g. `refs/heads/*` or `^refs/heads/rel-.*`
    #[serde(rename = "ref")]
    pub pattern: String,

    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

/// Rules of one permission
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionConfig {
    /// Permission name, e.g. `push` or `label-Code-Review`
    pub name: String,

    /// Hide less specific grants of this permission
    #[serde(default)]
    pub exclusive: bool,

    /// Rules in the form `[allow|deny|block] [+force] [min..max] group <uuid>`
    #[serde(default)]
    pub rules: Vec<String>,
}

/// An account with its group memberships
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Numeric account id
    pub id: u32,

    /// Username, substituted for `${username}` in ref patterns
    #[serde(default)]
    pub username: Option<String>,

    /// Group UUIDs the account belongs to, besides the system groups
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A change for the reference change provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeConfig {
    pub id: u32,

    pub project: String,

    /// Destination branch, with or without `refs/heads/`
    pub branch: String,

    /// Owner account id
    pub owner: u32,

    #[serde(default)]
    pub status: ChangeStatus,

    #[serde(default)]
    pub private: bool,

    /// Reviewer account ids
    #[serde(default)]
    pub reviewers: Vec<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.all_projects, "All-Projects");
        assert_eq!(config.engine.all_users, "All-Users");
        assert_eq!(config.engine.request_cache_size, DEFAULT_REQUEST_CACHE_SIZE);
        assert!(config.engine.skip_full_ref_evaluation);
        assert!(config.projects.is_empty());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_log_format() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);

        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_change_defaults() {
        let change: ChangeConfig = serde_json::from_str(
            r#"{"id": 3, "project": "app", "branch": "master", "owner": 7}"#,
        )
        .unwrap();
        assert_eq!(change.status, ChangeStatus::New);
        assert!(!change.private);
        assert!(change.reviewers.is_empty());
    }

    #[test]
    fn test_lookup_helpers() {
        let config = AppConfig {
            accounts: vec![AccountConfig {
                id: 1,
                username: Some("alice".to_string()),
                groups: vec![],
            }],
            ..Default::default()
        };
        assert_eq!(
            config.account(1).and_then(|a| a.username.as_deref()),
            Some("alice")
        );
        assert!(config.account(2).is_none());
        assert!(config.project("app").is_none());
    }
}
