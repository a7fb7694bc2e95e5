//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (REFGATE__*)
//! 2. Configuration file (TOML)
//! 3. Default values

use crate::config::types::AppConfig;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "refgate.toml",
    ".refgate.toml",
    "~/.config/refgate/config.toml",
    "/etc/refgate/config.toml",
];

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. Start with defaults (handled by serde defaults on AppConfig)

    // 2. Add configuration file
    if let Some(path) = config_path {
        // Explicit path provided - must exist
        if !Path::new(path).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    } else if let Some(path) = find_default_config() {
        debug!(path = %path.display(), "Using configuration file");
        builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml));
    }

    // 3. Add environment variables with REFGATE_ prefix
    // e.g., REFGATE__ENGINE__REQUEST_CACHE_SIZE, REFGATE__LOGGING__LEVEL
    // Double underscore (__) maps to nested keys (engine.request_cache_size)
    builder = builder.add_source(
        Environment::with_prefix("REFGATE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// First existing default configuration file
fn find_default_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .chain(dirs::config_dir().map(|dir| dir.join("refgate").join("config.toml")))
        .find(|path| path.exists())
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.engine.all_projects.is_empty() {
        return Err(ConfigError::Missing {
            field: "engine.all_projects".to_string(),
        });
    }

    if config.engine.request_cache_size == 0 {
        return Err(ConfigError::Invalid {
            message: "engine.request_cache_size must be greater than 0".to_string(),
        });
    }

    validate_projects(config)?;
    validate_hierarchy(config)?;
    validate_accounts(config)?;
    validate_changes(config)?;

    Ok(())
}

/// Patterns, rules and permission names of every project
fn validate_projects(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for project in &config.projects {
        if project.name.is_empty() {
            return Err(ConfigError::Missing {
                field: "projects.name".to_string(),
            });
        }
        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::invalid(format!(
                "project '{}' is defined more than once",
                project.name
            )));
        }
        project.to_project()?;

        if !project.capabilities.is_empty() && project.name != config.engine.all_projects {
            warn!(
                project = %project.name,
                "Capabilities are only read from the root project, ignoring them"
            );
        }
    }

    if !config.projects.is_empty() && !seen.contains(config.engine.all_projects.as_str()) {
        warn!(
            root = %config.engine.all_projects,
            "Root project is not configured, no inherited rules or capabilities apply"
        );
    }
    Ok(())
}

/// Parents must exist and the hierarchy must be acyclic
fn validate_hierarchy(config: &AppConfig) -> Result<(), ConfigError> {
    let root = config.engine.all_projects.as_str();
    let parents: HashMap<&str, Option<&str>> = config
        .projects
        .iter()
        .map(|p| (p.name.as_str(), p.parent.as_deref()))
        .collect();

    for project in &config.projects {
        let Some(parent) = project.parent.as_deref() else {
            continue;
        };
        if project.name == root {
            return Err(ConfigError::invalid(format!(
                "root project '{}' cannot have a parent",
                root
            )));
        }
        if !parents.contains_key(parent) {
            return Err(ConfigError::invalid(format!(
                "project '{}' has unknown parent '{}'",
                project.name, parent
            )));
        }

        let mut visited = HashSet::from([project.name.as_str()]);
        let mut current = Some(parent);
        while let Some(name) = current {
            if !visited.insert(name) {
                return Err(ConfigError::invalid(format!(
                    "project '{}' is part of a parent cycle",
                    project.name
                )));
            }
            current = parents.get(name).copied().flatten();
        }
    }
    Ok(())
}

fn validate_accounts(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for account in &config.accounts {
        if !seen.insert(account.id) {
            return Err(ConfigError::invalid(format!(
                "account {} is defined more than once",
                account.id
            )));
        }
    }
    Ok(())
}

fn validate_changes(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for change in &config.changes {
        if !seen.insert(change.id) {
            return Err(ConfigError::invalid(format!(
                "change {} is defined more than once",
                change.id
            )));
        }
        if config.project(&change.project).is_none() {
            return Err(ConfigError::invalid(format!(
                "change {} targets unknown project '{}'",
                change.id, change.project
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_str_basic() {
        let toml = r#"
[engine]
request_cache_size = 10

[[projects]]
name = "All-Projects"

[[projects.sections]]
ref = "refs/*"
permissions = [{ name = "read", rules = ["allow group global:Anonymous-Users"] }]

[[projects]]
name = "app"
parent = "All-Projects"
state = "read_only"
"#;

        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.engine.request_cache_size, 10);
        assert_eq!(config.projects.len(), 2);
        let app = config.project("app").unwrap();
        assert_eq!(app.parent.as_deref(), Some("All-Projects"));
        assert_eq!(app.state, crate::access_control::ProjectState::ReadOnly);
    }

    #[test]
    fn test_preserves_name_case() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[projects.sections]]
ref = "refs/heads/*"
permissions = [{ name = "label-Code-Review", rules = ["allow -1..+1 group Registered"] }]
"#;

        let config = load_config_from_str(toml).unwrap();
        let section = &config.projects[0].sections[0];
        assert_eq!(section.permissions[0].name, "label-Code-Review");
        assert_eq!(section.permissions[0].rules[0], "allow -1..+1 group Registered");
    }

    #[test]
    fn test_zero_cache_size_error() {
        let result = load_config_from_str("[engine]\nrequest_cache_size = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[projects.sections]]
ref = "^refs/heads/(unclosed"
"#;

        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_invalid_rule() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[projects.sections]]
ref = "refs/*"
permissions = [{ name = "read", rules = ["grant group devs"] }]
"#;

        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::InvalidRule { .. })));
    }

    #[test]
    fn test_unknown_parent_error() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[projects]]
name = "app"
parent = "missing"
"#;

        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("unknown parent 'missing'"));
    }

    #[test]
    fn test_parent_cycle_error() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[projects]]
name = "a"
parent = "b"

[[projects]]
name = "b"
parent = "a"
"#;

        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_change_for_unknown_project_error() {
        let toml = r#"
[[projects]]
name = "All-Projects"

[[changes]]
id = 1
project = "nowhere"
branch = "master"
owner = 1
"#;

        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("unknown project 'nowhere'"));
    }
}
