//! Project snapshots, their lookup, and parent chains

use crate::access_control::sort::SectionSortCache;
use crate::access_control::types::{AccessSection, Permission};
use crate::error::PermissionBackendError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    #[default]
    Active,
    /// Readable, but no ref or change may be modified
    ReadOnly,
    /// Only visible to project owners
    Hidden,
}

impl ProjectState {
    pub const fn permits_read(&self) -> bool {
        !matches!(self, ProjectState::Hidden)
    }

    pub const fn permits_write(&self) -> bool {
        matches!(self, ProjectState::Active)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Active => "active",
            ProjectState::ReadOnly => "read_only",
            ProjectState::Hidden => "hidden",
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable access configuration of one project
#[derive(Debug, Clone)]
pub struct Project {
    name: String,
    parent: Option<String>,
    state: ProjectState,
    sections: Vec<AccessSection>,
    /// Global capabilities; only read from the root project
    capabilities: Vec<Permission>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            state: ProjectState::Active,
            sections: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_state(mut self, state: ProjectState) -> Self {
        self.state = state;
        self
    }

    pub fn with_section(mut self, section: AccessSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_capability(mut self, capability: Permission) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn state(&self) -> ProjectState {
        self.state
    }

    pub fn sections(&self) -> &[AccessSection] {
        &self.sections
    }

    pub fn capabilities(&self) -> &[Permission] {
        &self.capabilities
    }

    pub fn capability(&self, name: &str) -> Option<&Permission> {
        self.capabilities.iter().find(|p| p.name() == name)
    }

    pub fn set_state(&mut self, state: ProjectState) {
        self.state = state;
    }

    /// Section for `pattern`, created if missing.
    ///
    /// Fails if `pattern` is not a valid ref pattern.
    pub fn section_mut(
        &mut self,
        pattern: &str,
    ) -> Result<&mut AccessSection, crate::error::ConfigError> {
        let index = match self.sections.iter().position(|s| s.name() == pattern) {
            Some(index) => index,
            None => {
                self.sections.push(AccessSection::new(pattern)?);
                self.sections.len() - 1
            }
        };
        Ok(&mut self.sections[index])
    }

    /// Capability `name`, created empty if missing.
    pub fn capability_mut(&mut self, name: &str) -> &mut Permission {
        let index = match self.capabilities.iter().position(|p| p.name() == name) {
            Some(index) => index,
            None => {
                self.capabilities.push(Permission::new(name));
                self.capabilities.len() - 1
            }
        };
        &mut self.capabilities[index]
    }
}

/// Source of project snapshots
pub trait ProjectProvider: Send + Sync {
    /// Current snapshot of `name`, or `None` if no such project exists
    fn get_project(&self, name: &str) -> Result<Option<Arc<Project>>, PermissionBackendError>;

    fn parent_of(&self, name: &str) -> Result<Option<String>, PermissionBackendError> {
        Ok(self
            .get_project(name)?
            .and_then(|p| p.parent().map(str::to_string)))
    }
}

/// In-memory project arena keyed by name
///
/// Replacing a project invalidates every section ordering computed with it.
#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: RwLock<HashMap<String, Arc<Project>>>,
    sort_cache: Option<Arc<SectionSortCache>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort_cache(mut self, cache: Arc<SectionSortCache>) -> Self {
        self.sort_cache = Some(cache);
        self
    }

    /// Insert or replace a project snapshot
    pub fn insert(&self, project: Project) {
        let name = project.name().to_string();
        let replaced = self
            .projects
            .write()
            .insert(name.clone(), Arc::new(project))
            .is_some();
        if replaced {
            debug!(project = %name, "Project configuration reloaded");
        }
        if let Some(cache) = &self.sort_cache {
            cache.invalidate_project(&name);
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Project>> {
        let removed = self.projects.write().remove(name);
        if let Some(cache) = &self.sort_cache {
            cache.invalidate_project(name);
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }
}

impl ProjectProvider for ProjectStore {
    fn get_project(&self, name: &str) -> Result<Option<Arc<Project>>, PermissionBackendError> {
        Ok(self.projects.read().get(name).cloned())
    }
}

/// A project followed by its ancestors, ending at the root
#[derive(Debug, Clone)]
pub struct ProjectChain {
    projects: Vec<Arc<Project>>,
}

impl ProjectChain {
    /// Resolve the chain of `name`.
    ///
    /// Projects without a parent inherit from `root`. A missing parent also
    /// falls back to `root`; a cycle ends the chain where it closes.
    pub fn resolve(
        provider: &dyn ProjectProvider,
        name: &str,
        root: &str,
    ) -> Result<Self, PermissionBackendError> {
        let target = provider
            .get_project(name)?
            .ok_or_else(|| PermissionBackendError::RepositoryNotFound(name.to_string()))?;

        let mut seen: HashSet<String> = HashSet::from([target.name().to_string()]);
        let mut projects = vec![target];

        loop {
            let Some(current) = projects.last() else {
                break;
            };
            let next = match current.parent() {
                Some(parent) => parent.to_string(),
                None if current.name() != root => root.to_string(),
                None => break,
            };

            if seen.contains(&next) {
                warn!(project = name, parent = %next, "Cycle in project hierarchy");
                break;
            }

            let loaded = match provider.get_project(&next)? {
                Some(project) => project,
                None if next != root => {
                    warn!(project = name, parent = %next, "Parent project missing, using root");
                    if seen.contains(root) {
                        break;
                    }
                    match provider.get_project(root)? {
                        Some(project) => project,
                        None => break,
                    }
                }
                None => break,
            };

            seen.insert(loaded.name().to_string());
            projects.push(loaded);
        }

        Ok(Self { projects })
    }

    /// The project the chain was resolved for
    pub fn target(&self) -> &Arc<Project> {
        &self.projects[0]
    }

    pub fn root(&self) -> &Arc<Project> {
        &self.projects[self.projects.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Project>> {
        self.projects.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.projects.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(projects: Vec<Project>) -> ProjectStore {
        let store = ProjectStore::new();
        for p in projects {
            store.insert(p);
        }
        store
    }

    #[test]
    fn test_chain_ends_at_root() {
        let store = store(vec![
            Project::new("All-Projects"),
            Project::new("parent"),
            Project::new("local").with_parent("parent"),
        ]);
        let chain = ProjectChain::resolve(&store, "local", "All-Projects").unwrap();
        assert_eq!(chain.names(), vec!["local", "parent", "All-Projects"]);
        assert_eq!(chain.root().name(), "All-Projects");
    }

    #[test]
    fn test_chain_of_root() {
        let store = store(vec![Project::new("All-Projects")]);
        let chain = ProjectChain::resolve(&store, "All-Projects", "All-Projects").unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_missing_project() {
        let store = store(vec![Project::new("All-Projects")]);
        let err = ProjectChain::resolve(&store, "nope", "All-Projects").unwrap_err();
        assert!(err.is_repository_not_found());
    }

    #[test]
    fn test_missing_parent_falls_back_to_root() {
        let store = store(vec![
            Project::new("All-Projects"),
            Project::new("local").with_parent("gone"),
        ]);
        let chain = ProjectChain::resolve(&store, "local", "All-Projects").unwrap();
        assert_eq!(chain.names(), vec!["local", "All-Projects"]);
    }

    #[test]
    fn test_cycle_is_cut() {
        let store = store(vec![
            Project::new("All-Projects"),
            Project::new("a").with_parent("b"),
            Project::new("b").with_parent("a"),
        ]);
        let chain = ProjectChain::resolve(&store, "a", "All-Projects").unwrap();
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_reload_invalidates_sort_cache() {
        let cache = Arc::new(SectionSortCache::new());
        let store = ProjectStore::new().with_sort_cache(Arc::clone(&cache));
        store.insert(Project::new("p"));

        let patterns = vec![
            crate::access_control::RefPattern::new("refs/*").unwrap(),
            crate::access_control::RefPattern::new("refs/heads/*").unwrap(),
        ];
        cache.sort("refs/heads/x", &["p"], patterns, |p| p);
        assert_eq!(cache.len(), 1);

        store.insert(Project::new("p"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_parent_of() {
        let store = store(vec![Project::new("local").with_parent("parent")]);
        assert_eq!(store.parent_of("local").unwrap().as_deref(), Some("parent"));
        assert_eq!(store.parent_of("nope").unwrap(), None);
    }
}
