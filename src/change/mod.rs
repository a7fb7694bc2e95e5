//! Changes and their lookup
//!
//! Permission checks on a change only need a few of its attributes: the
//! project and destination branch it targets, its owner, status, privacy and
//! reviewers. [`ChangeData`] defers loading them until a check needs them.

pub mod types;

pub use types::{Change, ChangeId, ChangeStatus};

use crate::error::SharedError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::debug;

/// Failure to load a change
#[derive(Error, Debug, Clone)]
pub enum ChangeLoadError {
    #[error("change {id} not found in project {project}")]
    NotFound { project: String, id: ChangeId },

    #[error("cannot load change {id}: {message}")]
    Storage {
        id: ChangeId,
        message: String,
        #[source]
        cause: Option<SharedError>,
    },
}

impl ChangeLoadError {
    pub fn not_found(project: impl Into<String>, id: ChangeId) -> Self {
        ChangeLoadError::NotFound {
            project: project.into(),
            id,
        }
    }

    pub fn storage(id: ChangeId, message: impl Into<String>) -> Self {
        ChangeLoadError::Storage {
            id,
            message: message.into(),
            cause: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChangeLoadError::NotFound { .. })
    }
}

/// Source of change snapshots
pub trait ChangeProvider: Send + Sync {
    fn load_change(&self, project: &str, id: ChangeId) -> Result<Arc<Change>, ChangeLoadError>;
}

/// In-memory change table
#[derive(Debug, Default)]
pub struct StaticChangeProvider {
    changes: RwLock<HashMap<ChangeId, Arc<Change>>>,
}

impl StaticChangeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change(self, change: Change) -> Self {
        self.insert(change);
        self
    }

    pub fn insert(&self, change: Change) {
        self.changes.write().insert(change.id(), Arc::new(change));
    }

    pub fn remove(&self, id: ChangeId) -> Option<Arc<Change>> {
        self.changes.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.changes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.read().is_empty()
    }
}

impl ChangeProvider for StaticChangeProvider {
    fn load_change(&self, project: &str, id: ChangeId) -> Result<Arc<Change>, ChangeLoadError> {
        self.changes
            .read()
            .get(&id)
            .filter(|c| c.project() == project)
            .cloned()
            .ok_or_else(|| ChangeLoadError::not_found(project, id))
    }
}

/// A change reference that loads the change on first use
///
/// Clones share the loaded result.
#[derive(Clone)]
pub struct ChangeData {
    project: String,
    id: ChangeId,
    provider: Option<Arc<dyn ChangeProvider>>,
    loaded: Arc<OnceLock<Result<Arc<Change>, ChangeLoadError>>>,
}

impl ChangeData {
    /// Wrap an already loaded change
    pub fn new(change: Change) -> Self {
        let change = Arc::new(change);
        Self {
            project: change.project().to_string(),
            id: change.id(),
            provider: None,
            loaded: Arc::new(OnceLock::from(Ok(change))),
        }
    }

    /// Reference a change that is loaded from `provider` when needed
    pub fn lazy(
        project: impl Into<String>,
        id: ChangeId,
        provider: Arc<dyn ChangeProvider>,
    ) -> Self {
        Self {
            project: project.into(),
            id,
            provider: Some(provider),
            loaded: Arc::new(OnceLock::new()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn change(&self) -> Result<Arc<Change>, ChangeLoadError> {
        self.loaded
            .get_or_init(|| {
                debug!(project = %self.project, change = %self.id, "Loading change");
                match &self.provider {
                    Some(provider) => provider.load_change(&self.project, self.id),
                    None => Err(ChangeLoadError::not_found(&self.project, self.id)),
                }
            })
            .clone()
    }
}

impl fmt::Debug for ChangeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeData")
            .field("project", &self.project)
            .field("id", &self.id)
            .field("loaded", &self.loaded.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccountId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: StaticChangeProvider,
        loads: AtomicUsize,
    }

    impl ChangeProvider for CountingProvider {
        fn load_change(&self, project: &str, id: ChangeId) -> Result<Arc<Change>, ChangeLoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_change(project, id)
        }
    }

    #[test]
    fn test_lazy_change_loads_once() {
        let provider = Arc::new(CountingProvider {
            inner: StaticChangeProvider::new().with_change(Change::new(
                ChangeId(7),
                "p",
                "master",
                AccountId(1),
            )),
            loads: AtomicUsize::new(0),
        });
        let cd = ChangeData::lazy("p", ChangeId(7), provider.clone());
        let copy = cd.clone();

        assert_eq!(cd.change().unwrap().owner(), AccountId(1));
        assert_eq!(copy.change().unwrap().dest(), "refs/heads/master");
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_change_in_other_project_is_not_found() {
        let provider = StaticChangeProvider::new().with_change(Change::new(
            ChangeId(7),
            "p",
            "master",
            AccountId(1),
        ));
        let err = provider.load_change("q", ChangeId(7)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_loaded_change_data() {
        let cd = ChangeData::new(Change::new(ChangeId(3), "p", "master", AccountId(2)));
        assert_eq!(cd.project(), "p");
        assert_eq!(cd.id(), ChangeId(3));
        assert!(cd.change().is_ok());
    }
}
