//! Memoized specificity ordering of access sections

use crate::access_control::patterns::RefPattern;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Orderings kept before the least recently used one is evicted
pub const DEFAULT_SORT_CACHE_SIZE: usize = 1024;

/// The ordering only depends on the matched patterns, not on the ref they
/// matched, so every ref covered by the same sections shares one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SortKey {
    projects: Vec<String>,
    patterns: Vec<String>,
}

/// Bounded cache of section orderings keyed by project chain and patterns.
///
/// Orderings are deterministic, so concurrent writers racing on the same
/// key store identical values.
#[derive(Debug)]
pub struct SectionSortCache {
    entries: Mutex<LruCache<SortKey, Arc<[usize]>>>,
}

impl Default for SectionSortCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionSortCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SORT_CACHE_SIZE)
    }

    /// Cache holding at most `capacity` orderings (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Order `items` from most to least specific pattern.
    ///
    /// The sort is stable: items with equally specific patterns keep their
    /// input order, which callers use to rank nearer projects first.
    pub fn sort<T>(
        &self,
        ref_name: &str,
        projects: &[&str],
        items: Vec<T>,
        pattern: impl Fn(&T) -> &RefPattern,
    ) -> Vec<T> {
        if items.len() < 2 {
            return items;
        }

        let key = SortKey {
            projects: projects.iter().map(|p| p.to_string()).collect(),
            patterns: items.iter().map(|i| pattern(i).as_str().to_string()).collect(),
        };

        let cached = self.entries.lock().get(&key).map(Arc::clone);
        let order = match cached {
            Some(order) => {
                trace!(ref_name, "Section order cache hit");
                order
            }
            None => {
                let mut order: Vec<usize> = (0..items.len()).collect();
                order.sort_by_key(|&i| pattern(&items[i]).specificity());
                let order: Arc<[usize]> = Arc::from(order);
                self.entries.lock().put(key, Arc::clone(&order));
                order
            }
        };

        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
        order.iter().filter_map(|&i| slots[i].take()).collect()
    }

    /// Drop every ordering computed with `project` in the chain.
    pub fn invalidate_project(&self, project: &str) {
        let mut entries = self.entries.lock();
        let stale: Vec<SortKey> = entries
            .iter()
            .filter(|(key, _)| key.projects.iter().any(|p| p == project))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
