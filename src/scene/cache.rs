//! Cache of built variable sets, keyed by scene name.
//!
//! Building a scene's variable set is cheap, but its variables carry fetched
//! options. Keeping the set around lets a scene that is shown again reuse them
//! instead of refetching everything. The cache is an ordinary value owned by
//! whatever composes the application; there is no global instance.
//!
//! Evicting or clearing deactivates the removed sets so none of their updates
//! outlive the cache entry.

use std::collections::HashMap;

use super::set::VariableSet;

/// Built variable sets by scene name.
#[derive(Debug, Default)]
pub struct SceneCache {
    scenes: HashMap<String, VariableSet>,
    hits: usize,
    misses: usize,
}

impl SceneCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached set for `name`, building it with `build` on first use.
    pub fn get_or_insert_with<F>(&mut self, name: &str, build: F) -> VariableSet
    where
        F: FnOnce() -> VariableSet,
    {
        if let Some(set) = self.scenes.get(name) {
            self.hits += 1;
            return set.clone();
        }

        self.misses += 1;
        tracing::debug!(target: "scene", "Building variable set for scene '{}'", name);
        let set = build();
        self.scenes.insert(name.to_string(), set.clone());
        set
    }

    /// The cached set for `name`, if any
    pub fn get(&mut self, name: &str) -> Option<VariableSet> {
        if let Some(set) = self.scenes.get(name) {
            self.hits += 1;
            Some(set.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    /// Whether `name` is cached. Does not count as a lookup.
    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    /// Remove `name`, deactivating its set.
    pub fn evict(&mut self, name: &str) -> Option<VariableSet> {
        let set = self.scenes.remove(name)?;
        set.deactivate();
        tracing::debug!(target: "scene", "Evicted scene '{}'", name);
        Some(set)
    }

    /// Deactivate and drop every cached set and reset the statistics
    pub fn clear(&mut self) {
        for set in self.scenes.values() {
            set.deactivate();
        }
        self.scenes.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of cached scenes
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Get cache statistics as `(hits, misses)`
    pub const fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
