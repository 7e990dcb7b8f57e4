use std::collections::HashMap;

use serde_json::Value;
use solarsis_schema::normalize_path;

const CACHE_SUFFIX: &str = "/cache";

/// Last merged reply per command path. Last write wins; no history.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    entries: HashMap<String, Value>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the merged reply of `path`, replacing any previous value.
    pub fn store(&mut self, path: &str, merged: Value) {
        self.entries.insert(cache_key(path), merged);
    }

    /// Last reply of `path`. Accepts `/family/command` and the route form
    /// `/family/command/cache`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(&cache_key(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.entries.remove(&cache_key(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort_unstable();
        paths
    }
}

/// Cache key of a path or cache route.
pub fn cache_key(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_suffix(CACHE_SUFFIX).unwrap_or(path);
    normalize_path(path)
}
