// Compiled template cache

use dashmap::DashMap;

use crate::template::Compiled;

/// Storage for compiled templates, keyed by filename (`:client` suffixed for
/// client builds). Last write wins; entries live until `reset`.
pub trait TemplateCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Compiled>;

    fn set(&self, key: &str, compiled: Compiled);

    fn reset(&self);
}

/// Default in-process cache
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Compiled>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TemplateCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Compiled> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, compiled: Compiled) {
        self.entries.insert(key.to_string(), compiled);
    }

    fn reset(&self) {
        self.entries.clear();
    }
}
