use std::sync::Arc;

use dashmap::DashMap;
use meno_core::{ItemId, Recipe};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    fingerprint: String,
    item_id: ItemId,
}

/// Hydrated recipes keyed by `(request fingerprint, item id)`.
///
/// Entries are only ever added; the first value stored for a key wins.
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct HydrationCache {
    entries: Arc<DashMap<CacheKey, Recipe>>,
}

impl HydrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str, item_id: &str) -> Option<Recipe> {
        let key = CacheKey {
            fingerprint: fingerprint.to_string(),
            item_id: item_id.to_string(),
        };
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, fingerprint: &str, item_id: &str, recipe: Recipe) {
        let key = CacheKey {
            fingerprint: fingerprint.to_string(),
            item_id: item_id.to_string(),
        };
        self.entries.entry(key).or_insert(recipe);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(title: &str) -> Recipe {
        Recipe {
            title: title.to_string(),
            ..Recipe::default()
        }
    }

    #[test]
    fn namespaces_are_separate() {
        let cache = HydrationCache::new();
        cache.insert("fp1", "a", recipe("one"));
        assert!(cache.get("fp2", "a").is_none());
        assert_eq!(cache.get("fp1", "a").unwrap().title, "one");
    }

    #[test]
    fn first_insert_wins() {
        let cache = HydrationCache::new();
        cache.insert("fp", "a", recipe("first"));
        cache.insert("fp", "a", recipe("second"));
        assert_eq!(cache.get("fp", "a").unwrap().title, "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clones_share_entries() {
        let cache = HydrationCache::new();
        let other = cache.clone();
        other.insert("fp", "a", recipe("shared"));
        assert!(cache.get("fp", "a").is_some());
    }
}
