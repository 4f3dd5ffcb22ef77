use std::sync::Arc;

use indexmap::IndexMap;

use crate::comments::CommentThread;
use crate::post::PostRecord;

/// What is known about one post. Either half may be missing.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub post: Option<Arc<PostRecord>>,
    pub comments: Option<Arc<CommentThread>>,
}

impl CacheEntry {
    pub fn with_post(post: Arc<PostRecord>) -> Self {
        Self {
            post: Some(post),
            comments: None,
        }
    }

    pub fn with_comments(comments: Arc<CommentThread>) -> Self {
        Self {
            post: None,
            comments: Some(comments),
        }
    }
}

/// Bounded post cache with insertion-order eviction: when a new key would exceed the
/// bound, the key inserted earliest goes first, no matter how recently it was read.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    entries: IndexMap<String, CacheEntry>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Merges `partial` into the entry for `key`; fields absent from `partial` are kept.
    /// Merging leaves the key's insertion position alone.
    pub fn set(&mut self, key: &str, partial: CacheEntry) {
        if let Some(existing) = self.entries.get_mut(key) {
            if partial.post.is_some() {
                existing.post = partial.post;
            }
            if partial.comments.is_some() {
                existing.comments = partial.comments;
            }
            return;
        }

        while self.entries.len() >= self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((oldest, _)) => log::debug!("cache: evicted {oldest}"),
                None => break,
            }
        }
        self.entries.insert(key.to_string(), partial);
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str) -> Arc<PostRecord> {
        Arc::new(PostRecord {
            id: id.into(),
            ..PostRecord::default()
        })
    }

    #[test]
    fn evicts_first_inserted_on_overflow() {
        let mut cache = ResultCache::new(50);
        for i in 0..50 {
            cache.set(&format!("g{i}"), CacheEntry::with_post(post(&i.to_string())));
        }
        assert_eq!(cache.len(), 50);
        // Reading the oldest key must not protect it.
        assert!(cache.get("g0").is_some());
        cache.set("g50", CacheEntry::with_post(post("50")));
        assert_eq!(cache.len(), 50);
        assert!(!cache.contains("g0"));
        assert!(cache.contains("g1"));
        assert!(cache.contains("g50"));
    }

    #[test]
    fn merge_write_keeps_existing_half() {
        let mut cache = ResultCache::new(4);
        cache.set("k", CacheEntry::with_post(post("1")));
        cache.set(
            "k",
            CacheEntry::with_comments(Arc::new(CommentThread {
                total_count: 3,
                entries: vec![],
            })),
        );
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.post.as_ref().unwrap().id, "1");
        assert_eq!(entry.comments.as_ref().unwrap().total_count, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn updating_existing_key_never_evicts() {
        let mut cache = ResultCache::new(2);
        cache.set("a", CacheEntry::with_post(post("a")));
        cache.set("b", CacheEntry::with_post(post("b")));
        cache.set("a", CacheEntry::with_post(post("a2")));
        assert!(cache.contains("a") && cache.contains("b"));
        assert_eq!(cache.get("a").unwrap().post.as_ref().unwrap().id, "a2");
    }

    #[test]
    fn delete_reports_presence_and_frees_slot() {
        let mut cache = ResultCache::new(2);
        cache.set("a", CacheEntry::default());
        cache.set("b", CacheEntry::default());
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.set("c", CacheEntry::default());
        assert!(cache.contains("b") && cache.contains("c"));
    }

    #[test]
    fn merge_keeps_insertion_position() {
        let mut cache = ResultCache::new(3);
        cache.set("a", CacheEntry::with_post(post("a")));
        cache.set("b", CacheEntry::with_post(post("b")));
        cache.set("a", CacheEntry::default());
        cache.set("c", CacheEntry::default());
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        cache.set("d", CacheEntry::default());
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    }
}
