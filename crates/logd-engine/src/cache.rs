use std::collections::HashMap;

use logd_core::Node;
use logd_storage::{CommitCount, VirtualPath};
use parking_lot::Mutex;

/// A small fixed-capacity LRU keyed by `(path, commitCount)` (`spec.md`
/// §4.5: "A small in-memory LRU may cache `(path, commitCount) -> state`
/// keyed snapshots; invalidation on any write to that path"). Capacity is
/// tiny enough that a hand-rolled structure beats pulling in a crate for it.
pub struct ReconstructionCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<Key, Node>,
    // Most-recently-used at the back.
    order: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    path: String,
    commit_count: u64,
}

impl ReconstructionCache {
    pub fn new(capacity: usize) -> Self {
        ReconstructionCache {
            capacity,
            inner: Mutex::new(Inner { entries: HashMap::new(), order: Vec::new() }),
        }
    }

    pub fn get(&self, path: &VirtualPath, commit_count: CommitCount) -> Option<Node> {
        let key = Key { path: path.as_str().to_string(), commit_count: commit_count.get() };
        let mut guard = self.inner.lock();
        let node = guard.entries.get(&key).cloned()?;
        guard.order.retain(|k| k != &key);
        guard.order.push(key);
        Some(node)
    }

    pub fn put(&self, path: &VirtualPath, commit_count: CommitCount, state: Node) {
        if self.capacity == 0 {
            return;
        }
        let key = Key { path: path.as_str().to_string(), commit_count: commit_count.get() };
        let mut guard = self.inner.lock();
        guard.order.retain(|k| k != &key);
        guard.entries.insert(key.clone(), state);
        guard.order.push(key);
        while guard.order.len() > self.capacity {
            let evicted = guard.order.remove(0);
            guard.entries.remove(&evicted);
        }
    }

    /// Drops every cached entry for `path`: any write invalidates every
    /// previously reconstructed state for that path, since a later commit
    /// changes the "latest" target even for requests that asked for a
    /// specific historical `commitCount` whose cache entry is still valid --
    /// simplest to invalidate the whole path rather than reason about which
    /// entries survive.
    pub fn invalidate_path(&self, path: &VirtualPath) {
        let mut guard = self.inner.lock();
        let before = guard.order.len();
        guard.order.retain(|k| k.path != path.as_str());
        if guard.order.len() != before {
            guard.entries.retain(|k, _| k.path != path.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logd_core::Node;

    fn p(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ReconstructionCache::new(2);
        cache.put(&p("/a"), CommitCount(1), Node::int(1));
        cache.put(&p("/b"), CommitCount(1), Node::int(2));
        cache.put(&p("/c"), CommitCount(1), Node::int(3));
        assert!(cache.get(&p("/a"), CommitCount(1)).is_none(), "oldest entry should have been evicted");
        assert!(cache.get(&p("/b"), CommitCount(1)).is_some());
        assert!(cache.get(&p("/c"), CommitCount(1)).is_some());
    }

    #[test]
    fn invalidate_drops_only_matching_path() {
        let cache = ReconstructionCache::new(4);
        cache.put(&p("/a"), CommitCount(1), Node::int(1));
        cache.put(&p("/b"), CommitCount(1), Node::int(2));
        cache.invalidate_path(&p("/a"));
        assert!(cache.get(&p("/a"), CommitCount(1)).is_none());
        assert!(cache.get(&p("/b"), CommitCount(1)).is_some());
    }
}
