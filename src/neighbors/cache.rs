use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use super::{Descriptors, IndexBuilder, NeighborIndex};
use crate::error::SverError;

/// Bounded least-recently-used cache of built indices.
///
/// Entries are keyed by [`Descriptors::content_hash`], the descriptor shape
/// and the backend name, so the same descriptors indexed by two backends are
/// cached separately. A key match is confirmed against the stored descriptors
/// before the index is reused.
pub struct IndexCache {
    capacity: usize,
    // Least recently used at the front.
    entries: VecDeque<CacheEntry>,
}

struct CacheEntry {
    key: CacheKey,
    data: Descriptors,
    index: Arc<dyn NeighborIndex>,
}

impl CacheEntry {
    fn matches(&self, key: &CacheKey, data: &Descriptors) -> bool {
        self.key == *key && self.data == *data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    hash: u64,
    dim: usize,
    len: usize,
    backend: &'static str,
}

impl CacheKey {
    fn new(data: &Descriptors, builder: &dyn IndexBuilder) -> Self {
        Self {
            hash: data.content_hash(),
            dim: data.dim(),
            len: data.len(),
            backend: builder.name(),
        }
    }
}

impl IndexCache {
    /// A zero capacity disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
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

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, data: &Descriptors, builder: &dyn IndexBuilder) -> bool {
        let key = CacheKey::new(data, builder);
        self.entries.iter().any(|e| e.matches(&key, data))
    }

    /// Cached index for `data`, building and inserting it on a miss.
    pub fn get_or_build(
        &mut self,
        data: &Descriptors,
        builder: &dyn IndexBuilder,
    ) -> Result<Arc<dyn NeighborIndex>, SverError> {
        let key = CacheKey::new(data, builder);
        if let Some(pos) = self.entries.iter().position(|e| e.matches(&key, data)) {
            trace!(hash = key.hash, backend = key.backend, "index cache hit");
            if let Some(entry) = self.entries.remove(pos) {
                let index = Arc::clone(&entry.index);
                self.entries.push_back(entry);
                return Ok(index);
            }
        }

        trace!(hash = key.hash, backend = key.backend, "index cache miss");
        let index: Arc<dyn NeighborIndex> = Arc::from(builder.build(data)?);
        if self.capacity > 0 {
            while self.entries.len() >= self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(CacheEntry {
                key,
                data: data.clone(),
                index: Arc::clone(&index),
            });
        }
        Ok(index)
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .finish()
    }
}
