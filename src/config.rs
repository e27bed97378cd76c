//! Shared I/O context and global configuration.
//!
//! A [`Context`] is injected when opening variables or datasets rather than
//! read from module state, so tests can isolate I/O behaviour. When no
//! context is supplied, [`Context::default`] applies.
//!
//! ## Cache Pool
//!  > default: 1 GiB
//!
//! [`Context::cache_bytes_limit()`] bounds the total bytes of decoded chunks
//! retained by the chunk cache shared by every array opened with the context.
//! A limit of zero disables caching.
//!
//! ## Data Copy Concurrency
//! > default: [`std::thread::available_parallelism`]`()`
//!
//! [`Context::data_copy_concurrency()`] bounds the number of chunk reads or
//! writes in flight for a single array operation.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// The default chunk cache limit in bytes (1 GiB).
pub const DEFAULT_CACHE_BYTES_LIMIT: usize = 1 << 30;

/// A shared I/O context: chunk cache pool and data-copy concurrency limit.
///
/// Contexts are cheap to clone; clones share the same cache pool.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    cache_bytes_limit: usize,
    data_copy_concurrency: usize,
    cache: ChunkCache,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(
            DEFAULT_CACHE_BYTES_LIMIT,
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
        )
    }
}

impl Context {
    /// Create a context with the given cache byte limit and data-copy
    /// concurrency limit. A concurrency limit of zero is treated as one.
    #[must_use]
    pub fn new(cache_bytes_limit: usize, data_copy_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cache_bytes_limit,
                data_copy_concurrency: data_copy_concurrency.max(1),
                cache: ChunkCache::new(cache_bytes_limit),
            }),
        }
    }

    /// Get the total bytes limit of the chunk cache pool.
    #[must_use]
    pub fn cache_bytes_limit(&self) -> usize {
        self.inner.cache_bytes_limit
    }

    /// Get the data-copy concurrency limit.
    #[must_use]
    pub fn data_copy_concurrency(&self) -> usize {
        self.inner.data_copy_concurrency
    }

    pub(crate) fn cache(&self) -> &ChunkCache {
        &self.inner.cache
    }
}

/// A byte-bounded cache of decoded chunks, evicting oldest-inserted first.
#[derive(Debug)]
pub(crate) struct ChunkCache {
    limit: usize,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Bytes>,
    order: VecDeque<String>,
    bytes: usize,
}

impl ChunkCache {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        if self.limit == 0 {
            return None;
        }
        self.state.lock().entries.get(key).cloned()
    }

    pub(crate) fn insert(&self, key: String, value: Bytes) {
        if self.limit == 0 || value.len() > self.limit {
            return;
        }
        let mut state = self.state.lock();
        if let Some(previous) = state.entries.insert(key.clone(), value.clone()) {
            state.bytes -= previous.len();
        } else {
            state.order.push_back(key);
        }
        state.bytes += value.len();
        while state.bytes > self.limit {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(evicted) = state.entries.remove(&oldest) {
                state.bytes -= evicted.len();
            }
        }
    }

    pub(crate) fn invalidate(&self, key: &str) {
        if self.limit == 0 {
            return;
        }
        let mut state = self.state.lock();
        if let Some(removed) = state.entries.remove(key) {
            state.bytes -= removed.len();
        }
    }
}
