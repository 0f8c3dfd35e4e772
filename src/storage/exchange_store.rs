use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::DecodedBodyCache;
use crate::models::{Exchange, ExchangeId};

/// Bounded collection owning the captured exchanges.
///
/// Keeps the newest `max_len` exchanges. Every exchange it lets go of is
/// evicted from `cache`.
pub struct ExchangeStore {
    ring: RwLock<VecDeque<Arc<Exchange>>>,
    max_len: usize,
    cache: DecodedBodyCache,
}

impl ExchangeStore {
    pub fn new(max_len: usize, cache: DecodedBodyCache) -> Self {
        let max_len = max_len.max(1);
        Self {
            ring: RwLock::new(VecDeque::with_capacity(max_len)),
            max_len,
            cache,
        }
    }

    pub fn cache(&self) -> &DecodedBodyCache {
        &self.cache
    }

    /// Take ownership of a captured exchange, returning the shared handle.
    pub fn add(&self, exchange: Exchange) -> Arc<Exchange> {
        let exchange = Arc::new(exchange);
        let evicted: Vec<Arc<Exchange>> = {
            let mut ring = self.write();
            ring.push_back(Arc::clone(&exchange));
            let overflow = ring.len().saturating_sub(self.max_len);
            ring.drain(..overflow).collect()
        };
        for old in evicted {
            self.cache.evict(old.id());
        }
        exchange
    }

    pub fn get(&self, id: ExchangeId) -> Option<Arc<Exchange>> {
        self.read().iter().find(|x| x.id() == id).cloned()
    }

    /// Exchanges oldest first
    pub fn list(&self) -> Vec<Arc<Exchange>> {
        self.read().iter().cloned().collect()
    }

    pub fn remove(&self, id: ExchangeId) -> Option<Arc<Exchange>> {
        let removed = {
            let mut ring = self.write();
            let position = ring.iter().position(|x| x.id() == id)?;
            ring.remove(position)
        };
        self.cache.evict(id);
        removed
    }

    /// Drop every exchange. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<Exchange>> = self.write().drain(..).collect();
        for exchange in &drained {
            self.cache.evict(exchange.id());
        }
        tracing::info!("Cleared {} exchanges from the viewer", drained.len());
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<Exchange>>> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Arc<Exchange>>> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }
}
