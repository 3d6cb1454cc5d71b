//! In-memory snapshot of the occasion list.
//!
//! The list is read on every storefront page and changes only on admin
//! writes, so readers take a lock-free snapshot and writers swap in a freshly
//! loaded list. Readers only ever fill an empty cache; a list loaded by a
//! reader can therefore never overwrite one stored after a write.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use common::protocol::Occasion;
use tokio::sync::{Mutex, MutexGuard};

/// Shared occasion snapshot. `None` until first loaded.
#[derive(Clone, Debug, Default)]
pub struct OccasionCache {
    inner: Arc<ArcSwapOption<Vec<Occasion>>>,
    writers: Arc<Mutex<()>>,
}

impl OccasionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, if loaded.
    pub fn get(&self) -> Option<Arc<Vec<Occasion>>> {
        self.inner.load_full()
    }

    /// Store `occasions` only if nothing is cached yet. Returns whichever
    /// snapshot is current afterwards.
    pub fn fill(&self, occasions: Vec<Occasion>) -> Arc<Vec<Occasion>> {
        let snapshot = Arc::new(occasions);
        let previous = self
            .inner
            .compare_and_swap(&None::<Arc<Vec<Occasion>>>, Some(snapshot.clone()));
        match &*previous {
            Some(current) => Arc::clone(current),
            None => snapshot,
        }
    }

    /// Atomically replace the snapshot. Callers hold [`Self::lock_writes`]
    /// across their load and this call.
    pub fn replace(&self, occasions: Vec<Occasion>) -> Arc<Vec<Occasion>> {
        let snapshot = Arc::new(occasions);
        self.inner.store(Some(snapshot.clone()));
        snapshot
    }

    /// Serialises writer reloads so the last one to store also loaded last.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writers.lock().await
    }
}
