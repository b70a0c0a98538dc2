//! Per-aggregate write locks.
//!
//! Appends to one aggregate are serialised; appends to different aggregates
//! never wait on each other. The map holds weak references so an aggregate
//! nobody is writing to costs nothing once its last guard drops.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError, Weak},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Map size above which dead entries are pruned on the next acquire.
const PRUNE_THRESHOLD: usize = 128;

#[derive(Debug, Default)]
pub struct AggregateLocks {
  locks: Mutex<HashMap<Uuid, Weak<AsyncMutex<()>>>>,
}

/// Held for the duration of one append or resolution.
pub type AggregateGuard = OwnedMutexGuard<()>;

impl AggregateLocks {
  pub async fn acquire(&self, aggregate_id: Uuid) -> AggregateGuard {
    self.lock_for(aggregate_id).lock_owned().await
  }

  fn lock_for(&self, aggregate_id: Uuid) -> Arc<AsyncMutex<()>> {
    // Only weak handles live in the map, so a poisoned lock is still usable.
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

    if locks.len() > PRUNE_THRESHOLD {
      locks.retain(|_, weak| weak.strong_count() > 0);
    }

    if let Some(existing) = locks.get(&aggregate_id).and_then(Weak::upgrade) {
      return existing;
    }

    let lock = Arc::new(AsyncMutex::new(()));
    locks.insert(aggregate_id, Arc::downgrade(&lock));
    lock
  }

  #[cfg(test)]
  fn live(&self) -> usize {
    self
      .locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .filter(|weak| weak.strong_count() > 0)
      .count()
  }
}
