use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Result, TrackError};

type StateKey = (String, String);

/// Per-(viewer, media) mutual exclusion for the read-merge-write sequence.
///
/// Slots are created on demand and removed once nobody holds or waits on
/// them, so the map only grows with the number of keys in flight.
#[derive(Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<StateKey, Arc<AsyncMutex<()>>>>,
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: StateKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        viewer_id: &str,
        media_id: &str,
        timeout: Duration,
    ) -> Result<KeyGuard<'_>> {
        let key = (viewer_id.to_string(), media_id.to_string());
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        // Declared before the wait so it is dropped after it, on every exit
        // including a cancelled wait, and prunes the slot then.
        let mut pending = KeyGuard {
            locks: self,
            key,
            guard: None,
        };
        let acquired = tokio::time::timeout(timeout, slot.lock_owned()).await;

        match acquired {
            Ok(guard) => {
                pending.guard = Some(guard);
                Ok(pending)
            }
            Err(_) => Err(TrackError::Conflict(format!(
                "timed out after {}ms waiting for watch state ({}, {})",
                timeout.as_millis(),
                pending.key.0,
                pending.key.1
            ))),
        }
    }

    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn prune(&self, key: &StateKey) {
        let mut slots = self.slots.lock();
        // Clones are only taken under this lock, so a count of one means
        // no holder and no waiter.
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}
