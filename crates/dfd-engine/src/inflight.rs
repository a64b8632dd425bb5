//! Per-fingerprint in-flight guard.
//!
//! At most one analysis runs per fingerprint. Later callers for the same key
//! queue on the holder's slot and, once it is released, re-check the cache
//! instead of recomputing. Different keys never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::fingerprint::Fingerprint;

type Slot = Arc<AsyncMutex<()>>;

/// Collapses concurrent analyses of the same [`Fingerprint`].
///
/// Each key maps to a slot that is created on first use and removed once
/// nobody holds or waits on it.
#[derive(Default)]
pub struct InFlight {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `key`, then hold it.
    pub async fn acquire(&self, key: &Fingerprint) -> InFlightGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        InFlightGuard {
            owner: self,
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a key until dropped.
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: Fingerprint,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock().unwrap_or_else(|e| e.into_inner());
        // The map holds one reference and this guard another; anything above
        // that is a waiter. A waiter cancelled before it took the lock leaves
        // its slot with only the map's reference, so sweep those too.
        slots.retain(|key, slot| {
            let holders = Arc::strong_count(slot) - 1;
            if *key == self.key {
                holders > 1
            } else {
                holders > 0
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> Fingerprint {
        Fingerprint::new(name, 1, 0, 128, 0.4)
    }

    #[tokio::test]
    async fn test_slot_is_removed_when_released() {
        let inflight = InFlight::new();
        {
            let _guard = inflight.acquire(&key("a")).await;
            assert_eq!(inflight.len(), 1);
        }
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_waits() {
        let inflight = Arc::new(InFlight::new());
        let first = inflight.acquire(&key("a")).await;

        let waiter = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                let _guard = inflight.acquire(&key("a")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_slot_is_swept() {
        let inflight = Arc::new(InFlight::new());
        let first = inflight.acquire(&key("a")).await;

        let waiter = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                let _guard = inflight.acquire(&key("a")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still holds the slot, so releasing keeps the entry
        drop(first);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(inflight.len(), 1);

        // Any later release clears the abandoned slot
        drop(inflight.acquire(&key("b")).await);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let inflight = InFlight::new();
        let _a = inflight.acquire(&key("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), inflight.acquire(&key("b"))).await;
        assert!(b.is_ok());
    }
}
