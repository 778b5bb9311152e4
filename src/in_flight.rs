// Shared set of slots currently being booked, so overlapping race rounds never hit the same slot twice

use crate::model::SlotKey;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct InFlightSlots {
    keys: Mutex<HashSet<SlotKey>>,
}

impl InFlightSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim every key not already owned by another round.
    ///
    /// Returns the indices (into `keys`) that were claimed along with a guard
    /// releasing exactly those keys when dropped.
    pub fn claim(self: &Arc<Self>, keys: &[SlotKey]) -> (Vec<usize>, ClaimGuard) {
        let mut claimed = Vec::with_capacity(keys.len());
        let mut owned = Vec::with_capacity(keys.len());
        {
            let mut set = self.keys.lock();
            for (index, key) in keys.iter().enumerate() {
                if set.insert(key.clone()) {
                    claimed.push(index);
                    owned.push(key.clone());
                }
            }
        }

        let guard = ClaimGuard {
            slots: Arc::clone(self),
            keys: owned,
        };
        (claimed, guard)
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    fn release(&self, keys: &[SlotKey]) {
        let mut set = self.keys.lock();
        for key in keys {
            set.remove(key);
        }
    }
}

/// Releases a round's claimed keys on every exit path, unwinding included.
#[derive(Debug)]
pub struct ClaimGuard {
    slots: Arc<InFlightSlots>,
    keys: Vec<SlotKey>,
}

impl ClaimGuard {
    pub fn keys(&self) -> &[SlotKey] {
        &self.keys
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.keys.is_empty() {
            self.slots.release(&self.keys);
        }
    }
}
