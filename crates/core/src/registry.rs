//! Weak registry of display slots waiting for the gate to reopen
//!
//! Slots that were held back while scrolling are recorded here so that a
//! resume pass can find them. Entries are `Weak`, so the registry never
//! keeps a slot alive after the view layer discards it, and dead entries are
//! swept as the registry is used.

use crate::slot::DisplaySlot;
use std::sync::{Arc, Mutex, Weak};

/// Entry count below which `register` never sweeps.
const MIN_COMPACT_THRESHOLD: usize = 16;

struct Entries<D> {
    slots: Vec<Weak<DisplaySlot<D>>>,
    compact_at: usize,
}

impl<D> Entries<D> {
    fn compact(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.strong_count() > 0);
        let removed = before - self.slots.len();
        self.compact_at = (self.slots.len() * 2).max(MIN_COMPACT_THRESHOLD);
        removed
    }
}

/// Registry of display slots, identified by pointer.
pub struct SlotRegistry<D> {
    entries: Mutex<Entries<D>>,
}

impl<D> SlotRegistry<D> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                slots: Vec::new(),
                compact_at: MIN_COMPACT_THRESHOLD,
            }),
        }
    }

    /// Register a slot. Returns `false` if this exact slot is already
    /// registered.
    pub fn register(&self, slot: &Arc<DisplaySlot<D>>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let target = Arc::as_ptr(slot);
        if entries.slots.iter().any(|entry| entry.as_ptr() == target) {
            return false;
        }

        if entries.slots.len() >= entries.compact_at {
            let removed = entries.compact();
            if removed > 0 {
                log::trace!("slot registry swept {removed} dead entries");
            }
        }
        entries.slots.push(Arc::downgrade(slot));
        true
    }

    /// Call `f` for every live slot and return how many were visited.
    ///
    /// Live slots are collected under the lock and dead entries dropped;
    /// `f` runs after the lock is released, so it may register slots.
    pub fn broadcast<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Arc<DisplaySlot<D>>),
    {
        let live: Vec<Arc<DisplaySlot<D>>> = {
            let mut entries = self.entries.lock().unwrap();
            let mut live = Vec::with_capacity(entries.slots.len());
            entries.slots.retain(|entry| match entry.upgrade() {
                Some(slot) => {
                    live.push(slot);
                    true
                }
                None => false,
            });
            live
        };

        for slot in &live {
            f(slot);
        }
        live.len()
    }

    /// Drop entries whose slot is gone. Returns how many were removed.
    pub fn compact(&self) -> usize {
        self.entries.lock().unwrap().compact()
    }

    /// Number of entries, dead ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}

impl<D> Default for SlotRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_by_identity() {
        let registry = SlotRegistry::new();
        let a = DisplaySlot::<u32>::new();
        let b = DisplaySlot::<u32>::new();
        a.set_data(1);
        b.set_data(1);

        assert!(registry.register(&a));
        assert!(!registry.register(&a));
        // Same data, different slot.
        assert!(registry.register(&b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_broadcast_skips_dropped_slots() {
        let registry = SlotRegistry::new();
        let kept = DisplaySlot::<u32>::new();
        let dropped = DisplaySlot::<u32>::new();
        registry.register(&kept);
        registry.register(&dropped);
        drop(dropped);

        let mut visited = Vec::new();
        let count = registry.broadcast(|slot| visited.push(slot.id()));

        assert_eq!(count, 1);
        assert_eq!(visited, vec![kept.id()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_does_not_keep_slots_alive() {
        let registry = SlotRegistry::new();
        let slot = DisplaySlot::<u32>::new();
        let weak = Arc::downgrade(&slot);
        registry.register(&slot);

        drop(slot);
        assert!(weak.upgrade().is_none());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.compact(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_sweeps_dead_entries() {
        let registry = SlotRegistry::new();
        for _ in 0..MIN_COMPACT_THRESHOLD {
            let slot = DisplaySlot::<u32>::new();
            registry.register(&slot);
        }
        assert_eq!(registry.len(), MIN_COMPACT_THRESHOLD);

        let survivor = DisplaySlot::<u32>::new();
        registry.register(&survivor);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_broadcast_may_register() {
        let registry = SlotRegistry::new();
        let slot = DisplaySlot::<u32>::new();
        registry.register(&slot);

        let count = registry.broadcast(|s| {
            assert!(!registry.register(s));
        });
        assert_eq!(count, 1);
    }
}
