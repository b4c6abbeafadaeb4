//! # Particle Index Allocator
//!
//! Maps the host's logical points onto the solver's fixed pool of particle
//! slots.
//!
//! ## Architecture
//!
//! ```text
//! SlotPool
//! ├── free: Vec<u32>      // stack, lowest slot on top
//! └── active: Vec<u32>    // allocation order = logical order
//!
//! ParticleIndexAllocator
//! └── reconcile(N): grow from the free stack / shrink from the active tail
//! ```
//!
//! After reconciliation entry `i` of the active list is the slot backing
//! logical point `i`. Growth beyond capacity hands out what is left and
//! reports the shortfall; the caller decides how to degrade.

use tracing::{debug, warn};

use flexlink_core::error::{BridgeError, BridgeResult};

/// Fixed-capacity pool of particle slots
#[derive(Debug, Clone)]
pub struct SlotPool {
    capacity: usize,
    free: Vec<u32>,
    active: Vec<u32>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: (0..capacity as u32).rev().collect(),
            active: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Activate up to `n` slots; returns how many were activated
    pub fn alloc(&mut self, n: usize) -> usize {
        let granted = n.min(self.free.len());
        for _ in 0..granted {
            if let Some(slot) = self.free.pop() {
                self.active.push(slot);
            }
        }
        granted
    }

    /// Return the last `n` active slots to the free stack; returns how many were freed
    pub fn free_tail(&mut self, n: usize) -> usize {
        let released = n.min(self.active.len());
        for _ in 0..released {
            if let Some(slot) = self.active.pop() {
                self.free.push(slot);
            }
        }
        released
    }

    /// Active slots in allocation order
    pub fn active_list(&self) -> &[u32] {
        &self.active
    }
}

/// Logical index to slot mapping, valid for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveList {
    slots: Vec<u32>,
}

impl ActiveList {
    /// Number of represented logical points
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Slot backing logical point `logical`
    #[inline]
    pub fn slot_of(&self, logical: usize) -> Option<u32> {
        self.slots.get(logical).copied()
    }

    /// Logical point backed by `slot`; linear scan
    pub fn logical_of(&self, slot: u32) -> Option<usize> {
        self.slots.iter().position(|&s| s == slot)
    }

    /// Slot → logical lookup table sized to `capacity`; unused slots hold `None`
    pub fn inverse(&self, capacity: usize) -> Vec<Option<usize>> {
        let mut table = vec![None; capacity];
        for (logical, &slot) in self.slots.iter().enumerate() {
            if let Some(entry) = table.get_mut(slot as usize) {
                *entry = Some(logical);
            }
        }
        table
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The mapping after reconciliation
    pub active: ActiveList,
    /// Logical points left without a slot
    pub shortfall: usize,
    /// Points the caller asked for
    pub requested: usize,
}

impl Reconciliation {
    /// `CapacityExceeded` when some points could not be represented
    pub fn check(&self) -> BridgeResult<()> {
        if self.shortfall > 0 {
            return Err(BridgeError::CapacityExceeded {
                requested: self.requested,
                available: self.active.len(),
            });
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// Keeps the active slot count equal to the logical point count
#[derive(Debug, Clone)]
pub struct ParticleIndexAllocator {
    pool: SlotPool,
}

impl ParticleIndexAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity),
        }
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Grow or shrink the active set to `logical_count` and return the mapping
    pub fn reconcile(&mut self, logical_count: usize) -> Reconciliation {
        let previous = self.pool.active_count();
        let mut shortfall = 0;

        if logical_count > previous {
            let wanted = logical_count - previous;
            let granted = self.pool.alloc(wanted);
            shortfall = wanted - granted;
            debug!(previous, granted, "allocated particle slots");
            if shortfall > 0 {
                warn!(
                    requested = logical_count,
                    available = self.pool.active_count(),
                    "⚠️ Particle pool exhausted, {} points left unrepresented",
                    shortfall
                );
            }
        } else if logical_count < previous {
            let released = self.pool.free_tail(previous - logical_count);
            debug!(previous, released, "freed particle slots");
        }

        Reconciliation {
            active: self.active_list(),
            shortfall,
            requested: logical_count,
        }
    }

    /// Current mapping without changing anything
    pub fn active_list(&self) -> ActiveList {
        ActiveList {
            slots: self.pool.active_list().to_vec(),
        }
    }

    /// Release every slot
    pub fn reset(&mut self) {
        let active = self.pool.active_count();
        self.pool.free_tail(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_from_empty() {
        let mut alloc = ParticleIndexAllocator::new(10);
        let r = alloc.reconcile(4);
        assert!(r.is_complete());
        assert_eq!(r.active.slots(), &[0, 1, 2, 3]);
        assert_eq!(alloc.pool().free_count(), 6);
    }

    #[test]
    fn test_same_count_is_stable() {
        let mut alloc = ParticleIndexAllocator::new(10);
        let first = alloc.reconcile(4).active;
        let second = alloc.reconcile(4).active;
        assert_eq!(first, second);
    }

    #[test]
    fn test_shrink_frees_tail() {
        let mut alloc = ParticleIndexAllocator::new(10);
        alloc.reconcile(4);
        let r = alloc.reconcile(2);
        assert_eq!(r.active.slots(), &[0, 1]);
        assert_eq!(alloc.pool().free_count(), 8);
    }

    #[test]
    fn test_freed_slots_are_reused_first() {
        let mut alloc = ParticleIndexAllocator::new(10);
        alloc.reconcile(5);
        alloc.reconcile(3);
        let r = alloc.reconcile(4);
        // slot 3 was on top of the free stack
        assert_eq!(r.active.slot_of(3), Some(3));
    }

    #[test]
    fn test_shortfall_reported() {
        let mut alloc = ParticleIndexAllocator::new(3);
        let r = alloc.reconcile(5);
        assert_eq!(r.shortfall, 2);
        assert_eq!(r.active.len(), 3);
        match r.check() {
            Err(BridgeError::CapacityExceeded { requested, available }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn test_inverse_matches_logical_of() {
        let mut alloc = ParticleIndexAllocator::new(8);
        alloc.reconcile(6);
        alloc.reconcile(2);
        let active = alloc.reconcile(5).active;
        let inverse = active.inverse(8);
        for logical in 0..active.len() {
            let slot = active.slot_of(logical).unwrap();
            assert_eq!(active.logical_of(slot), Some(logical));
            assert_eq!(inverse[slot as usize], Some(logical));
        }
    }

    #[test]
    fn test_reset_frees_everything() {
        let mut alloc = ParticleIndexAllocator::new(4);
        alloc.reconcile(4);
        alloc.reset();
        assert_eq!(alloc.active_count(), 0);
        assert_eq!(alloc.pool().free_count(), 4);
    }
}
