//! Arena of outstanding leases
//!
//! The chain tracks the currently open leases as a flat id-to-slot map plus
//! an ordered list of live ids. Only membership, emptiness, and insertion
//! order are ever needed, so there are no neighbor pointers to keep
//! consistent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Identity of a lease, unique per registry for its lifetime
pub type LeaseId = u64;

/// Lifecycle state of a single lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LeaseState {
    /// Lease is live and its connection snapshot is valid
    Open = 0,
    /// Lease was released by its holder
    Released = 1,
    /// Lease was invalidated by a force close; releasing it is a no-op
    Revoked = 2,
}

/// Shared record for one lease
///
/// The registry keeps one reference in the chain while the lease is open;
/// the `Lease` handle keeps another for its whole lifetime. State
/// transitions happen only under the registry monitor, but `state()` may be
/// read lock-free from the handle's accessors.
pub(crate) struct LeaseCore<C> {
    pub(crate) id: LeaseId,
    pub(crate) generation: u64,
    pub(crate) acquired_at: DateTime<Utc>,
    pub(crate) conn: Arc<C>,
    state: AtomicU8,
}

impl<C> LeaseCore<C> {
    pub(crate) fn new(id: LeaseId, generation: u64, conn: Arc<C>) -> Self {
        Self {
            id,
            generation,
            acquired_at: Utc::now(),
            conn,
            state: AtomicU8::new(LeaseState::Open as u8),
        }
    }

    pub(crate) fn state(&self) -> LeaseState {
        match self.state.load(Ordering::Acquire) {
            0 => LeaseState::Open,
            1 => LeaseState::Released,
            _ => LeaseState::Revoked,
        }
    }

    /// Must only be called under the registry monitor
    pub(crate) fn set_state(&self, state: LeaseState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Ordered multiset of currently open leases, oldest first
pub(crate) struct LeaseChain<C> {
    slots: HashMap<LeaseId, Arc<LeaseCore<C>>>,
    order: Vec<LeaseId>,
}

impl<C> LeaseChain<C> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Append a lease at the tail (newest position)
    pub(crate) fn push(&mut self, core: Arc<LeaseCore<C>>) {
        self.order.push(core.id);
        self.slots.insert(core.id, core);
    }

    /// Splice a lease out of the chain
    pub(crate) fn remove(&mut self, id: LeaseId) -> Option<Arc<LeaseCore<C>>> {
        let core = self.slots.remove(&id)?;
        self.order.retain(|&live| live != id);
        Some(core)
    }

    /// Remove every lease, oldest first
    pub(crate) fn drain(&mut self) -> Vec<Arc<LeaseCore<C>>> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.slots.remove(&id))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(id: LeaseId) -> Arc<LeaseCore<()>> {
        Arc::new(LeaseCore::new(id, 1, Arc::new(())))
    }

    #[test]
    fn test_push_remove_membership() {
        let mut chain = LeaseChain::new();
        assert!(chain.is_empty());

        chain.push(core(1));
        chain.push(core(2));
        assert_eq!(chain.len(), 2);

        let removed = chain.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(chain.len(), 1);

        assert!(chain.remove(1).is_none());
        chain.remove(2).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let mut chain = LeaseChain::new();
        for id in [3, 1, 2] {
            chain.push(core(id));
        }

        let drained: Vec<LeaseId> = chain.drain().iter().map(|c| c.id).collect();
        assert_eq!(drained, vec![3, 1, 2]);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let core = core(9);
        assert_eq!(core.state(), LeaseState::Open);
        core.set_state(LeaseState::Released);
        assert_eq!(core.state(), LeaseState::Released);
        core.set_state(LeaseState::Revoked);
        assert_eq!(core.state(), LeaseState::Revoked);
    }
}
