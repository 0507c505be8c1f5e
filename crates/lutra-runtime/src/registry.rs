//! Weak registry of live instances per artifact

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::instance::Instance;

/// Dead-slot count that triggers opportunistic pruning on `add`.
const PRUNE_WATERMARK: usize = 32;

/// Weakly-held set of every live instance bound to one artifact.
///
/// Membership never extends an instance's lifetime: the set stores `Weak`
/// handles and filters dead slots lazily. Additions may race with iteration
/// freely; iteration works over a snapshot of the slots taken at call time,
/// and upgrades each one only when the consumer reaches it.
#[derive(Debug, Default)]
pub struct LiveInstanceSet {
    slots: RwLock<Vec<Weak<Instance>>>,
}

impl LiveInstanceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an instance.
    ///
    /// Re-adding an instance that is already present is a no-op, so a
    /// function invoked repeatedly for the same object keeps a single entry.
    pub fn add(&self, instance: &Arc<Instance>) {
        let mut slots = self.slots.write();

        if slots
            .iter()
            .any(|slot| slot.as_ptr() == Arc::as_ptr(instance))
        {
            return;
        }

        let dead = slots.iter().filter(|slot| slot.strong_count() == 0).count();
        if dead >= PRUNE_WATERMARK {
            slots.retain(|slot| slot.strong_count() > 0);
            tracing::trace!(pruned = dead, remaining = slots.len(), "live set pruned");
        }

        slots.push(Arc::downgrade(instance));
    }

    /// Lazy sequence of currently-alive instances, in insertion order among
    /// survivors. Each call starts a fresh pass; entries collected after the
    /// snapshot are skipped at upgrade time.
    pub fn iter_alive(&self) -> AliveIter {
        AliveIter {
            slots: self.slots.read().clone().into_iter(),
        }
    }

    /// Count of instances alive right now.
    pub fn len_alive(&self) -> usize {
        self.iter_alive().count()
    }

    /// Total slots, dead ones included. Test and diagnostics aid.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }
}

/// Iterator over the live members of a [`LiveInstanceSet`] snapshot.
pub struct AliveIter {
    slots: std::vec::IntoIter<Weak<Instance>>,
}

impl Iterator for AliveIter {
    type Item = Arc<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Some(instance) = slot.upgrade() {
                return Some(instance);
            }
        }
        None
    }
}
