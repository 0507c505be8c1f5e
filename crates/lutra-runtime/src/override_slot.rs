//! Cooperative override slots provisioned by the build-time weaver

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::instance::Behavior;
use crate::trampoline::BehaviorCell;

/// A pre-instrumented hook point for one artifact.
///
/// The external weaving step plants a check of this slot at the very start
/// of the target function. Artifacts without an identity-bearing declaration
/// (style and resource-only documents) get no slot, which is why a missing
/// slot is an expected lookup miss, not a fault.
pub struct OverrideSlot {
    artifact: String,
    hook: ArcSwapOption<BehaviorCell>,
}

impl std::fmt::Debug for OverrideSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideSlot")
            .field("artifact", &self.artifact)
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl OverrideSlot {
    fn new(artifact: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            artifact: artifact.into(),
            hook: ArcSwapOption::const_empty(),
        })
    }

    /// Artifact key this slot belongs to.
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Store a hook. Later function entries observe it.
    pub fn set(&self, behavior: Behavior) {
        self.hook.store(Some(Arc::new(BehaviorCell(behavior))));
    }

    /// Clear the hook, restoring pass-through to the original.
    pub fn clear(&self) {
        self.hook.store(None);
    }

    /// Current hook, if one is installed.
    pub fn get(&self) -> Option<Behavior> {
        self.hook.load_full().map(|cell| Arc::clone(&cell.0))
    }

    /// Whether a hook is installed.
    pub fn is_set(&self) -> bool {
        self.hook.load().is_some()
    }

    /// The entry check the weaver plants: consult the slot, else run the
    /// original.
    pub fn weave(slot: Arc<OverrideSlot>, original: Behavior) -> Behavior {
        Arc::new(move |ctx, instance| match slot.get() {
            Some(hook) => hook(ctx, instance),
            None => original(ctx, instance),
        })
    }
}

/// Process-wide table of weaver-provisioned slots, keyed by artifact.
#[derive(Debug, Default)]
pub struct OverrideSlotTable {
    slots: RwLock<FxHashMap<String, Arc<OverrideSlot>>>,
}

impl OverrideSlotTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for an artifact, returning the existing one if the
    /// weaver already provisioned it.
    pub fn register(&self, artifact: impl Into<String>) -> Arc<OverrideSlot> {
        let artifact = artifact.into();
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(artifact.clone())
                .or_insert_with(|| OverrideSlot::new(artifact)),
        )
    }

    /// Look up the slot for an artifact.
    pub fn lookup(&self, artifact: &str) -> Option<Arc<OverrideSlot>> {
        self.slots.read().get(artifact).cloned()
    }

    /// Number of provisioned slots.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no slots are provisioned.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ApplyContext, Instance};

    fn marking(mark: &'static str) -> Behavior {
        Arc::new(move |_ctx, inst: &Arc<Instance>| {
            inst.set_property("last", mark);
            Ok(())
        })
    }

    #[test]
    fn register_is_idempotent() {
        let table = OverrideSlotTable::new();
        let a = table.register("view.lml");
        let b = table.register("view.lml");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookup_misses_for_unwoven_artifacts() {
        let table = OverrideSlotTable::new();
        assert!(table.lookup("styles.lml").is_none());
    }

    #[test]
    fn woven_entry_consults_slot_first() {
        let table = OverrideSlotTable::new();
        let slot = table.register("view.lml");
        let entry = OverrideSlot::weave(Arc::clone(&slot), marking("original"));

        let ctx = ApplyContext::new("view.lml", 0);
        let inst = Instance::new("panel");

        entry(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("original"));

        slot.set(marking("patched"));
        entry(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("patched"));

        slot.clear();
        entry(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("original"));
    }
}
