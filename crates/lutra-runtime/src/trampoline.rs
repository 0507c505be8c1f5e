//! Redirection trampoline

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::ApplyError;
use crate::instance::{ApplyContext, Behavior, Instance};

/// Sized cell so the behavior pointer can live in an [`ArcSwapOption`].
#[derive(Clone)]
pub(crate) struct BehaviorCell(pub(crate) Behavior);

impl std::fmt::Debug for BehaviorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BehaviorCell(..)")
    }
}

/// Out-of-line continuation of a hooked function.
///
/// Every invocation of a hooked function lands here. The trampoline re-reads
/// the live override pointer on each entry: when one is installed it runs
/// with the original arguments, otherwise control falls through to the
/// preserved original implementation. The entry instructions displaced by
/// the hook are kept verbatim so the original stays callable and the patch
/// is reversible byte-for-byte.
pub struct Trampoline {
    id: u32,
    override_hook: ArcSwapOption<BehaviorCell>,
    original: Behavior,
    preserved: Box<[u8]>,
    resume_offset: u32,
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("id", &self.id)
            .field("override_installed", &self.override_installed())
            .field("preserved_len", &self.preserved.len())
            .field("resume_offset", &self.resume_offset)
            .finish()
    }
}

impl Trampoline {
    /// Build a trampoline around the original behavior.
    ///
    /// `preserved` holds the entry instructions displaced by the hook;
    /// `resume_offset` is where the original stream continues after them.
    pub fn new(id: u32, original: Behavior, preserved: Vec<u8>, resume_offset: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            override_hook: ArcSwapOption::const_empty(),
            original,
            preserved: preserved.into_boxed_slice(),
            resume_offset,
        })
    }

    /// Trampoline id, matching the hook operand written at the entry.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Atomically install a new behavior. Later invocations observe it.
    pub fn set_override(&self, behavior: Behavior) {
        self.override_hook
            .store(Some(Arc::new(BehaviorCell(behavior))));
    }

    /// Atomically remove the installed behavior.
    pub fn clear_override(&self) {
        self.override_hook.store(None);
    }

    /// Whether an override is currently installed.
    pub fn override_installed(&self) -> bool {
        self.override_hook.load().is_some()
    }

    /// Run the function through the trampoline.
    pub fn enter(&self, ctx: &ApplyContext, instance: &Arc<Instance>) -> Result<(), ApplyError> {
        match self.override_hook.load_full() {
            Some(hook) => (hook.0)(ctx, instance),
            None => (self.original)(ctx, instance),
        }
    }

    /// Entry instructions displaced by the hook, verbatim.
    pub fn preserved(&self) -> &[u8] {
        &self.preserved
    }

    /// Offset where the original stream continues after the preserved span.
    pub fn resume_offset(&self) -> u32 {
        self.resume_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marking_behavior(mark: &'static str) -> Behavior {
        Arc::new(move |_ctx, inst: &Arc<Instance>| {
            inst.set_property("last", mark);
            Ok(())
        })
    }

    #[test]
    fn enter_falls_through_without_override() {
        let tramp = Trampoline::new(1, marking_behavior("original"), vec![0x01], 1);
        let ctx = ApplyContext::new("view.lml", 0);
        let inst = Instance::new("panel");

        tramp.enter(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("original"));
    }

    #[test]
    fn override_swap_is_observed_by_next_entry() {
        let tramp = Trampoline::new(1, marking_behavior("original"), vec![0x01], 1);
        let ctx = ApplyContext::new("view.lml", 1);
        let inst = Instance::new("panel");

        tramp.set_override(marking_behavior("patched"));
        assert!(tramp.override_installed());
        tramp.enter(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("patched"));

        tramp.clear_override();
        tramp.enter(&ctx, &inst).unwrap();
        assert_eq!(inst.property("last").as_deref(), Some("original"));
    }
}
