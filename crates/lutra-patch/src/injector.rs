//! Direct entry patching with rollback

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use lutra_bytecode::Opcode;
use lutra_runtime::{Behavior, CompiledFunction, FunctionId, OverrideSlot, Trampoline};

use crate::error::{PatchError, Result};
use crate::probe::{HOOK_SPAN, probe_entry};
use crate::strategy::StrategyKind;

// Injection lifecycle: Installing -> Installed -> Disposed (terminal).
// The Installing phase lives in the injector's in-progress set; an Injection
// value only exists once installation completed.
const STATE_INSTALLED: u8 = 1;
const STATE_DISPOSED: u8 = 2;

enum Channel {
    Direct {
        target: Arc<CompiledFunction>,
        backup: Box<[u8]>,
        trampoline: Arc<Trampoline>,
    },
    OverrideField {
        slot: Arc<OverrideSlot>,
    },
}

/// An active redirection in front of one target function.
///
/// At most one active injection exists per target; requesting another while
/// one is active hands back the existing one. Disposal restores the target
/// to its pre-installation behavior and is idempotent and terminal.
pub struct Injection {
    state: AtomicU8,
    channel: Channel,
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injection")
            .field("strategy", &self.strategy())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Injection {
    fn direct(target: Arc<CompiledFunction>, backup: Box<[u8]>, trampoline: Arc<Trampoline>) -> Self {
        Self {
            state: AtomicU8::new(STATE_INSTALLED),
            channel: Channel::Direct {
                target,
                backup,
                trampoline,
            },
        }
    }

    pub(crate) fn override_field(slot: Arc<OverrideSlot>) -> Self {
        Self {
            state: AtomicU8::new(STATE_INSTALLED),
            channel: Channel::OverrideField { slot },
        }
    }

    /// Which redirection channel this injection drives.
    pub fn strategy(&self) -> StrategyKind {
        match self.channel {
            Channel::Direct { .. } => StrategyKind::DirectPatch,
            Channel::OverrideField { .. } => StrategyKind::OverrideField,
        }
    }

    /// Whether the redirection is installed and not yet disposed.
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_INSTALLED
    }

    /// Swap the currently-installed behavior.
    ///
    /// A single atomic pointer store: the entry hook re-reads the pointer
    /// on every invocation, so no re-patching happens here.
    pub fn update(&self, behavior: Behavior) -> Result<()> {
        if !self.is_active() {
            return Err(PatchError::Disposed);
        }
        match &self.channel {
            Channel::Direct { trampoline, .. } => trampoline.set_override(behavior),
            Channel::OverrideField { slot } => slot.set(behavior),
        }
        Ok(())
    }

    /// Remove the redirection, restoring the pre-installation behavior.
    ///
    /// Idempotent; a second call is a no-op.
    pub fn dispose(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_INSTALLED,
                STATE_DISPOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        match &self.channel {
            Channel::Direct {
                target,
                backup,
                trampoline,
            } => {
                // Clear the override first so an invocation that already
                // decoded the hook falls through to the original, then put
                // the entry bytes back. The trampoline stays attached: the
                // restored entry no longer routes to it, and detaching would
                // strand invocations mid-flight.
                trampoline.clear_override();
                target.write_entry(backup)?;
                debug!(function = target.name(), "entry hook removed");
            }
            Channel::OverrideField { slot } => {
                slot.clear();
                debug!(artifact = slot.artifact(), "override slot cleared");
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ActiveState {
    installed: FxHashMap<FunctionId, Arc<Injection>>,
    installing: FxHashSet<FunctionId>,
}

/// Installs and tracks direct entry patches.
///
/// One injector instance is the process-wide authority for which functions
/// carry an active injection.
pub struct FunctionInjector {
    active: Mutex<ActiveState>,
    next_trampoline_id: AtomicU32,
}

impl Default for FunctionInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionInjector {
    /// Create an injector with no active installations.
    pub fn new() -> Self {
        Self {
            active: Mutex::new(ActiveState::default()),
            next_trampoline_id: AtomicU32::new(1),
        }
    }

    /// Install a redirection hook in front of `target`.
    ///
    /// Capability-checks first and mutates nothing on failure. An active
    /// injection for the same target is returned as-is without touching the
    /// function a second time.
    pub fn install(
        &self,
        target: &Arc<CompiledFunction>,
        hook: Behavior,
        direct_patch_enabled: bool,
    ) -> Result<Arc<Injection>> {
        let id = target.id();
        {
            let mut state = self.active.lock();
            if let Some(existing) = state.installed.get(&id)
                && existing.is_active()
            {
                return Ok(Arc::clone(existing));
            }
            if !state.installing.insert(id) {
                return Err(PatchError::InstallInProgress);
            }
        }

        let result = self.install_fresh(target, hook, direct_patch_enabled);

        let mut state = self.active.lock();
        state.installing.remove(&id);
        if let Ok(injection) = &result {
            state.installed.insert(id, Arc::clone(injection));
        }
        result
    }

    fn install_fresh(
        &self,
        target: &Arc<CompiledFunction>,
        hook: Behavior,
        direct_patch_enabled: bool,
    ) -> Result<Arc<Injection>> {
        let plan =
            probe_entry(target, direct_patch_enabled).map_err(PatchError::UnsupportedPlatform)?;

        let backup = target.entry_bytes(plan.preserved_len);
        let trampoline_id = self.next_trampoline_id.fetch_add(1, Ordering::Relaxed);
        let trampoline = Trampoline::new(
            trampoline_id,
            target.baseline(),
            backup.clone(),
            plan.preserved_len as u32,
        );
        trampoline.set_override(hook);

        // Attach before writing the hook so no invocation can decode a
        // hooked entry with nothing behind it.
        target.attach_trampoline(Arc::clone(&trampoline));
        let patch = hook_patch(trampoline_id, plan.preserved_len);
        if let Err(err) = target.write_entry(&patch) {
            target.detach_trampoline();
            return Err(err.into());
        }

        debug!(
            function = target.name(),
            trampoline = trampoline_id,
            span = plan.preserved_len,
            "entry hook installed"
        );

        Ok(Arc::new(Injection::direct(
            Arc::clone(target),
            backup.into_boxed_slice(),
            trampoline,
        )))
    }

    /// Active injection for a target, if one is installed.
    pub fn active_injection(&self, id: FunctionId) -> Option<Arc<Injection>> {
        self.active
            .lock()
            .installed
            .get(&id)
            .filter(|injection| injection.is_active())
            .cloned()
    }
}

/// Hook instruction followed by Nop padding out to the displaced span.
fn hook_patch(trampoline_id: u32, span: usize) -> Vec<u8> {
    let mut patch = Vec::with_capacity(span);
    let (opcode, len) = Opcode::Hook.encode();
    patch.extend_from_slice(&opcode[..len]);
    patch.extend_from_slice(&trampoline_id.to_le_bytes());
    patch.resize(span, {
        let (nop, _) = Opcode::Nop.encode();
        nop[0]
    });
    debug_assert_eq!(patch.len(), span);
    debug_assert!(span >= HOOK_SPAN);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    use lutra_runtime::{ApplyContext, Instance};

    fn marking(mark: &'static str) -> Behavior {
        Arc::new(move |_ctx, inst: &Arc<Instance>| {
            inst.set_property("last", mark);
            Ok(())
        })
    }

    fn patchable_body() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(0x02); // LoadConst
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0x11); // SetProp
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(0x32); // Ret
        bytes
    }

    fn target() -> Arc<CompiledFunction> {
        CompiledFunction::builder()
            .name("view_apply")
            .baseline(marking("baseline"))
            .installed(patchable_body())
            .build()
    }

    fn run(func: &Arc<CompiledFunction>) -> Option<String> {
        let inst = Instance::new("panel");
        func.invoke(&ApplyContext::new("view.lml", 0), &inst).unwrap();
        inst.property("last")
    }

    #[test]
    fn install_redirects_and_dispose_restores_byte_for_byte() {
        let injector = FunctionInjector::new();
        let func = target();
        let before = func.body().bytes().to_vec();
        assert_eq!(run(&func).as_deref(), Some("baseline"));

        let injection = injector.install(&func, marking("hooked"), true).unwrap();
        assert_eq!(run(&func).as_deref(), Some("hooked"));
        assert_ne!(func.body().bytes(), before.as_slice());

        injection.dispose().unwrap();
        assert_eq!(func.body().bytes(), before.as_slice());
        assert_eq!(run(&func).as_deref(), Some("baseline"));
    }

    #[test]
    fn second_install_returns_existing_injection() {
        let injector = FunctionInjector::new();
        let func = target();

        let first = injector.install(&func, marking("one"), true).unwrap();
        let bytes_after_first = func.body().bytes().to_vec();
        let second = injector.install(&func, marking("two"), true).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // No second mutation: the entry still carries the first hook and the
        // first behavior.
        assert_eq!(func.body().bytes(), bytes_after_first.as_slice());
        assert_eq!(run(&func).as_deref(), Some("one"));
    }

    #[test]
    fn update_swaps_behavior_without_repatching() {
        let injector = FunctionInjector::new();
        let func = target();

        let injection = injector.install(&func, marking("v1"), true).unwrap();
        let bytes_after_install = func.body().bytes().to_vec();

        injection.update(marking("v2")).unwrap();
        assert_eq!(run(&func).as_deref(), Some("v2"));
        assert_eq!(func.body().bytes(), bytes_after_install.as_slice());
    }

    #[test]
    fn unsupported_probe_leaves_target_untouched() {
        let injector = FunctionInjector::new();
        let func = target();
        let before = func.body().bytes().to_vec();

        let err = injector.install(&func, marking("hook"), false).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedPlatform(_)));
        assert_eq!(func.body().bytes(), before.as_slice());
        assert!(func.trampoline().is_none());
    }

    #[test]
    fn dispose_is_idempotent_and_terminal() {
        let injector = FunctionInjector::new();
        let func = target();

        let injection = injector.install(&func, marking("hook"), true).unwrap();
        injection.dispose().unwrap();
        injection.dispose().unwrap();
        assert!(!injection.is_active());
        assert!(matches!(
            injection.update(marking("late")).unwrap_err(),
            PatchError::Disposed
        ));
    }

    #[test]
    fn install_after_dispose_creates_fresh_injection() {
        let injector = FunctionInjector::new();
        let func = target();

        let first = injector.install(&func, marking("one"), true).unwrap();
        first.dispose().unwrap();

        let second = injector.install(&func, marking("two"), true).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(run(&func).as_deref(), Some("two"));
    }

    #[test]
    fn hook_patch_pads_to_span() {
        let patch = hook_patch(7, 8);
        assert_eq!(patch.len(), 8);
        let (hook, _) = Opcode::Hook.encode();
        assert_eq!(&patch[..2], &hook[..2]);
        assert_eq!(&patch[2..6], &7u32.to_le_bytes());
        let (nop, _) = Opcode::Nop.encode();
        assert_eq!(&patch[6..], &[nop[0], nop[0]]);
    }
}
