//! Cooperative override-slot fallback channel

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use lutra_runtime::{Behavior, OverrideSlotTable};

use crate::error::{PatchError, Result};
use crate::injector::Injection;

/// Redirection through weaver-provisioned override slots.
///
/// Used when direct entry patching reports an unsupported platform. Only
/// artifacts the external build step instrumented with a slot can take this
/// path; for the rest the caller marks the artifact degraded.
pub struct FallbackOverrideChannel {
    slots: Arc<OverrideSlotTable>,
    active: Mutex<FxHashMap<String, Arc<Injection>>>,
}

impl FallbackOverrideChannel {
    /// Create a channel over the process's slot table.
    pub fn new(slots: Arc<OverrideSlotTable>) -> Self {
        Self {
            slots,
            active: Mutex::new(FxHashMap::default()),
        }
    }

    /// Install `hook` into the artifact's override slot.
    ///
    /// Returns the existing injection if one is already active for the
    /// artifact. Fails with [`PatchError::NoCooperativeSlot`] when the
    /// weaver never provisioned one.
    pub fn install(&self, artifact: &str, hook: Behavior) -> Result<Arc<Injection>> {
        let mut active = self.active.lock();
        if let Some(existing) = active.get(artifact)
            && existing.is_active()
        {
            return Ok(Arc::clone(existing));
        }

        let slot = self
            .slots
            .lookup(artifact)
            .ok_or_else(|| PatchError::NoCooperativeSlot(artifact.to_string()))?;

        slot.set(hook);
        let injection = Arc::new(Injection::override_field(slot));
        active.insert(artifact.to_string(), Arc::clone(&injection));
        debug!(artifact, "override slot hook installed");
        Ok(injection)
    }

    /// Active fallback injection for an artifact, if any.
    pub fn active_injection(&self, artifact: &str) -> Option<Arc<Injection>> {
        self.active
            .lock()
            .get(artifact)
            .filter(|injection| injection.is_active())
            .cloned()
    }
}
