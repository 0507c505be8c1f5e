//! Process-scoped hot-reload context

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use lutra_patch::{FallbackOverrideChannel, FunctionInjector, RedirectStrategy};
use lutra_runtime::OverrideSlotTable;

use crate::artifact::{ArtifactInfo, ArtifactKey};
use crate::config::ReloadConfig;
use crate::session::CancelFlag;

/// Snapshot of reload counters for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReloadStats {
    /// Sessions started in response to change events
    pub sessions_started: u64,
    /// Sessions that installed and propagated new behavior
    pub sessions_applied: u64,
    /// Sessions cancelled by a newer edit
    pub sessions_superseded: u64,
    /// Sessions aborted by a compiler rejection
    pub compile_failures: u64,
    /// Individual instances updated across all sessions
    pub instances_updated: u64,
    /// Individual instance updates that failed and were skipped
    pub instance_failures: u64,
    /// Artifacts permanently degraded to baseline behavior
    pub degraded_artifacts: u64,
}

#[derive(Debug, Default)]
struct StatsCells {
    sessions_started: AtomicU64,
    sessions_applied: AtomicU64,
    sessions_superseded: AtomicU64,
    compile_failures: AtomicU64,
    instances_updated: AtomicU64,
    instance_failures: AtomicU64,
    degraded_artifacts: AtomicU64,
}

/// Reload phase of one artifact.
#[derive(Debug)]
pub(crate) enum Phase {
    Idle,
    Reloading(CancelFlag),
}

pub(crate) struct ArtifactCurrent {
    pub(crate) phase: Phase,
    /// Chosen once by capability probing; `None` until the first install.
    pub(crate) strategy: Option<RedirectStrategy>,
    pub(crate) degraded_logged: bool,
    /// Installed-behavior generation; zero is the baseline.
    pub(crate) generation: u64,
}

/// Mutable per-artifact reload state plus its immutable metadata.
pub struct ArtifactState {
    info: Arc<ArtifactInfo>,
    pub(crate) current: Mutex<ArtifactCurrent>,
}

impl ArtifactState {
    fn new(info: ArtifactInfo) -> Arc<Self> {
        Arc::new(Self {
            info: Arc::new(info),
            current: Mutex::new(ArtifactCurrent {
                phase: Phase::Idle,
                strategy: None,
                degraded_logged: false,
                generation: 0,
            }),
        })
    }

    /// Immutable artifact metadata.
    pub fn info(&self) -> &Arc<ArtifactInfo> {
        &self.info
    }

    /// Whether the artifact is permanently stuck on baseline behavior.
    pub fn is_degraded(&self) -> bool {
        self.current
            .lock()
            .strategy
            .as_ref()
            .is_some_and(RedirectStrategy::is_unsupported)
    }

    /// Installed-behavior generation; zero until the first reload lands.
    pub fn generation(&self) -> u64 {
        self.current.lock().generation
    }
}

/// Owner of every process-wide reload registry.
///
/// All shared maps (artifacts, active injections, override slots, live
/// instance sets) hang off this one explicitly constructed object, which is
/// handed to the coordinator rather than living in ambient globals.
/// `teardown` disposes every active redirection.
pub struct HotReloadContext {
    config: ReloadConfig,
    injector: FunctionInjector,
    fallback: FallbackOverrideChannel,
    override_slots: Arc<OverrideSlotTable>,
    artifacts: DashMap<ArtifactKey, Arc<ArtifactState>>,
    by_path: DashMap<PathBuf, ArtifactKey>,
    stats: StatsCells,
}

impl HotReloadContext {
    /// Create a context with no registered artifacts.
    pub fn new(config: ReloadConfig) -> Arc<Self> {
        let override_slots = Arc::new(OverrideSlotTable::new());
        Arc::new(Self {
            config,
            injector: FunctionInjector::new(),
            fallback: FallbackOverrideChannel::new(Arc::clone(&override_slots)),
            override_slots,
            artifacts: DashMap::new(),
            by_path: DashMap::new(),
            stats: StatsCells::default(),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> ReloadConfig {
        self.config
    }

    /// Slot table the external weaver provisions at startup.
    pub fn override_slots(&self) -> &Arc<OverrideSlotTable> {
        &self.override_slots
    }

    pub(crate) fn injector(&self) -> &FunctionInjector {
        &self.injector
    }

    pub(crate) fn fallback(&self) -> &FallbackOverrideChannel {
        &self.fallback
    }

    /// Register an artifact discovered at process start.
    ///
    /// Registration is idempotent per key; the existing state is returned
    /// for a key seen before.
    pub fn register_artifact(&self, info: ArtifactInfo) -> Arc<ArtifactState> {
        let key = info.key().clone();
        let path = info.source_path().to_path_buf();
        let state = self
            .artifacts
            .entry(key.clone())
            .or_insert_with(|| ArtifactState::new(info))
            .clone();
        self.by_path.insert(path, key);
        state
    }

    /// Look up an artifact by its stable key.
    pub fn artifact(&self, key: &ArtifactKey) -> Option<Arc<ArtifactState>> {
        self.artifacts.get(key).map(|entry| Arc::clone(&entry))
    }

    /// Look up the artifact owning a source path.
    pub fn artifact_for_source(&self, path: &Path) -> Option<Arc<ArtifactState>> {
        let key = self.by_path.get(path)?.clone();
        self.artifact(&key)
    }

    /// Number of registered artifacts.
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Snapshot the reload counters.
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            sessions_started: self.stats.sessions_started.load(Ordering::Relaxed),
            sessions_applied: self.stats.sessions_applied.load(Ordering::Relaxed),
            sessions_superseded: self.stats.sessions_superseded.load(Ordering::Relaxed),
            compile_failures: self.stats.compile_failures.load(Ordering::Relaxed),
            instances_updated: self.stats.instances_updated.load(Ordering::Relaxed),
            instance_failures: self.stats.instance_failures.load(Ordering::Relaxed),
            degraded_artifacts: self.stats.degraded_artifacts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_session_started(&self) {
        self.stats.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_applied(&self, instances: u64) {
        self.stats.sessions_applied.fetch_add(1, Ordering::Relaxed);
        self.stats
            .instances_updated
            .fetch_add(instances, Ordering::Relaxed);
    }

    pub(crate) fn record_session_superseded(&self) {
        self.stats
            .sessions_superseded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compile_failure(&self) {
        self.stats.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_instance_failure(&self) {
        self.stats.instance_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.stats.degraded_artifacts.fetch_add(1, Ordering::Relaxed);
    }

    /// Dispose every active redirection and drop all registrations.
    ///
    /// After teardown each patched function is back to its pre-install
    /// behavior. The context can be dropped afterwards.
    pub fn teardown(&self) {
        for entry in self.artifacts.iter() {
            let mut current = entry.value().current.lock();
            if let Phase::Reloading(flag) = &current.phase {
                flag.cancel();
            }
            current.phase = Phase::Idle;
            if let Some(strategy) = current.strategy.take()
                && let Some(injection) = strategy.injection()
                && let Err(err) = injection.dispose()
            {
                debug!(artifact = %entry.key(), %err, "dispose during teardown failed");
            }
        }
        self.artifacts.clear();
        self.by_path.clear();
    }
}
