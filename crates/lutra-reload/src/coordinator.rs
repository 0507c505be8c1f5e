//! Reload session orchestration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use lutra_patch::{NameMatcher, PatchError, RedirectStrategy, locate_patch_points};
use lutra_runtime::{ApplyContext, Behavior, Instance};

use crate::artifact::ArtifactInfo;
use crate::collab::{CompileError, Dispatcher, DocumentCompiler};
use crate::context::{ArtifactCurrent, ArtifactState, HotReloadContext, Phase};
use crate::error::{ReloadError, Result};
use crate::events::{ReloadEvent, ReloadObserver};
use crate::session::{CancelFlag, ReloadSession};

/// How one reload session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// New behavior installed and propagated to the snapshot
    Applied {
        /// Instances the new behavior was applied to
        instances_updated: usize,
    },
    /// A newer edit superseded this session; its work was discarded
    Superseded,
    /// The artifact has no redirection strategy; nothing was changed
    Degraded,
}

/// Serializes reload sessions per artifact and pushes newly compiled
/// behavior into live instances.
///
/// File I/O and compilation run off the UI context, concurrently across
/// artifacts. The instance-mutation phase of any artifact is confined to the
/// dispatcher's thread, and at most one such phase per artifact is ever
/// active; a newer edit wins by cooperative cancellation.
pub struct ReloadCoordinator {
    context: Arc<HotReloadContext>,
    compiler: Arc<dyn DocumentCompiler>,
    dispatcher: Arc<dyn Dispatcher>,
    observer: Arc<dyn ReloadObserver>,
}

impl ReloadCoordinator {
    /// Wire a coordinator to its collaborators.
    pub fn new(
        context: Arc<HotReloadContext>,
        compiler: Arc<dyn DocumentCompiler>,
        dispatcher: Arc<dyn Dispatcher>,
        observer: Arc<dyn ReloadObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            compiler,
            dispatcher,
            observer,
        })
    }

    /// The context owning all reload registries.
    pub fn context(&self) -> &Arc<HotReloadContext> {
        &self.context
    }

    /// Entry point for watcher change events. Fire-and-forget: the session
    /// runs in the background and a newer event for the same artifact
    /// supersedes it.
    pub fn on_source_changed(self: &Arc<Self>, path: impl Into<PathBuf>) {
        let coordinator = Arc::clone(self);
        let path = path.into();
        tokio::spawn(async move {
            match coordinator.reload_now(&path).await {
                Ok(outcome) => {
                    debug!(?outcome, path = %path.display(), "reload session finished");
                }
                Err(err) => {
                    // Noteworthy failures were already reported through the
                    // observer inside the session.
                    debug!(%err, path = %path.display(), "reload session ended");
                }
            }
        });
    }

    /// Run one reload session for the artifact owning `path` and wait for
    /// its outcome.
    pub async fn reload_now(&self, path: &Path) -> Result<ReloadOutcome> {
        let state = self
            .context
            .artifact_for_source(path)
            .ok_or_else(|| ReloadError::UnknownSource(path.to_path_buf()))?;
        let info = Arc::clone(state.info());
        let key = info.key().clone();

        // Begin the session, superseding any in-flight one (last edit wins).
        let cancel = CancelFlag::new();
        {
            let mut current = state.current.lock();
            if current
                .strategy
                .as_ref()
                .is_some_and(RedirectStrategy::is_unsupported)
            {
                // Degraded was logged once when the strategy was decided;
                // later edits are dropped without noise.
                return Ok(ReloadOutcome::Degraded);
            }
            if let Phase::Reloading(flag) = &current.phase {
                flag.cancel();
            }
            current.phase = Phase::Reloading(cancel.clone());
        }
        self.context.record_session_started();

        // Return the artifact to Idle when this session is still the
        // current one, on every exit path.
        let phase_state = Arc::clone(&state);
        let phase_flag = cancel.clone();
        let _phase_guard = scopeguard::guard((), move |_| {
            let mut current = phase_state.current.lock();
            if let Phase::Reloading(flag) = &current.phase
                && flag.same(&phase_flag)
            {
                current.phase = Phase::Idle;
            }
        });

        // Worker phase, off the UI context: read the changed text.
        if cancel.is_cancelled() {
            self.context.record_session_superseded();
            return Ok(ReloadOutcome::Superseded);
        }
        let source = tokio::fs::read_to_string(info.source_path()).await?;

        if cancel.is_cancelled() {
            self.context.record_session_superseded();
            return Ok(ReloadOutcome::Superseded);
        }
        let compiler = Arc::clone(&self.compiler);
        let compile_key = key.clone();
        let compile_result =
            match tokio::task::spawn_blocking(move || compiler.compile(&source, &compile_key))
                .await
            {
                Ok(result) => result,
                Err(join_err) => Err(CompileError::new(format!(
                    "compiler task panicked: {join_err}"
                ))),
            };
        let compiled = match compile_result {
            Ok(compiled) => compiled,
            Err(err) => {
                self.observer.event(&ReloadEvent::CompileFailure {
                    artifact: key.clone(),
                    message: err.message.clone(),
                });
                self.context.record_compile_failure();
                return Err(err.into());
            }
        };

        // Snapshot the live set. An empty snapshot still installs so future
        // instances pick the behavior up.
        let snapshot: Vec<Arc<Instance>> = info.instances().iter_alive().collect();
        let session = ReloadSession {
            artifact: key,
            cancel,
            compiled,
            snapshot,
        };

        // Marshal onto the UI-affinity context, the session's only
        // suspension point.
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let ui = UiPhase {
            context: Arc::clone(&self.context),
            observer: Arc::clone(&self.observer),
            state,
            session,
        };
        self.dispatcher.post(Box::new(move || {
            let _ = done_tx.send(ui.run());
        }));
        done_rx.await.map_err(|_| ReloadError::DispatcherGone)?
    }
}

/// Instance-mutation phase of a session; runs on the dispatcher's thread.
struct UiPhase {
    context: Arc<HotReloadContext>,
    observer: Arc<dyn ReloadObserver>,
    state: Arc<ArtifactState>,
    session: ReloadSession,
}

impl UiPhase {
    fn run(self) -> Result<ReloadOutcome> {
        let UiPhase {
            context,
            observer,
            state,
            session,
        } = self;
        let info = Arc::clone(state.info());
        let key = session.artifact.clone();

        if session.cancel.is_cancelled() {
            context.record_session_superseded();
            return Ok(ReloadOutcome::Superseded);
        }

        // The first snapshot instance is the template: it drives resolution
        // of compile-time bindings into an executable behavior.
        let template = session.snapshot.first();
        let behavior = match session.compiled.bind(template) {
            Ok(behavior) => behavior,
            Err(err) => {
                observer.event(&ReloadEvent::CompileFailure {
                    artifact: key.clone(),
                    message: err.message.clone(),
                });
                context.record_compile_failure();
                return Err(err.into());
            }
        };

        // Install through the artifact's strategy, choosing one on first
        // use. Generation only moves once an install landed.
        let generation = {
            let mut current = state.current.lock();
            match install_behavior(&context, observer.as_ref(), &info, &mut current, behavior)? {
                InstallResult::Installed => {}
                InstallResult::Degraded => return Ok(ReloadOutcome::Degraded),
            }
            current.generation += 1;
            current.generation
        };

        // Propagate through the normal dispatch path: the hook routes every
        // invocation to the just-installed behavior. Template first, then
        // the rest of the snapshot, cancellation checked between instances
        // and per-instance failures isolated.
        let ctx = ApplyContext::new(key.as_str(), generation);
        let mut updated = 0usize;
        for instance in &session.snapshot {
            if session.cancel.is_cancelled() {
                context.record_session_superseded();
                return Ok(ReloadOutcome::Superseded);
            }
            match info.apply_fn().invoke(&ctx, instance) {
                Ok(()) => updated += 1,
                Err(err) => {
                    observer.event(&ReloadEvent::InstanceUpdateFailure {
                        artifact: key.clone(),
                        instance: instance.id(),
                        message: err.to_string(),
                    });
                    context.record_instance_failure();
                }
            }
        }

        context.record_session_applied(updated as u64);
        Ok(ReloadOutcome::Applied {
            instances_updated: updated,
        })
    }
}

enum InstallResult {
    Installed,
    Degraded,
}

/// Route `behavior` into the artifact's redirection channel.
///
/// A previously chosen strategy is a single pointer swap. The first install
/// probes: direct patching needs a located call site and platform support;
/// otherwise the cooperative override slot; otherwise the artifact degrades
/// permanently, reported exactly once.
fn install_behavior(
    context: &HotReloadContext,
    observer: &dyn ReloadObserver,
    info: &Arc<ArtifactInfo>,
    current: &mut ArtifactCurrent,
    behavior: Behavior,
) -> Result<InstallResult> {
    if let Some(strategy) = &current.strategy {
        return match strategy {
            RedirectStrategy::DirectPatch(injection)
            | RedirectStrategy::OverrideField(injection) => {
                injection.update(behavior)?;
                Ok(InstallResult::Installed)
            }
            RedirectStrategy::Unsupported => Ok(InstallResult::Degraded),
        };
    }

    let direct = {
        let body = info.build_fn().body();
        let points = locate_patch_points(&body, info.apply_symbol(), &NameMatcher);
        if points.is_empty() {
            Err(PatchError::PatchPointNotFound(
                info.apply_symbol().to_string(),
            ))
        } else {
            context.injector().install(
                info.apply_fn(),
                behavior.clone(),
                context.config().direct_patch_enabled,
            )
        }
    };

    match direct {
        Ok(injection) => {
            current.strategy = Some(RedirectStrategy::DirectPatch(injection));
            Ok(InstallResult::Installed)
        }
        Err(err @ (PatchError::UnsupportedPlatform(_) | PatchError::PatchPointNotFound(_))) => {
            observer.event(&ReloadEvent::UnsupportedPlatform {
                artifact: info.key().clone(),
                reason: err.to_string(),
            });
            match context.fallback().install(info.key().as_str(), behavior) {
                Ok(injection) => {
                    current.strategy = Some(RedirectStrategy::OverrideField(injection));
                    Ok(InstallResult::Installed)
                }
                Err(PatchError::NoCooperativeSlot(_)) => {
                    current.strategy = Some(RedirectStrategy::Unsupported);
                    if !current.degraded_logged {
                        current.degraded_logged = true;
                        observer.event(&ReloadEvent::Degraded {
                            artifact: info.key().clone(),
                        });
                        context.record_degraded();
                    }
                    Ok(InstallResult::Degraded)
                }
                Err(other) => Err(other.into()),
            }
        }
        Err(other) => Err(other.into()),
    }
}
