//! Structured reload events and the observer sink

use tracing::{debug, warn};

use lutra_runtime::InstanceId;

use crate::artifact::ArtifactKey;

/// Events the coordinator reports to the host's logging sink.
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    /// Direct entry patching is unavailable for the artifact's target
    UnsupportedPlatform {
        /// Affected artifact
        artifact: ArtifactKey,
        /// Probe verdict text
        reason: String,
    },
    /// The external compiler rejected the changed source
    CompileFailure {
        /// Affected artifact
        artifact: ArtifactKey,
        /// Compiler diagnostic text
        message: String,
    },
    /// No redirection strategy is available; the artifact keeps its baseline
    /// behavior for the process lifetime
    Degraded {
        /// Affected artifact
        artifact: ArtifactKey,
    },
    /// Applying new behavior to one instance failed; the rest of the
    /// snapshot was still processed
    InstanceUpdateFailure {
        /// Affected artifact
        artifact: ArtifactKey,
        /// Instance that rejected the update
        instance: InstanceId,
        /// Failure text
        message: String,
    },
}

/// Fire-and-forget sink for reload events.
///
/// Implementations must not panic back into the coordinator; an event is
/// advisory and its loss never changes reload behavior.
pub trait ReloadObserver: Send + Sync {
    /// Receive one event.
    fn event(&self, event: &ReloadEvent);
}

/// Default observer routing events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReloadObserver for TracingObserver {
    fn event(&self, event: &ReloadEvent) {
        match event {
            ReloadEvent::UnsupportedPlatform { artifact, reason } => {
                debug!(%artifact, %reason, "direct patch unavailable, trying override slot");
            }
            ReloadEvent::CompileFailure { artifact, message } => {
                warn!(%artifact, %message, "reload aborted, previous behavior retained");
            }
            ReloadEvent::Degraded { artifact } => {
                warn!(%artifact, "no redirection strategy available; hot reload disabled");
            }
            ReloadEvent::InstanceUpdateFailure {
                artifact,
                instance,
                message,
            } => {
                warn!(%artifact, instance, %message, "instance update failed; continuing");
            }
        }
    }
}
