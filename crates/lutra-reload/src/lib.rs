//! # Lutra Reload
//!
//! Reload orchestration for the Lutra hot-reload engine. A change to a
//! declarative source document drives the [`ReloadCoordinator`]: it reads
//! the new text off the UI context, hands it to the external compiler,
//! installs the freshly bound behavior through whichever redirection
//! strategy the artifact supports, and pushes it into every live instance
//! on the host's UI-affinity dispatcher.
//!
//! ## Guarantees
//!
//! - At most one instance-mutation phase per artifact is ever active
//! - A newer edit always wins over an in-flight one, via cooperative
//!   cancellation checked at defined points only
//! - No failure in the reload taxonomy crosses the host boundary; the worst
//!   outcome is a degraded artifact serving its last-known-good behavior

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod artifact;
pub mod collab;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod session;

pub use artifact::{ArtifactInfo, ArtifactKey};
pub use collab::{
    ChannelDispatcher, CompileError, CompiledDocument, Dispatcher, DocumentCompiler,
    InlineDispatcher,
};
pub use config::ReloadConfig;
pub use context::{ArtifactState, HotReloadContext, ReloadStats};
pub use coordinator::{ReloadCoordinator, ReloadOutcome};
pub use error::ReloadError;
pub use events::{ReloadEvent, ReloadObserver, TracingObserver};
pub use session::CancelFlag;
