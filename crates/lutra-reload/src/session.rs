//! Reload sessions and cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lutra_runtime::Instance;

use crate::artifact::ArtifactKey;
use crate::collab::CompiledDocument;

/// Cooperative cancellation flag for one reload session.
///
/// Checked at defined points only: before reading the source, before
/// compiling, and between instance updates. Never interrupts work
/// mid-instruction.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session superseded.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the session has been superseded.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Whether two handles observe the same flag.
    pub fn same(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One in-flight reload for one artifact.
///
/// Holds the freshly compiled document, the cancellation flag, and the
/// snapshot of instances to update. Dropped at session end, whether success,
/// failure, or supersession.
pub(crate) struct ReloadSession {
    pub(crate) artifact: ArtifactKey,
    pub(crate) cancel: CancelFlag,
    pub(crate) compiled: Arc<dyn CompiledDocument>,
    pub(crate) snapshot: Vec<Arc<Instance>>,
}
