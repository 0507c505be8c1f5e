//! External collaborator interfaces
//!
//! The document compiler, the host's UI-affinity dispatcher, and the type
//! adapters behind them are not part of this engine; the coordinator only
//! sees the narrow contracts defined here.

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::warn;

use lutra_runtime::{Behavior, Instance};

use crate::artifact::ArtifactKey;

/// Failure reported by the external document compiler.
#[derive(Debug, Clone, Error)]
#[error("compile failed: {message}")]
pub struct CompileError {
    /// Compiler diagnostic text
    pub message: String,
}

impl CompileError {
    /// Create an error from diagnostic text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Output of one successful compilation, not yet bound to a template.
pub trait CompiledDocument: Send + Sync {
    /// Resolve compile-time bindings into an executable behavior.
    ///
    /// The template is the first live instance of the artifact when one
    /// exists; with no live instances the document must bind standalone so
    /// future instances pick the behavior up on first invoke.
    fn bind(&self, template: Option<&Arc<Instance>>) -> Result<Behavior, CompileError>;
}

/// External compiler turning document text into new behavior.
pub trait DocumentCompiler: Send + Sync {
    /// Compile `source` for the given artifact.
    fn compile(
        &self,
        source: &str,
        artifact: &ArtifactKey,
    ) -> Result<Arc<dyn CompiledDocument>, CompileError>;
}

/// The host's single-threaded UI-affinity execution context.
///
/// Submission order must be preserved for tasks targeting the same artifact;
/// the coordinator relies on it for last-edit-wins ordering.
pub trait Dispatcher: Send + Sync {
    /// Schedule a task onto the UI-affinity thread.
    fn post(&self, task: Box<dyn FnOnce() + Send>);
}

type Task = Box<dyn FnOnce() + Send>;

/// FIFO dispatcher backed by a dedicated thread.
///
/// Stands in for the host's UI thread in processes that do not bring their
/// own event loop.
pub struct ChannelDispatcher {
    tx: Option<crossbeam_channel::Sender<Task>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ChannelDispatcher {
    /// Start the dispatcher thread.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let worker = thread::Builder::new()
            .name("lutra-ui".to_string())
            .spawn(move || {
                for task in rx {
                    task();
                }
            })
            .ok();
        if worker.is_none() {
            warn!("failed to spawn dispatcher thread; tasks will be dropped");
        }
        Self {
            tx: Some(tx),
            worker,
        }
    }
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for ChannelDispatcher {
    fn post(&self, task: Task) {
        if let Some(tx) = &self.tx
            && tx.send(task).is_err()
        {
            warn!("dispatcher thread gone; task dropped");
        }
    }
}

impl Drop for ChannelDispatcher {
    fn drop(&mut self) {
        // Disconnect first so the worker loop drains and exits.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Dispatcher that runs tasks immediately on the calling thread.
///
/// For hosts without an event loop and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn post(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn channel_dispatcher_preserves_submission_order() {
        let dispatcher = ChannelDispatcher::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            dispatcher.post(Box::new(move || {
                seen.lock().push(i);
            }));
        }
        dispatcher.post(Box::new(move || {
            let _ = done_tx.send(());
        }));

        done_rx.recv().unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn inline_dispatcher_runs_synchronously() {
        let shared = Arc::new(AtomicUsize::new(0));
        let cloned = Arc::clone(&shared);
        InlineDispatcher.post(Box::new(move || {
            cloned.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(shared.load(Ordering::SeqCst), 1);
    }
}
