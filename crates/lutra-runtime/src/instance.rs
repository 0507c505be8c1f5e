//! Live view instances and the behavior callable type

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::ApplyError;

/// Process-unique instance id.
pub type InstanceId = u64;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A live host object built from a declarative document.
///
/// Instances carry a property bag mutated by apply behaviors. The engine
/// never owns instances strongly: hosts keep them alive, the registry
/// observes them weakly.
#[derive(Debug)]
pub struct Instance {
    id: InstanceId,
    element: String,
    properties: RwLock<FxHashMap<String, String>>,
}

impl Instance {
    /// Create a new instance of the given element type.
    pub fn new(element: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            element: element.into(),
            properties: RwLock::new(FxHashMap::default()),
        })
    }

    /// Process-unique id.
    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Element type name.
    #[inline]
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Write a property value.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(name.into(), value.into());
    }

    /// Read a property value.
    pub fn property(&self, name: &str) -> Option<String> {
        self.properties.read().get(name).cloned()
    }
}

/// State threaded through one behavior application.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    artifact: String,
    generation: u64,
}

impl ApplyContext {
    /// Create a context for one application pass.
    ///
    /// `generation` counts installed behaviors for the artifact, starting at
    /// zero for the baseline.
    pub fn new(artifact: impl Into<String>, generation: u64) -> Self {
        Self {
            artifact: artifact.into(),
            generation,
        }
    }

    /// Stable key of the artifact whose behavior is being applied.
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Behavior generation performing this application.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Object-safe behavior signature: `(context, instance) -> result`.
pub type BehaviorFn = dyn Fn(&ApplyContext, &Arc<Instance>) -> Result<(), ApplyError> + Send + Sync;

/// Shared handle to an executable behavior.
pub type Behavior = Arc<BehaviorFn>;
