//! Reloadable artifact identity and metadata

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lutra_runtime::{Behavior, CompiledFunction, LiveInstanceSet};

/// Stable, path-independent identity of one reloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(Arc<str>);

impl ArtifactKey {
    /// Create a key from its stable name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Static metadata for one reloadable artifact.
///
/// Created once at process start from compiled metadata and immutable
/// afterwards. The build function is the wrapper whose body names the
/// redirect target at a call site; the apply function is what actually gets
/// redirected; the live set collects every instance the apply function has
/// run for.
pub struct ArtifactInfo {
    key: ArtifactKey,
    source_path: PathBuf,
    build_fn: Arc<CompiledFunction>,
    apply_fn: Arc<CompiledFunction>,
    apply_symbol: String,
    instances: Arc<LiveInstanceSet>,
}

impl std::fmt::Debug for ArtifactInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactInfo")
            .field("key", &self.key)
            .field("source_path", &self.source_path)
            .field("apply_symbol", &self.apply_symbol)
            .finish()
    }
}

impl ArtifactInfo {
    /// Describe an artifact.
    ///
    /// `instances` must be the same live set the apply function records
    /// into, so reload snapshots see what dispatch saw.
    pub fn new(
        key: ArtifactKey,
        source_path: impl Into<PathBuf>,
        build_fn: Arc<CompiledFunction>,
        apply_fn: Arc<CompiledFunction>,
        apply_symbol: impl Into<String>,
        instances: Arc<LiveInstanceSet>,
    ) -> Self {
        Self {
            key,
            source_path: source_path.into(),
            build_fn,
            apply_fn,
            apply_symbol: apply_symbol.into(),
            instances,
        }
    }

    /// Stable identity.
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Source document path watched for changes.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Wrapper function whose body references the redirect target.
    pub fn build_fn(&self) -> &Arc<CompiledFunction> {
        &self.build_fn
    }

    /// Function the redirection targets.
    pub fn apply_fn(&self) -> &Arc<CompiledFunction> {
        &self.apply_fn
    }

    /// Callee identity the patch-point locator matches against.
    pub fn apply_symbol(&self) -> &str {
        &self.apply_symbol
    }

    /// Original baseline behavior of the apply function.
    pub fn baseline(&self) -> Behavior {
        self.apply_fn.baseline()
    }

    /// Live instances bound to this artifact.
    pub fn instances(&self) -> &Arc<LiveInstanceSet> {
        &self.instances
    }
}
