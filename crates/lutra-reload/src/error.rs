//! Reload errors

use std::path::PathBuf;

use thiserror::Error;

use lutra_patch::PatchError;

use crate::artifact::ArtifactKey;
use crate::collab::CompileError;

/// Errors surfaced by a reload session.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// A change event arrived for a path no registered artifact owns
    #[error("no artifact registered for source {0}")]
    UnknownSource(PathBuf),

    /// The artifact is degraded; reload is permanently disabled for it
    #[error("artifact `{0}` is degraded; reload disabled")]
    Degraded(ArtifactKey),

    /// Reading the changed source text failed
    #[error("source read failed: {0}")]
    SourceRead(#[from] std::io::Error),

    /// The external compiler rejected the source; previous behavior retained
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Installing or updating the redirection failed
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// The UI dispatcher dropped the session's mutation task
    #[error("dispatcher dropped the session task")]
    DispatcherGone,
}

/// Result type for reload operations
pub type Result<T> = std::result::Result<T, ReloadError>;
