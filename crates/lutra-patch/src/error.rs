//! Patch errors

use thiserror::Error;

use lutra_runtime::RuntimeError;

/// Why direct entry patching is unavailable for a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedReason {
    /// Direct patching was switched off by configuration
    #[error("direct patching disabled by configuration")]
    DisabledByConfig,

    /// The process architecture is outside the supported set
    #[error("unsupported architecture: {0}")]
    Architecture(&'static str),

    /// The target's installed code is a precompiled native thunk
    #[error("target code is precompiled, not patchable in place")]
    NativeCode,

    /// The function body is too short to hold the redirection hook
    #[error("entry too short for hook: {have} byte(s)")]
    EntryTooShort {
        /// Decodable bytes available at the entry
        have: usize,
    },

    /// An entry instruction in the patch span cannot be moved out of line
    #[error("entry instruction {opcode} at offset {offset} is not relocatable")]
    EntryNotRelocatable {
        /// Offending opcode name
        opcode: &'static str,
        /// Offset of the offending instruction
        offset: usize,
    },
}

/// Errors that can occur while installing or driving a redirection
#[derive(Debug, Error)]
pub enum PatchError {
    /// Direct entry patching is unavailable; callers fall back to the
    /// cooperative override channel
    #[error("direct patching unsupported: {0}")]
    UnsupportedPlatform(#[source] UnsupportedReason),

    /// The artifact was never provisioned with a cooperative override slot
    #[error("no cooperative override slot for artifact `{0}`")]
    NoCooperativeSlot(String),

    /// No call site matching the target identity was found
    #[error("no call site matching `{0}` found")]
    PatchPointNotFound(String),

    /// An install for the same target is already in progress
    #[error("install already in progress for this target")]
    InstallInProgress,

    /// The injection was already disposed
    #[error("injection already disposed")]
    Disposed,

    /// The installed bytes rejected the patch write
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, PatchError>;
