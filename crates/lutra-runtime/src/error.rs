//! Runtime errors

use thiserror::Error;

/// Errors surfaced while applying a behavior to an instance.
#[derive(Debug, Error, Clone)]
pub enum ApplyError {
    /// The behavior itself reported a failure
    #[error("apply failed: {0}")]
    Host(String),

    /// The installed entry is hooked but no trampoline is attached
    #[error("hooked entry has no trampoline attached")]
    MissingTrampoline,

    /// The hook operand does not name the attached trampoline
    #[error("trampoline id mismatch: entry {entry:#x}, attached {attached:#x}")]
    TrampolineMismatch {
        /// Id carried by the hook operand
        entry: u32,
        /// Id of the trampoline attached to the function
        attached: u32,
    },
}

/// Errors from mutating a function's installed bytes.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Attempted to write past the end of the installed body
    #[error("patch span {span} exceeds function body length {len}")]
    PatchOutOfBounds {
        /// Requested write length
        span: usize,
        /// Installed body length
        len: usize,
    },
}
