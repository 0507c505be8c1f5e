//! Per-artifact redirection strategy selection

use std::sync::Arc;

use crate::injector::Injection;

/// Which redirection channel an injection drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Entry bytes patched in place, trampoline holds the live pointer
    DirectPatch,
    /// Weaver-provisioned cooperative override slot
    OverrideField,
}

/// The redirection strategy chosen for one artifact.
///
/// Chosen once by capability probing, then fixed for the process lifetime.
/// `Unsupported` marks a degraded artifact: no channel is available and it
/// keeps its baseline behavior forever.
#[derive(Debug)]
pub enum RedirectStrategy {
    /// Direct entry patch is installed
    DirectPatch(Arc<Injection>),
    /// Cooperative override slot is installed
    OverrideField(Arc<Injection>),
    /// No channel available; artifact is degraded
    Unsupported,
}

impl RedirectStrategy {
    /// The active injection, unless degraded.
    pub fn injection(&self) -> Option<&Arc<Injection>> {
        match self {
            Self::DirectPatch(injection) | Self::OverrideField(injection) => Some(injection),
            Self::Unsupported => None,
        }
    }

    /// Strategy tag, unless degraded.
    pub fn kind(&self) -> Option<StrategyKind> {
        match self {
            Self::DirectPatch(_) => Some(StrategyKind::DirectPatch),
            Self::OverrideField(_) => Some(StrategyKind::OverrideField),
            Self::Unsupported => None,
        }
    }

    /// Whether the artifact is degraded.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }
}
