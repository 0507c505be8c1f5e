//! # Lutra Patch
//!
//! Function-redirection strategies for the Lutra hot-reload engine: locating
//! patch points inside compiled function bodies, probing whether the current
//! process can patch a function directly, splicing a redirection hook over a
//! function's entry with full rollback, and the cooperative override-slot
//! fallback for targets that cannot be patched.
//!
//! Strategy choice is a tagged variant made once per artifact by capability
//! probing; there is no virtual dispatch across strategy objects.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod fallback;
pub mod injector;
pub mod locator;
pub mod probe;
pub mod strategy;

pub use error::{PatchError, UnsupportedReason};
pub use fallback::FallbackOverrideChannel;
pub use injector::{FunctionInjector, Injection};
pub use locator::{locate_patch_points, NameMatcher, PatchPoint, SymbolMatcher};
pub use probe::{probe_entry, EntryPlan, HOOK_SPAN};
pub use strategy::{RedirectStrategy, StrategyKind};
