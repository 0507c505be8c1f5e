//! # Lutra Runtime
//!
//! Host-side object model for the Lutra hot-reload engine: live view
//! instances, the behavior callable type, compiled functions with their
//! installed instruction bytes, the redirection trampoline entered from the
//! dispatch path, cooperative override slots provisioned by the build-time
//! weaver, and the weak registry of instances bound to an artifact.
//!
//! ## Design Principles
//!
//! - **Pointer swaps, not re-patching**: once a function is hooked, new
//!   behavior is a single atomic pointer store that every later invocation
//!   observes
//! - **Weak membership**: the instance registry never extends an instance's
//!   lifetime and never reports a collected one

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod function;
pub mod instance;
pub mod override_slot;
pub mod registry;
pub mod trampoline;

pub use error::{ApplyError, RuntimeError};
pub use function::{CodeKind, CompiledFunction, FunctionId};
pub use instance::{ApplyContext, Behavior, BehaviorFn, Instance, InstanceId};
pub use override_slot::{OverrideSlot, OverrideSlotTable};
pub use registry::LiveInstanceSet;
pub use trampoline::Trampoline;
