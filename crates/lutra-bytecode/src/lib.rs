//! # Lutra Bytecode
//!
//! This crate defines the portable instruction format used by the Lutra
//! hot-reload engine to analyze and patch compiled document-apply functions.
//!
//! ## Design Principles
//!
//! - **Forward-only decoding**: a cursor advances one instruction at a time
//!   and treats malformed input as end-of-stream, never as a fault
//! - **Compact**: one-byte opcodes for the common page, a reserved prefix
//!   range for the extended page
//! - **Analyzable**: operand sizes are a static function of the opcode, so
//!   a patcher can relocate whole instructions without executing anything

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod body;
pub mod dump;
pub mod error;
pub mod opcode;
pub mod reader;

pub use body::{FunctionBody, SymbolRef, SymbolTable};
pub use dump::dump_body;
pub use error::BytecodeError;
pub use opcode::{OperandKind, Opcode, EXTENDED_PREFIX};
pub use reader::{find_opcode, Instruction, StreamReader};

/// Instruction format version
pub const FORMAT_VERSION: u32 = 1;
