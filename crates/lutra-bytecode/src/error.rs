//! Bytecode errors

use thiserror::Error;

/// Errors that can occur during bytecode operations
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// A symbol token was registered twice
    #[error("Duplicate symbol token: {0:#x}")]
    DuplicateSymbol(u32),

    /// A `Sym` operand referenced a token absent from the symbol table
    #[error("Unknown symbol token: {0:#x}")]
    UnknownSymbol(u32),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
