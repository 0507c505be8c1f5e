//! Compiled function bodies and symbol tables

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::reader::StreamReader;

/// A named entity referenced from instruction operands by token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Token value as it appears in `Sym` operands
    pub token: u32,
    /// Source-level name
    pub name: String,
    /// Declared parameter count
    pub arity: u8,
}

/// Token-to-symbol mapping for one compiled function.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    by_token: FxHashMap<u32, SymbolRef>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a symbol under its token.
    ///
    /// Tokens are assigned by the build step and must be unique within a
    /// function.
    pub fn insert(&mut self, symbol: SymbolRef) -> Result<()> {
        let token = symbol.token;
        if self.by_token.insert(token, symbol).is_some() {
            return Err(BytecodeError::DuplicateSymbol(token));
        }
        Ok(())
    }

    /// Resolve a token to its symbol.
    pub fn resolve(&self, token: u32) -> Option<&SymbolRef> {
        self.by_token.get(&token)
    }

    /// Number of registered symbols.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

/// Immutable snapshot of one function's compiled instructions.
///
/// This buffer is analysis input only. Patching never writes here; it acts
/// on the live function's installed bytes, so a body taken before an install
/// stays valid for locating patch points afterwards.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    bytes: Arc<[u8]>,
    symbols: Arc<SymbolTable>,
}

impl FunctionBody {
    /// Create a body from raw instruction bytes and their symbol table.
    pub fn new(bytes: impl Into<Arc<[u8]>>, symbols: Arc<SymbolTable>) -> Self {
        Self {
            bytes: bytes.into(),
            symbols,
        }
    }

    /// Raw instruction bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Symbol table resolving `Sym` operand tokens.
    #[inline]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Shared handle to the symbol table.
    pub fn symbols_arc(&self) -> Arc<SymbolTable> {
        Arc::clone(&self.symbols)
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the body holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cursor positioned before the first instruction.
    pub fn reader(&self) -> StreamReader<'_> {
        StreamReader::new(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn test_symbol_table_insert_and_resolve() {
        let mut table = SymbolTable::new();
        table
            .insert(SymbolRef {
                token: 0xAA,
                name: "apply_document".into(),
                arity: 2,
            })
            .unwrap();

        assert_eq!(table.resolve(0xAA).unwrap().name, "apply_document");
        assert_eq!(table.resolve(0xBB), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let mut table = SymbolTable::new();
        let sym = SymbolRef {
            token: 1,
            name: "a".into(),
            arity: 0,
        };
        table.insert(sym.clone()).unwrap();
        assert!(matches!(
            table.insert(sym),
            Err(BytecodeError::DuplicateSymbol(1))
        ));
    }

    #[test]
    fn test_body_reader() {
        let bytes: Vec<u8> = vec![0x01, 0x32]; // LoadSelf, Ret
        let body = FunctionBody::new(bytes, Arc::new(SymbolTable::new()));
        assert_eq!(body.len(), 2);

        let mut reader = body.reader();
        assert!(reader.advance());
        assert_eq!(reader.opcode(), Some(Opcode::LoadSelf));
        assert!(reader.advance());
        assert_eq!(reader.opcode(), Some(Opcode::Ret));
        assert!(!reader.advance());
    }
}
