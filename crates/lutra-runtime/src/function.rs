//! Compiled functions and their live installed bytes

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use lutra_bytecode::{FunctionBody, Opcode, StreamReader, SymbolTable};

use crate::error::{ApplyError, RuntimeError};
use crate::instance::{ApplyContext, Behavior, Instance};
use crate::registry::LiveInstanceSet;
use crate::trampoline::Trampoline;

/// Index into the host's function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// Create a new function id
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// How a function's code is installed in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Portable instruction bytes, writable in place
    Portable,
    /// Precompiled native thunk; the instruction form is analysis-only
    Native,
}

/// One host function: the unit a redirection targets.
///
/// The installed bytes are the live code the dispatch path decodes on every
/// invocation; a patcher mutates them in place and restores them on dispose.
/// Analysis works on immutable [`FunctionBody`] snapshots instead.
pub struct CompiledFunction {
    id: FunctionId,
    name: String,
    kind: CodeKind,
    symbols: Arc<SymbolTable>,
    baseline: Behavior,
    installed: RwLock<Vec<u8>>,
    trampoline: ArcSwapOption<Trampoline>,
    live_set: Option<Arc<LiveInstanceSet>>,
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("installed_len", &self.installed.read().len())
            .field("hooked", &self.trampoline.load().is_some())
            .finish()
    }
}

impl CompiledFunction {
    /// Create a new function builder
    pub fn builder() -> CompiledFunctionBuilder {
        CompiledFunctionBuilder::new()
    }

    /// Function id
    #[inline]
    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Function name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Code installation kind
    #[inline]
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Baseline behavior pointer, as installed at process start.
    pub fn baseline(&self) -> Behavior {
        Arc::clone(&self.baseline)
    }

    /// Shared symbol table for this function's `Sym` operands.
    pub fn symbols_arc(&self) -> Arc<SymbolTable> {
        Arc::clone(&self.symbols)
    }

    /// Immutable snapshot of the currently installed bytes.
    pub fn body(&self) -> FunctionBody {
        let bytes: Arc<[u8]> = Arc::from(self.installed.read().as_slice());
        FunctionBody::new(bytes, Arc::clone(&self.symbols))
    }

    /// Copy of the first `len` installed bytes (clamped to the body length).
    pub fn entry_bytes(&self, len: usize) -> Vec<u8> {
        let installed = self.installed.read();
        installed[..len.min(installed.len())].to_vec()
    }

    /// Overwrite the start of the installed bytes with `patch`.
    pub fn write_entry(&self, patch: &[u8]) -> Result<(), RuntimeError> {
        let mut installed = self.installed.write();
        if patch.len() > installed.len() {
            return Err(RuntimeError::PatchOutOfBounds {
                span: patch.len(),
                len: installed.len(),
            });
        }
        installed[..patch.len()].copy_from_slice(patch);
        Ok(())
    }

    /// Attach the trampoline entered for a hooked entry.
    pub fn attach_trampoline(&self, trampoline: Arc<Trampoline>) {
        self.trampoline.store(Some(trampoline));
    }

    /// Detach the trampoline.
    pub fn detach_trampoline(&self) {
        self.trampoline.store(None);
    }

    /// Currently attached trampoline, if any.
    pub fn trampoline(&self) -> Option<Arc<Trampoline>> {
        self.trampoline.load_full()
    }

    /// Run the function for one instance.
    ///
    /// The instance joins the artifact's live set before dispatch, so a
    /// creation racing a reload observes whichever behavior is installed at
    /// its own invocation moment. A hooked entry routes through the attached
    /// trampoline, which re-reads the live override pointer; otherwise the
    /// baseline runs.
    pub fn invoke(&self, ctx: &ApplyContext, instance: &Arc<Instance>) -> Result<(), ApplyError> {
        if let Some(set) = &self.live_set {
            set.add(instance);
        }

        let hook_id = {
            let installed = self.installed.read();
            let mut reader = StreamReader::new(&installed);
            if reader.advance() && reader.opcode() == Some(Opcode::Hook) {
                let operand = reader.operand();
                Some(u32::from_le_bytes([
                    operand[0], operand[1], operand[2], operand[3],
                ]))
            } else {
                None
            }
        };

        match hook_id {
            Some(entry) => {
                let trampoline = self
                    .trampoline
                    .load_full()
                    .ok_or(ApplyError::MissingTrampoline)?;
                if trampoline.id() != entry {
                    return Err(ApplyError::TrampolineMismatch {
                        entry,
                        attached: trampoline.id(),
                    });
                }
                trampoline.enter(ctx, instance)
            }
            None => (self.baseline)(ctx, instance),
        }
    }
}

/// Builder for creating compiled functions
pub struct CompiledFunctionBuilder {
    id: FunctionId,
    name: String,
    kind: CodeKind,
    symbols: Arc<SymbolTable>,
    baseline: Option<Behavior>,
    installed: Vec<u8>,
    live_set: Option<Arc<LiveInstanceSet>>,
}

impl CompiledFunctionBuilder {
    /// Create a new builder with portable code and a no-op baseline.
    pub fn new() -> Self {
        Self {
            id: FunctionId::new(0),
            name: String::new(),
            kind: CodeKind::Portable,
            symbols: Arc::new(SymbolTable::new()),
            baseline: None,
            installed: Vec::new(),
            live_set: None,
        }
    }

    /// Set the function id
    pub fn id(mut self, id: FunctionId) -> Self {
        self.id = id;
        self
    }

    /// Set the function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the code installation kind
    pub fn kind(mut self, kind: CodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the symbol table
    pub fn symbols(mut self, symbols: Arc<SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Set the baseline behavior
    pub fn baseline(mut self, behavior: Behavior) -> Self {
        self.baseline = Some(behavior);
        self
    }

    /// Set the installed instruction bytes
    pub fn installed(mut self, bytes: Vec<u8>) -> Self {
        self.installed = bytes;
        self
    }

    /// Record invoked instances into this live set
    pub fn live_set(mut self, set: Arc<LiveInstanceSet>) -> Self {
        self.live_set = Some(set);
        self
    }

    /// Build the function
    pub fn build(self) -> Arc<CompiledFunction> {
        Arc::new(CompiledFunction {
            id: self.id,
            name: self.name,
            kind: self.kind,
            symbols: self.symbols,
            baseline: self.baseline.unwrap_or_else(|| Arc::new(|_, _| Ok(()))),
            installed: RwLock::new(self.installed),
            trampoline: ArcSwapOption::const_empty(),
            live_set: self.live_set,
        })
    }
}

impl Default for CompiledFunctionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
