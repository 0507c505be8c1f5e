//! Patch point location inside compiled function bodies

use lutra_bytecode::{FunctionBody, Opcode, SymbolRef};

/// A located, validated call site a redirection can anchor to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPoint {
    /// Byte offset of the call instruction
    pub offset: usize,
    /// The resolved callee the call site references
    pub symbol: SymbolRef,
}

/// Decides whether a resolved call target matches the identity being sought.
pub trait SymbolMatcher: Send + Sync {
    /// `true` if `candidate` is the target named by `target`.
    fn matches(&self, candidate: &SymbolRef, target: &str) -> bool;
}

/// Baseline matcher: exact name equality.
///
/// Name-only matching is unsound in the presence of overloads or identically
/// named unrelated functions: two symbols with the same name but different
/// arities both match, and which one a caller acts on is unspecified. Hosts
/// with richer metadata should substitute a token or signature matcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameMatcher;

impl SymbolMatcher for NameMatcher {
    fn matches(&self, candidate: &SymbolRef, target: &str) -> bool {
        candidate.name == target
    }
}

/// Scan `body` for call sites whose resolved callee matches `target`.
///
/// An empty result is not an error: it means this redirection candidate is
/// unavailable and the caller should try the next strategy. A malformed
/// stream simply ends the scan early for the same reason.
pub fn locate_patch_points(
    body: &FunctionBody,
    target: &str,
    matcher: &dyn SymbolMatcher,
) -> Vec<PatchPoint> {
    let mut points = Vec::new();
    let mut reader = body.reader();

    while reader.advance() {
        if reader.opcode() != Some(Opcode::CallSym) {
            continue;
        }
        let operand = reader.operand();
        let token = u32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
        let Some(symbol) = body.symbols().resolve(token) else {
            continue;
        };
        if matcher.matches(symbol, target) {
            points.push(PatchPoint {
                offset: reader.offset().unwrap_or(0),
                symbol: symbol.clone(),
            });
        }
    }

    points
}
