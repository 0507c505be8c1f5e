//! Capability probing for direct entry patching

use lutra_bytecode::StreamReader;
use lutra_runtime::{CodeKind, CompiledFunction};

use crate::error::UnsupportedReason;

/// Byte length of the redirection hook: two-byte opcode plus a four-byte
/// trampoline id.
pub const HOOK_SPAN: usize = 6;

/// Layout decision for splicing a hook over a function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlan {
    /// Whole-instruction span at the entry that the patch displaces.
    /// Always `>= HOOK_SPAN`; the remainder after the hook is Nop-padded.
    pub preserved_len: usize,
}

const fn architecture_supported() -> bool {
    cfg!(any(target_arch = "x86_64", target_arch = "aarch64"))
}

/// Check whether `function` can take a direct entry patch right now, and if
/// so how many entry bytes the patch must displace.
///
/// Performs no mutation. Failure means the caller should try the cooperative
/// override channel instead.
pub fn probe_entry(
    function: &CompiledFunction,
    direct_patch_enabled: bool,
) -> std::result::Result<EntryPlan, UnsupportedReason> {
    if !direct_patch_enabled {
        return Err(UnsupportedReason::DisabledByConfig);
    }
    if !architecture_supported() {
        return Err(UnsupportedReason::Architecture(std::env::consts::ARCH));
    }
    if function.kind() != CodeKind::Portable {
        return Err(UnsupportedReason::NativeCode);
    }

    let body = function.body();
    plan_entry(body.bytes())
}

/// Find the whole-instruction span covering the first [`HOOK_SPAN`] bytes.
///
/// Instructions in the span must be relocatable: branch and table operands
/// encode instruction-relative offsets, and the preserved out-of-line copy
/// would carry them verbatim into the wrong frame of reference.
fn plan_entry(bytes: &[u8]) -> std::result::Result<EntryPlan, UnsupportedReason> {
    let mut reader = StreamReader::new(bytes);
    let mut covered = 0;

    while covered < HOOK_SPAN {
        if !reader.advance() {
            return Err(UnsupportedReason::EntryTooShort { have: covered });
        }
        // advance() returned true, so the accessors are populated
        let opcode = match reader.opcode() {
            Some(op) => op,
            None => return Err(UnsupportedReason::EntryTooShort { have: covered }),
        };
        if opcode.operand_kind().is_relative() {
            return Err(UnsupportedReason::EntryNotRelocatable {
                opcode: opcode.name(),
                offset: reader.offset().unwrap_or(covered),
            });
        }
        covered += reader.consumed().unwrap_or(0);
    }

    Ok(EntryPlan {
        preserved_len: covered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lutra_runtime::Instance;

    fn noop() -> lutra_runtime::Behavior {
        Arc::new(|_, _: &Arc<Instance>| Ok(()))
    }

    fn portable_function(bytes: Vec<u8>) -> Arc<CompiledFunction> {
        CompiledFunction::builder()
            .name("view_apply")
            .baseline(noop())
            .installed(bytes)
            .build()
    }

    fn long_entry() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(0x02); // LoadConst (5 bytes)
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0x11); // SetProp (3 bytes)
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(0x32); // Ret
        bytes
    }

    #[test]
    fn plan_covers_whole_instructions() {
        let plan = plan_entry(&long_entry()).unwrap();
        // LoadConst alone covers 5 < 6 bytes, so SetProp joins the span.
        assert_eq!(plan.preserved_len, 8);
    }

    #[test]
    fn short_body_is_rejected() {
        let err = plan_entry(&[0x01, 0x32]).unwrap_err(); // LoadSelf, Ret
        assert_eq!(err, UnsupportedReason::EntryTooShort { have: 2 });
    }

    #[test]
    fn branch_in_span_is_rejected() {
        let mut bytes = Vec::new();
        bytes.push(0x01); // LoadSelf
        bytes.push(0x40); // Jump (relative)
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.push(0x32);
        let err = plan_entry(&bytes).unwrap_err();
        assert!(matches!(
            err,
            UnsupportedReason::EntryNotRelocatable {
                opcode: "Jump",
                offset: 1
            }
        ));
    }

    #[test]
    fn kill_switch_blocks_probe() {
        let function = portable_function(long_entry());
        let err = probe_entry(&function, false).unwrap_err();
        assert_eq!(err, UnsupportedReason::DisabledByConfig);
    }

    #[test]
    fn native_code_blocks_probe() {
        let function = CompiledFunction::builder()
            .kind(lutra_runtime::CodeKind::Native)
            .baseline(noop())
            .installed(long_entry())
            .build();
        let err = probe_entry(&function, true).unwrap_err();
        assert_eq!(err, UnsupportedReason::NativeCode);
    }

    #[test]
    fn supported_probe_returns_plan() {
        let function = portable_function(long_entry());
        let plan = probe_entry(&function, true).unwrap();
        assert_eq!(plan.preserved_len, 8);
    }
}
