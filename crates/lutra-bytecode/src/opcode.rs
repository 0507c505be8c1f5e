//! Instruction opcodes and operand kinds

use serde::{Deserialize, Serialize};

/// First byte value of the extended (two-byte) opcode page.
///
/// A lead byte at or above this value selects the extended page; the second
/// byte identifies the instruction within it.
pub const EXTENDED_PREFIX: u8 = 0xF0;

/// Operand encoding attached to an opcode.
///
/// Every opcode carries exactly one operand kind, and the byte length of the
/// operand is a static function of the kind, except [`OperandKind::Table`],
/// whose total length depends on the element count stored in its first four
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    /// No operand
    None,
    /// One-byte immediate
    Imm8,
    /// Four-byte immediate
    Imm32,
    /// Eight-byte immediate (numeric constant)
    Imm64,
    /// Four-byte symbol token resolved through the body's symbol table
    Sym,
    /// Two-byte property slot index
    Slot,
    /// Four-byte signed branch offset
    Branch,
    /// One-byte signed branch offset
    BranchShort,
    /// Four-byte element count followed by `count` four-byte branch offsets
    Table,
}

impl OperandKind {
    /// Fixed operand length in bytes.
    ///
    /// For [`OperandKind::Table`] this is only the count prefix; the decoder
    /// adds `count * 4` once the prefix has been read.
    pub const fn fixed_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Imm8 | Self::BranchShort => 1,
            Self::Slot => 2,
            Self::Imm32 | Self::Sym | Self::Branch | Self::Table => 4,
            Self::Imm64 => 8,
        }
    }

    /// Whether the operand encodes one or more instruction-relative offsets.
    ///
    /// Instructions with relative operands cannot be relocated byte-for-byte.
    pub const fn is_relative(self) -> bool {
        matches!(self, Self::Branch | Self::BranchShort | Self::Table)
    }
}

/// Instruction opcodes
///
/// Stack-machine instruction set for document-apply functions. One-byte
/// opcodes occupy values below [`EXTENDED_PREFIX`]; extended opcodes encode
/// as `(lead, second)` and are represented here as `lead << 8 | second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    // ==================== Misc ====================
    /// No operation
    Nop = 0x00,
    /// Push the instance being populated
    LoadSelf = 0x01,
    /// Push a pooled constant
    LoadConst = 0x02,
    /// Push a small integer immediate
    LoadImm = 0x03,
    /// Push a 64-bit numeric immediate
    LoadNum = 0x04,
    /// Push the value named by a symbol token
    LoadSym = 0x05,

    // ==================== Properties ====================
    /// Read a property slot: push self\[slot\]
    GetProp = 0x10,
    /// Write a property slot: self\[slot\] = pop
    SetProp = 0x11,
    /// Read an attached property by symbol
    GetAttached = 0x12,
    /// Write an attached property by symbol
    SetAttached = 0x13,
    /// Bind a property to an expression resolved by symbol
    BindProp = 0x14,

    // ==================== Tree construction ====================
    /// Instantiate a child element of the type named by a symbol
    NewChild = 0x20,
    /// Append the top of stack to the current element's children
    AppendChild = 0x21,
    /// Enter the element on top of stack as the population target
    PushScope = 0x22,
    /// Leave the current population target
    PopScope = 0x23,

    // ==================== Calls ====================
    /// Call the function named by a symbol token
    CallSym = 0x30,
    /// Call through a property slot
    CallSlot = 0x31,
    /// Return from the apply function
    Ret = 0x32,

    // ==================== Control flow ====================
    /// Unconditional jump, four-byte offset
    Jump = 0x40,
    /// Unconditional jump, one-byte offset
    JumpShort = 0x41,
    /// Jump if top of stack is truthy
    BranchIf = 0x42,
    /// Jump if top of stack is falsy
    BranchIfNot = 0x43,
    /// Indexed multi-way branch through an inline offset table
    Select = 0x44,

    // ==================== Stack ====================
    /// Duplicate top of stack
    Dup = 0x50,
    /// Discard top of stack
    Pop = 0x51,
    /// Swap the top two stack values
    Swap = 0x52,

    // ==================== Extended page ====================
    /// Redirection hook: route this invocation through a trampoline
    Hook = 0xF001,
    /// Instrumentation marker emitted by the build-time weaver
    Probe = 0xF002,
    /// Ordering fence between property writes
    Fence = 0xF003,
}

impl Opcode {
    /// Decode a one-byte opcode.
    ///
    /// Returns `None` for bytes in the extended prefix range or absent from
    /// the catalog.
    pub fn from_byte(byte: u8) -> Option<Self> {
        // Use a match to ensure safety
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::LoadSelf),
            0x02 => Some(Self::LoadConst),
            0x03 => Some(Self::LoadImm),
            0x04 => Some(Self::LoadNum),
            0x05 => Some(Self::LoadSym),

            0x10 => Some(Self::GetProp),
            0x11 => Some(Self::SetProp),
            0x12 => Some(Self::GetAttached),
            0x13 => Some(Self::SetAttached),
            0x14 => Some(Self::BindProp),

            0x20 => Some(Self::NewChild),
            0x21 => Some(Self::AppendChild),
            0x22 => Some(Self::PushScope),
            0x23 => Some(Self::PopScope),

            0x30 => Some(Self::CallSym),
            0x31 => Some(Self::CallSlot),
            0x32 => Some(Self::Ret),

            0x40 => Some(Self::Jump),
            0x41 => Some(Self::JumpShort),
            0x42 => Some(Self::BranchIf),
            0x43 => Some(Self::BranchIfNot),
            0x44 => Some(Self::Select),

            0x50 => Some(Self::Dup),
            0x51 => Some(Self::Pop),
            0x52 => Some(Self::Swap),

            _ => None,
        }
    }

    /// Decode an extended opcode from its lead and second bytes.
    ///
    /// The lead byte must be in the extended prefix range.
    pub fn from_extended(lead: u8, second: u8) -> Option<Self> {
        if lead < EXTENDED_PREFIX {
            return None;
        }
        match (lead, second) {
            (0xF0, 0x01) => Some(Self::Hook),
            (0xF0, 0x02) => Some(Self::Probe),
            (0xF0, 0x03) => Some(Self::Fence),
            _ => None,
        }
    }

    /// Encoded opcode length in bytes (1 or 2).
    #[inline]
    pub const fn encoded_len(self) -> usize {
        if (self as u16) > 0xFF { 2 } else { 1 }
    }

    /// Encode this opcode into its byte form.
    pub fn encode(self) -> ([u8; 2], usize) {
        let raw = self as u16;
        if raw > 0xFF {
            ([(raw >> 8) as u8, (raw & 0xFF) as u8], 2)
        } else {
            ([raw as u8, 0], 1)
        }
    }

    /// Operand kind carried by this opcode.
    pub const fn operand_kind(self) -> OperandKind {
        match self {
            Self::Nop
            | Self::LoadSelf
            | Self::AppendChild
            | Self::PushScope
            | Self::PopScope
            | Self::Ret
            | Self::Dup
            | Self::Pop
            | Self::Swap
            | Self::Fence => OperandKind::None,
            Self::LoadImm => OperandKind::Imm8,
            Self::LoadConst => OperandKind::Imm32,
            Self::LoadNum => OperandKind::Imm64,
            Self::LoadSym
            | Self::GetAttached
            | Self::SetAttached
            | Self::BindProp
            | Self::NewChild
            | Self::CallSym => OperandKind::Sym,
            Self::GetProp | Self::SetProp | Self::CallSlot => OperandKind::Slot,
            Self::Jump | Self::BranchIf | Self::BranchIfNot => OperandKind::Branch,
            Self::JumpShort => OperandKind::BranchShort,
            Self::Select => OperandKind::Table,
            Self::Hook | Self::Probe => OperandKind::Imm32,
        }
    }

    /// Get the name of this opcode
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "Nop",
            Self::LoadSelf => "LoadSelf",
            Self::LoadConst => "LoadConst",
            Self::LoadImm => "LoadImm",
            Self::LoadNum => "LoadNum",
            Self::LoadSym => "LoadSym",
            Self::GetProp => "GetProp",
            Self::SetProp => "SetProp",
            Self::GetAttached => "GetAttached",
            Self::SetAttached => "SetAttached",
            Self::BindProp => "BindProp",
            Self::NewChild => "NewChild",
            Self::AppendChild => "AppendChild",
            Self::PushScope => "PushScope",
            Self::PopScope => "PopScope",
            Self::CallSym => "CallSym",
            Self::CallSlot => "CallSlot",
            Self::Ret => "Ret",
            Self::Jump => "Jump",
            Self::JumpShort => "JumpShort",
            Self::BranchIf => "BranchIf",
            Self::BranchIfNot => "BranchIfNot",
            Self::Select => "Select",
            Self::Dup => "Dup",
            Self::Pop => "Pop",
            Self::Swap => "Swap",
            Self::Hook => "Hook",
            Self::Probe => "Probe",
            Self::Fence => "Fence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_roundtrip() {
        let ops = [
            Opcode::Nop,
            Opcode::SetProp,
            Opcode::CallSym,
            Opcode::Jump,
            Opcode::Ret,
        ];

        for op in ops {
            let (bytes, len) = op.encode();
            assert_eq!(len, 1);
            assert_eq!(Opcode::from_byte(bytes[0]), Some(op));
        }
    }

    #[test]
    fn test_extended_roundtrip() {
        for op in [Opcode::Hook, Opcode::Probe, Opcode::Fence] {
            let (bytes, len) = op.encode();
            assert_eq!(len, 2);
            assert!(bytes[0] >= EXTENDED_PREFIX);
            assert_eq!(Opcode::from_extended(bytes[0], bytes[1]), Some(op));
        }
    }

    #[test]
    fn test_prefix_range_is_not_single_byte() {
        for byte in EXTENDED_PREFIX..=0xFF {
            assert_eq!(Opcode::from_byte(byte), None);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_byte(0x6B), None);
        assert_eq!(Opcode::from_extended(0xF0, 0x7F), None);
        assert_eq!(Opcode::from_extended(0x30, 0x01), None);
    }

    #[test]
    fn test_operand_lengths() {
        assert_eq!(Opcode::Nop.operand_kind().fixed_len(), 0);
        assert_eq!(Opcode::LoadImm.operand_kind().fixed_len(), 1);
        assert_eq!(Opcode::SetProp.operand_kind().fixed_len(), 2);
        assert_eq!(Opcode::CallSym.operand_kind().fixed_len(), 4);
        assert_eq!(Opcode::LoadNum.operand_kind().fixed_len(), 8);
        // Table length is count prefix only; the decoder adds the payload.
        assert_eq!(Opcode::Select.operand_kind().fixed_len(), 4);
    }

    #[test]
    fn test_relative_operands() {
        assert!(Opcode::Jump.operand_kind().is_relative());
        assert!(Opcode::JumpShort.operand_kind().is_relative());
        assert!(Opcode::Select.operand_kind().is_relative());
        assert!(!Opcode::CallSym.operand_kind().is_relative());
    }

    #[test]
    fn test_opcode_name() {
        assert_eq!(Opcode::CallSym.name(), "CallSym");
        assert_eq!(Opcode::Hook.name(), "Hook");
        assert_eq!(Opcode::Select.name(), "Select");
    }
}
