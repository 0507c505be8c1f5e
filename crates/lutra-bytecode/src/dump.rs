//! Human-readable instruction stream dump

use std::fmt::Write as _;

use crate::body::FunctionBody;
use crate::opcode::OperandKind;

/// Render a function body as one instruction per line.
///
/// `Sym` operands are resolved through the body's symbol table where
/// possible. Bytes past the last decodable instruction are reported as an
/// undecoded tail rather than dropped silently.
pub fn dump_body(body: &FunctionBody) -> String {
    let mut out = String::new();
    let mut reader = body.reader();
    let mut end = 0;

    while reader.advance() {
        let offset = reader.offset().unwrap_or(0);
        let consumed = reader.consumed().unwrap_or(0);
        end = offset + consumed;

        let opcode = match reader.opcode() {
            Some(op) => op,
            None => break,
        };

        let _ = write!(out, "{offset:04x}  {:<12}", opcode.name());
        let operand = reader.operand();
        match opcode.operand_kind() {
            OperandKind::None => {}
            OperandKind::Imm8 => {
                let _ = write!(out, " {}", operand[0]);
            }
            OperandKind::BranchShort => {
                let _ = write!(out, " {:+}", operand[0] as i8);
            }
            OperandKind::Slot => {
                let slot = u16::from_le_bytes([operand[0], operand[1]]);
                let _ = write!(out, " slot:{slot}");
            }
            OperandKind::Imm32 => {
                let value = u32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
                let _ = write!(out, " {value:#x}");
            }
            OperandKind::Imm64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&operand[..8]);
                let _ = write!(out, " {}", f64::from_le_bytes(raw));
            }
            OperandKind::Sym => {
                let token = u32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
                match body.symbols().resolve(token) {
                    Some(sym) => {
                        let _ = write!(out, " {}/{}", sym.name, sym.arity);
                    }
                    None => {
                        let _ = write!(out, " token:{token:#x}");
                    }
                }
            }
            OperandKind::Branch => {
                let rel = i32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
                let _ = write!(out, " {rel:+}");
            }
            OperandKind::Table => {
                if let Some(table) = reader.branch_table() {
                    let _ = write!(out, " [");
                    for (i, rel) in table.iter().enumerate() {
                        if i > 0 {
                            let _ = write!(out, ", ");
                        }
                        let _ = write!(out, "{rel:+}");
                    }
                    let _ = write!(out, "]");
                }
            }
        }
        out.push('\n');
    }

    if end < body.len() {
        let _ = writeln!(out, "{end:04x}  ; {} undecoded byte(s)", body.len() - end);
    }

    out
}
