//! Instruction sizing.
//!
//! Sizes are computed strictly left to right from the opcode length plus a fixed
//! contribution per operand category. Nothing is ever revised after the fact: a branch is
//! as wide as the opcode the caller picked, so every offset in the stream is final the
//! moment its instruction is appended.
//!
//! | Operand category                                       | Bytes             |
//! |--------------------------------------------------------|-------------------|
//! | none                                                   | 0                 |
//! | int8, uint8, short branch, short local                 | 1                 |
//! | uint16, local                                          | 2                 |
//! | int32, float32, string, handles, token, branch         | 4                 |
//! | int64, float64                                         | 8                 |
//! | switch                                                 | 4 * (1 + targets) |

use crate::{
    assembly::{instruction::OperandKind, opcodes::OpCode, Operand},
    Error, Result,
};

impl OperandKind {
    /// Bytes contributed by an operand of this kind, or `None` when it depends on the
    /// operand value (only [`OperandKind::Switch`]).
    #[must_use]
    pub const fn fixed_size(self) -> Option<u32> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::Int8
            | OperandKind::UInt8
            | OperandKind::ShortBranch
            | OperandKind::ShortLocal => Some(1),
            OperandKind::UInt16 | OperandKind::Local => Some(2),
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::String
            | OperandKind::Branch
            | OperandKind::Field
            | OperandKind::Method
            | OperandKind::Constructor
            | OperandKind::Type
            | OperandKind::Token => Some(4),
            OperandKind::Int64 | OperandKind::Float64 => Some(8),
            OperandKind::Switch => None,
        }
    }
}

/// Size of a jump table with `targets` entries: a 4-byte count plus one 4-byte slot each.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the table would not fit in `u32`.
pub fn switch_table_size(targets: usize) -> Result<u32> {
    u32::try_from(targets)
        .ok()
        .and_then(|count| count.checked_add(1))
        .and_then(|slots| slots.checked_mul(4))
        .ok_or_else(|| malformed_error!("Too many switch targets: {}", targets))
}

/// Bytes contributed by `operand` when encoded for `opcode`.
///
/// The operand is assumed to have been checked against the opcode already.
///
/// # Errors
///
/// Returns [`Error::SizeTableGap`] if the opcode's operand kind has no fixed size and is
/// not a jump table, or [`Error::Malformed`] for oversized jump tables.
pub fn operand_size(opcode: OpCode, operand: &Operand) -> Result<u32> {
    let kind = opcode.operand_kind();
    match (kind, operand) {
        (OperandKind::Switch, Operand::Labels(targets)) => switch_table_size(targets.len()),
        _ => kind.fixed_size().ok_or(Error::SizeTableGap(opcode)),
    }
}

/// Total encoded size of `opcode` with `operand`.
///
/// # Errors
///
/// See [`operand_size`].
pub fn instruction_size(opcode: OpCode, operand: &Operand) -> Result<u32> {
    Ok(opcode.encoded_len() + operand_size(opcode, operand)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::RecordingAssembler;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_fixed_opcode_has_a_size() {
        for op in OpCode::iter() {
            if op.operand_kind() == OperandKind::Switch {
                continue;
            }
            assert!(
                op.operand_kind().fixed_size().is_some(),
                "no size entry for {op}"
            );
        }
    }

    #[test]
    fn test_table_values() {
        assert_eq!(OperandKind::None.fixed_size(), Some(0));
        assert_eq!(OperandKind::ShortBranch.fixed_size(), Some(1));
        assert_eq!(OperandKind::Local.fixed_size(), Some(2));
        assert_eq!(OperandKind::Branch.fixed_size(), Some(4));
        assert_eq!(OperandKind::Float64.fixed_size(), Some(8));
        assert_eq!(OperandKind::Switch.fixed_size(), None);
    }

    #[test]
    fn test_switch_size() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let targets: Vec<_> = (0..3).map(|_| asm.define_label()).collect();

        assert_eq!(
            instruction_size(OpCode::Switch, &Operand::Labels(targets))?,
            1 + 4 * (1 + 3)
        );
        assert_eq!(
            instruction_size(OpCode::Switch, &Operand::Labels(Vec::new()))?,
            5
        );
        Ok(())
    }

    #[test]
    fn test_switch_without_labels_is_a_gap() {
        let result = operand_size(OpCode::Switch, &Operand::None);
        assert!(matches!(result, Err(Error::SizeTableGap(OpCode::Switch))));
    }

    #[test]
    fn test_two_byte_opcodes() -> Result<()> {
        assert_eq!(instruction_size(OpCode::Ceq, &Operand::None)?, 2);
        assert_eq!(instruction_size(OpCode::Ldarg, &Operand::UInt16(7))?, 4);
        Ok(())
    }
}
