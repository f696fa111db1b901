//! The instruction stream: an offset-annotated record of everything emitted.
//!
//! Lines are only ever appended at the tail. The offset of each new line is the previous
//! line's offset plus the previous line's size, so the stream is sorted by offset by
//! construction and offset lookups can stop early.

use std::{collections::HashMap, fmt};

use crate::{
    assembly::{
        disassembly::{Disassembler, DisassemblyOptions},
        instruction::{Instruction, Op},
    },
    Result,
};

/// One `(offset, instruction)` entry of an [`InstructionStream`].
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    offset: u32,
    instruction: Instruction,
}

impl Line {
    /// Byte offset of the instruction from the start of the body.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The recorded instruction or marker.
    #[must_use]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Encoded size of the line; zero for markers.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.instruction.size()
    }
}

/// Ordered, append-only sequence of [`Line`]s owned by a single assembler.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = RecordingAssembler::new();
/// asm.ldc_i4(500)?.ldc_i4(700)?.emit(OpCode::Add)?.ret()?;
///
/// let stream = asm.finish()?;
/// let offsets: Vec<u32> = stream.iter().map(|line| line.offset()).collect();
/// assert_eq!(offsets, vec![0, 5, 10, 11]);
/// assert_eq!(stream.end_offset(), 12);
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionStream {
    lines: Vec<Line>,
    end: u32,
}

impl InstructionStream {
    /// Creates an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `instruction` at the tail and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the body would grow past `u32::MAX` bytes.
    pub fn push(&mut self, instruction: Instruction) -> Result<u32> {
        let offset = self.end;
        let end = offset
            .checked_add(instruction.size())
            .ok_or_else(|| malformed_error!("Instruction stream exceeds u32 offsets at {}", offset))?;

        self.lines.push(Line {
            offset,
            instruction,
        });
        self.end = end;
        Ok(offset)
    }

    /// Appends a zero-sized marker at the current end offset.
    ///
    /// Markers never advance the offset, so unlike [`InstructionStream::push`] this cannot
    /// fail.
    pub(crate) fn push_marker(&mut self, marker: Instruction) {
        debug_assert!(marker.is_marker(), "push_marker called with {marker:?}");
        self.lines.push(Line {
            offset: self.end,
            instruction: marker,
        });
    }

    /// All lines in emission order.
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Iterates over all lines in emission order.
    pub fn iter(&self) -> std::slice::Iter<'_, Line> {
        self.lines.iter()
    }

    /// Number of lines, markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Offset one past the last encoded byte; the total body size.
    #[must_use]
    pub fn end_offset(&self) -> u32 {
        self.end
    }

    /// Iterates over real instructions only, skipping markers.
    pub fn ops(&self) -> impl Iterator<Item = (u32, &Op)> + '_ {
        self.lines
            .iter()
            .filter_map(|line| line.instruction.as_op().map(|op| (line.offset, op)))
    }

    /// Finds the first line at `offset`, returning its index and the line.
    ///
    /// Markers share the offset of the instruction that follows them, so the first
    /// match may be a marker.
    #[must_use]
    pub fn find_by_offset(&self, offset: u32) -> Option<(usize, &Line)> {
        for (index, line) in self.lines.iter().enumerate() {
            if line.offset > offset {
                break;
            }
            if line.offset == offset {
                return Some((index, line));
            }
        }
        None
    }

    /// Returns the real instruction that starts at `offset`, skipping markers.
    #[must_use]
    pub fn instruction_at(&self, offset: u32) -> Option<&Op> {
        let (start, _) = self.find_by_offset(offset)?;
        self.lines[start..]
            .iter()
            .take_while(|line| line.offset == offset)
            .find_map(|line| line.instruction.as_op())
    }

    /// Keeps the first `len` lines and discards the rest.
    pub fn truncate(&mut self, len: usize) {
        if let Some(line) = self.lines.get(len) {
            self.end = line.offset;
            self.lines.truncate(len);
        }
    }

    /// Discards every line after the line at `index`. The line at `index` itself is kept.
    pub fn truncate_after(&mut self, index: usize) {
        self.truncate(index.saturating_add(1));
    }

    /// Maps label roster indices to the offsets at which they were resolved.
    ///
    /// A label resolves where its `MarkLabel` line sits, or, for the exit label of an
    /// exception block, where the block's `EndExceptionBlock` line sits.
    #[must_use]
    pub fn label_offsets(&self) -> HashMap<u32, u32> {
        self.lines
            .iter()
            .filter_map(|line| match &line.instruction {
                Instruction::MarkLabel(label) | Instruction::EndExceptionBlock(label) => {
                    Some((label.index(), line.offset))
                }
                _ => None,
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a InstructionStream {
    type Item = &'a Line;
    type IntoIter = std::slice::Iter<'a, Line>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Disassembler::new(DisassemblyOptions::default()).write_to(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{OpCode, Operand, RecordingAssembler};

    fn op(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction::Op(Op::new(opcode, operand).unwrap())
    }

    #[test]
    fn test_offsets_are_running_sums() -> Result<()> {
        let mut stream = InstructionStream::new();
        assert_eq!(stream.push(op(OpCode::LdcI4, Operand::Int32(1)))?, 0);
        assert_eq!(stream.push(op(OpCode::Nop, Operand::None))?, 5);
        assert_eq!(stream.push(op(OpCode::Ceq, Operand::None))?, 6);
        assert_eq!(stream.push(op(OpCode::Ret, Operand::None))?, 8);
        assert_eq!(stream.end_offset(), 9);
        Ok(())
    }

    #[test]
    fn test_find_by_offset_prefers_first_line() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let label = asm.define_label();

        let mut stream = InstructionStream::new();
        stream.push(op(OpCode::Nop, Operand::None))?;
        stream.push(Instruction::MarkLabel(label))?;
        stream.push(op(OpCode::Ret, Operand::None))?;

        let (index, line) = stream.find_by_offset(1).unwrap();
        assert_eq!(index, 1);
        assert!(line.instruction().is_marker());

        assert_eq!(stream.instruction_at(1).unwrap().opcode(), OpCode::Ret);
        assert!(stream.find_by_offset(7).is_none());
        assert!(stream.instruction_at(2).is_none());
        Ok(())
    }

    #[test]
    fn test_markers_keep_offset() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let label = asm.define_label();

        let mut stream = InstructionStream::new();
        stream.push(op(OpCode::LdcI4, Operand::Int32(1)))?;
        stream.push_marker(Instruction::DefineLabel(label.clone()));
        stream.push_marker(Instruction::MarkLabel(label));

        assert_eq!(stream.len(), 3);
        assert_eq!(stream.end_offset(), 5);
        assert!(stream.iter().skip(1).all(|line| line.offset() == 5));
        assert_eq!(stream.push(op(OpCode::Ret, Operand::None))?, 5);
        Ok(())
    }

    #[test]
    fn test_truncate_restores_end_offset() -> Result<()> {
        let mut stream = InstructionStream::new();
        stream.push(op(OpCode::LdcI4, Operand::Int32(1)))?;
        stream.push(op(OpCode::LdcI4, Operand::Int32(2)))?;
        stream.push(op(OpCode::Add, Operand::None))?;

        stream.truncate_after(0);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.end_offset(), 5);

        stream.truncate(10);
        assert_eq!(stream.len(), 1);

        stream.truncate(0);
        assert!(stream.is_empty());
        assert_eq!(stream.end_offset(), 0);
        Ok(())
    }
}
