//! Re-emission of a recorded stream into another emitter.
//!
//! Replaying walks the lines of an [`InstructionStream`] in order and performs the same
//! call on the target for each one. Labels and locals are allocated afresh by the target
//! and every symbolic operand is translated through index maps, so the replayed body is
//! owned entirely by the target.

use std::collections::HashMap;

use log::debug;

use crate::{
    assembly::{
        emitter::Emitter,
        instruction::{Instruction, Op},
        InstructionStream, Label, Local, Operand,
    },
    Result,
};

#[derive(Default)]
struct SymbolMap {
    labels: HashMap<u32, Label>,
    locals: HashMap<u32, Local>,
}

impl SymbolMap {
    fn label(&self, label: &Label) -> Result<Label> {
        self.labels.get(&label.index()).cloned().ok_or_else(|| {
            malformed_error!("Replayed stream uses {} before defining it", label)
        })
    }

    fn local(&self, local: &Local) -> Result<Local> {
        self.locals.get(&local.index()).cloned().ok_or_else(|| {
            malformed_error!("Replayed stream uses {} before declaring it", local)
        })
    }

    fn operand(&self, op: &Op) -> Result<Operand> {
        Ok(match op.operand() {
            Operand::Label(label) => Operand::Label(self.label(label)?),
            Operand::Labels(labels) => Operand::Labels(
                labels
                    .iter()
                    .map(|label| self.label(label))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Operand::Local(local) => Operand::Local(self.local(local)?),
            other => other.clone(),
        })
    }
}

impl InstructionStream {
    /// Re-emits every line of this stream into `target`.
    ///
    /// The target may be a fresh [`crate::assembly::RecordingAssembler`], a
    /// [`crate::assembly::BackedAssembler`] driving a real sink, or any other
    /// [`Emitter`]. Replaying a finished stream into an empty recorder reproduces the
    /// same offsets and instructions.
    ///
    /// # Errors
    ///
    /// Propagates the first error reported by the target, and returns
    /// [`crate::Error::Malformed`] if the stream references a label or local before
    /// allocating it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cilemit::prelude::*;
    ///
    /// let mut first = RecordingAssembler::new();
    /// let end = first.define_label();
    /// first.emit_label(OpCode::BrS, &end)?.mark_label(&end)?.ret()?;
    /// let stream = first.finish()?;
    ///
    /// let mut second = BackedAssembler::new(BytecodeSink::new());
    /// stream.replay_into(&mut second)?;
    /// let (_, sink) = second.finish()?;
    /// assert_eq!(sink.finish()?.code, vec![0x2B, 0x00, 0x2A]);
    /// # Ok::<(), cilemit::Error>(())
    /// ```
    pub fn replay_into<E: Emitter>(&self, target: &mut E) -> Result<()> {
        let mut map = SymbolMap::default();

        for line in self {
            match line.instruction() {
                Instruction::Op(op) => {
                    let operand = map.operand(op)?;
                    target.emit_operand(op.opcode(), operand)?;
                }
                Instruction::DefineLabel(label) => {
                    let fresh = target.create_label(label.name())?;
                    map.labels.insert(label.index(), fresh);
                }
                Instruction::MarkLabel(label) => {
                    let mapped = map.label(label)?;
                    target.mark_label(&mapped)?;
                }
                Instruction::DeclareLocal(local) => {
                    let fresh =
                        target.create_local(local.ty().clone(), local.is_pinned(), local.name())?;
                    map.locals.insert(local.index(), fresh);
                }
                Instruction::BeginExceptionBlock(exit) => {
                    let fresh = target.begin_exception_block()?;
                    map.labels.insert(exit.index(), fresh);
                }
                Instruction::BeginCatchBlock(exception_type) => {
                    target.begin_catch_block(exception_type.as_ref())?;
                }
                Instruction::BeginExceptFilterBlock => {
                    target.begin_except_filter_block()?;
                }
                Instruction::BeginFinallyBlock => {
                    target.begin_finally_block()?;
                }
                Instruction::BeginFaultBlock => {
                    target.begin_fault_block()?;
                }
                Instruction::EndExceptionBlock(_) => {
                    target.end_exception_block()?;
                }
                Instruction::BeginScope => {
                    target.begin_scope()?;
                }
                Instruction::EndScope => {
                    target.end_scope()?;
                }
            }
        }

        debug!(
            "replayed {} lines ({} labels, {} locals)",
            self.len(),
            map.labels.len(),
            map.locals.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::{EmitExt, Emitter, OpCode, RecordingAssembler},
        metadata::{handles::TypeHandle, token::Token},
        Result,
    };

    #[test]
    fn test_replay_reproduces_offsets() -> Result<()> {
        let ty = TypeHandle::new(Token::new(0x0100_0005), "System.Exception");
        let mut first = RecordingAssembler::new();
        let counter = first.declare_named_local(ty.clone(), false, "counter");
        let top = first.define_named_label("top");

        first.ldc_i4(0)?.stloc(&counter)?.mark_label(&top)?;
        let exit = first.begin_exception_block()?;
        first.ldloc(&counter)?.emit_label(OpCode::Leave, &exit)?;
        first.begin_catch_block(Some(&ty))?.emit(OpCode::Pop)?;
        first.emit_label(OpCode::LeaveS, &exit)?;
        first.end_exception_block()?;
        first.emit_label(OpCode::Br, &top)?;
        let original = first.finish()?;

        let mut second = RecordingAssembler::new();
        original.replay_into(&mut second)?;
        let copy = second.finish()?;

        assert_eq!(copy.len(), original.len());
        for (a, b) in original.iter().zip(copy.iter()) {
            assert_eq!(a.offset(), b.offset());
            assert_eq!(a.instruction().name(), b.instruction().name());
        }
        assert_eq!(copy.label_offsets(), original.label_offsets());
        Ok(())
    }
}
