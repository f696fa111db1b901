//! The recording assembler.
//!
//! [`RecordingAssembler`] needs no backend. It validates every call, keeps the label and
//! local rosters, and appends to its [`InstructionStream`]. The stream is a complete
//! record of the session: allocations and region markers are recorded alongside the real
//! instructions, so it can be disassembled, inspected or replayed into another emitter.
//!
//! Speculative emission is supported through [`RecordingAssembler::checkpoint`] and
//! [`RecordingAssembler::rewind`].

use std::ops::Range;

use log::{debug, trace};

use crate::{
    assembly::{
        emitter::Emitter,
        instruction::{Instruction, Op},
        region::{RegionCall, RegionStack},
        symbols::AssemblerId,
        InstructionStream, Label, Local, OpCode, Operand,
    },
    metadata::handles::TypeHandle,
    Error, ReferenceFault, Result,
};

#[derive(Debug, Clone)]
struct LabelSlot {
    label: Label,
    /// Index of the line that resolved the label
    mark: Option<usize>,
}

/// A saved assembler state that [`RecordingAssembler::rewind`] can return to.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    owner: AssemblerId,
    serial: u32,
    lines: usize,
    labels: usize,
    locals: usize,
    regions: RegionStack,
}

impl Checkpoint {
    /// Number of stream lines at the time the checkpoint was taken.
    #[must_use]
    pub fn lines(&self) -> usize {
        self.lines
    }
}

/// Backend-less assembler that records a validated instruction stream.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = RecordingAssembler::new();
/// let skip = asm.define_label();
///
/// asm.ldarg(0)?
///     .emit_label(OpCode::Brtrue, &skip)?
///     .ldc_i4(42)?
///     .ret()?
///     .mark_label(&skip)?
///     .ldc_i4(0)?
///     .ret()?;
///
/// let stream = asm.finish()?;
/// assert_eq!(stream.end_offset(), 1 + 5 + 2 + 1 + 1 + 1);
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug)]
pub struct RecordingAssembler {
    id: AssemblerId,
    revision: u32,
    stream: InstructionStream,
    labels: Vec<LabelSlot>,
    locals: Vec<Local>,
    regions: RegionStack,
    next_checkpoint: u32,
    stale_checkpoints: Vec<Range<u32>>,
}

impl Default for RecordingAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingAssembler {
    /// Creates an assembler with an empty stream and a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        let id = AssemblerId::next();
        debug!("assembler {id}: created");
        RecordingAssembler {
            id,
            revision: 0,
            stream: InstructionStream::new(),
            labels: Vec::new(),
            locals: Vec::new(),
            regions: RegionStack::new(),
            next_checkpoint: 0,
            stale_checkpoints: Vec::new(),
        }
    }

    /// Identity of this assembler; every label and local it hands out carries it.
    #[must_use]
    pub fn id(&self) -> AssemblerId {
        self.id
    }

    /// Allocates a new label. Never fails.
    pub fn define_label(&mut self) -> Label {
        self.allocate_label(None, true)
    }

    /// Allocates a new label with a debug name. Never fails.
    pub fn define_named_label(&mut self, name: &str) -> Label {
        self.allocate_label(Some(name), true)
    }

    /// Declares a local of type `ty`. Its index is the number of locals declared so far.
    pub fn declare_local(&mut self, ty: TypeHandle, pinned: bool) -> Local {
        self.allocate_local(ty, pinned, None)
    }

    /// Declares a local with a debug name.
    pub fn declare_named_local(&mut self, ty: TypeHandle, pinned: bool, name: &str) -> Local {
        self.allocate_local(ty, pinned, Some(name))
    }

    /// Declared locals in index order.
    #[must_use]
    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    /// Number of labels allocated, exit labels included.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if `label` belongs to this assembler and has been resolved.
    #[must_use]
    pub fn is_marked(&self, label: &Label) -> bool {
        self.label_slot(label)
            .map(|slot| slot.mark.is_some())
            .unwrap_or(false)
    }

    /// Currently open regions and scopes.
    #[must_use]
    pub fn regions(&self) -> &RegionStack {
        &self.regions
    }

    /// Saves the current state.
    pub fn checkpoint(&mut self) -> Checkpoint {
        let serial = self.next_checkpoint;
        self.next_checkpoint = self.next_checkpoint.wrapping_add(1);
        debug!(
            "assembler {}: checkpoint {serial} at line {}",
            self.id,
            self.stream.len()
        );

        Checkpoint {
            owner: self.id,
            serial,
            lines: self.stream.len(),
            labels: self.labels.len(),
            locals: self.locals.len(),
            regions: self.regions.clone(),
        }
    }

    /// Discards everything recorded after `checkpoint`.
    ///
    /// Labels and locals allocated after the checkpoint become invalid; using them fails
    /// with [`ReferenceFault::Invalidated`]. Marks recorded after the checkpoint are
    /// undone and the region stack is restored. Checkpoints taken after `checkpoint`
    /// can no longer be rewound to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the checkpoint belongs to another assembler or was
    /// discarded by an earlier rewind.
    pub fn rewind(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.owner != self.id {
            return Err(malformed_error!(
                "Checkpoint from assembler {} used on assembler {}",
                checkpoint.owner,
                self.id
            ));
        }
        if self
            .stale_checkpoints
            .iter()
            .any(|range| range.contains(&checkpoint.serial))
        {
            return Err(malformed_error!(
                "Checkpoint {} was discarded by an earlier rewind",
                checkpoint.serial
            ));
        }

        let discarded = self.stream.len().saturating_sub(checkpoint.lines);
        self.stream.truncate(checkpoint.lines);
        self.labels.truncate(checkpoint.labels);
        for slot in &mut self.labels {
            if slot.mark.is_some_and(|line| line >= checkpoint.lines) {
                slot.mark = None;
            }
        }
        self.locals.truncate(checkpoint.locals);
        self.regions = checkpoint.regions.clone();
        self.revision = self.revision.wrapping_add(1);

        let stale = checkpoint.serial.saturating_add(1)..self.next_checkpoint;
        if !stale.is_empty() {
            self.stale_checkpoints.push(stale);
        }

        debug!(
            "assembler {}: rewound to checkpoint {}, discarded {discarded} lines",
            self.id, checkpoint.serial
        );
        Ok(())
    }

    /// Completes the session and returns the recorded stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionViolation`] if a region or scope is still open, and
    /// [`Error::UnmarkedLabel`] if a branch targets a label that was never marked.
    pub fn finish(self) -> Result<InstructionStream> {
        if !self.regions.is_empty() {
            return Err(Error::RegionViolation {
                operation: "finish",
                message: format!("{} region(s) still open", self.regions.depth()),
            });
        }

        for (_, op) in self.stream.ops() {
            for label in op.operand().labels() {
                let marked = self
                    .labels
                    .get(label.index() as usize)
                    .is_some_and(|slot| slot.mark.is_some());
                if !marked {
                    return Err(Error::UnmarkedLabel(label.clone()));
                }
            }
        }

        debug!(
            "assembler {}: finished with {} lines, {} bytes, {} labels, {} locals",
            self.id,
            self.stream.len(),
            self.stream.end_offset(),
            self.labels.len(),
            self.locals.len()
        );
        Ok(self.stream)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn mint_label(&mut self, name: Option<&str>) -> Label {
        let label = Label::new(self.id, self.revision, self.labels.len() as u32, name);
        self.labels.push(LabelSlot {
            label: label.clone(),
            mark: None,
        });
        label
    }

    fn allocate_label(&mut self, name: Option<&str>, record: bool) -> Label {
        let label = self.mint_label(name);
        if record {
            self.stream.push_marker(Instruction::DefineLabel(label.clone()));
        }
        trace!("assembler {}: define {label}", self.id);
        label
    }

    #[allow(clippy::cast_possible_truncation)]
    fn allocate_local(&mut self, ty: TypeHandle, pinned: bool, name: Option<&str>) -> Local {
        let local = Local::new(
            self.id,
            self.revision,
            self.locals.len() as u32,
            ty,
            pinned,
            name,
        );
        self.locals.push(local.clone());
        self.stream.push_marker(Instruction::DeclareLocal(local.clone()));
        trace!(
            "assembler {}: declare {local} ({}{})",
            self.id,
            local.ty(),
            if pinned { ", pinned" } else { "" }
        );
        local
    }

    fn label_slot(&self, label: &Label) -> Result<&LabelSlot> {
        let fault = if label.owner() != self.id {
            ReferenceFault::Foreign
        } else {
            match self.labels.get(label.index() as usize) {
                Some(slot) if slot.label == *label => return Ok(slot),
                _ => ReferenceFault::Invalidated,
            }
        };

        Err(Error::InvalidLabel {
            label: label.clone(),
            fault,
        })
    }

    pub(crate) fn check_label(&self, label: &Label) -> Result<()> {
        self.label_slot(label).map(|_| ())
    }

    pub(crate) fn check_local(&self, local: &Local) -> Result<()> {
        let fault = if local.owner() != self.id {
            ReferenceFault::Foreign
        } else {
            match self.locals.get(local.index() as usize) {
                Some(slot) if slot == local => return Ok(()),
                Some(slot) if slot.same_slot(local) => ReferenceFault::Mismatched,
                _ => ReferenceFault::Invalidated,
            }
        };

        Err(Error::InvalidLocal {
            local: local.clone(),
            fault,
        })
    }

    /// Validates that `label` may be marked now.
    pub(crate) fn check_mark(&self, label: &Label) -> Result<()> {
        if self.label_slot(label)?.mark.is_some() {
            return Err(Error::InvalidLabel {
                label: label.clone(),
                fault: ReferenceFault::AlreadyMarked,
            });
        }
        Ok(())
    }

    /// Validates a region transition, including that the exit label is still unmarked
    /// when the region is being closed.
    pub(crate) fn check_region(&self, call: RegionCall) -> Result<()> {
        self.regions.check(call)?;
        if call == RegionCall::End {
            if let Some(exit) = self.regions.innermost_exit() {
                self.check_mark(exit)?;
            }
        }
        Ok(())
    }

    /// Validates an instruction without recording it.
    pub(crate) fn prepare(&self, opcode: OpCode, operand: Operand) -> Result<Op> {
        let op = Op::new(opcode, operand)?;

        for label in op.operand().labels() {
            self.label_slot(label)?;
        }
        if let Operand::Local(local) = op.operand() {
            self.check_local(local)?;
        }

        if self.stream.end_offset().checked_add(op.size()).is_none() {
            return Err(malformed_error!(
                "Emitting '{}' at {} overflows the body size",
                opcode,
                self.stream.end_offset()
            ));
        }
        Ok(op)
    }

    /// Appends an instruction produced by [`RecordingAssembler::prepare`].
    pub(crate) fn record(&mut self, op: Op) -> Result<()> {
        let (opcode, size) = (op.opcode(), op.size());
        let offset = self.stream.push(Instruction::Op(op))?;
        trace!("assembler {}: IL_{offset:04x} {opcode} ({size} bytes)", self.id);
        Ok(())
    }

    fn transition(&mut self, call: RegionCall, instruction: Instruction) -> Result<()> {
        self.check_region(call)?;

        let line = self.stream.len();
        self.stream.push(instruction)?;
        if let Some(exit) = self.regions.apply(call)? {
            if let Some(slot) = self.labels.get_mut(exit.index() as usize) {
                slot.mark = Some(line);
            }
        }

        trace!(
            "assembler {}: {} (depth {})",
            self.id,
            call.operation(),
            self.regions.depth()
        );
        Ok(())
    }
}

impl Emitter for RecordingAssembler {
    fn create_label(&mut self, name: Option<&str>) -> Result<Label> {
        Ok(self.allocate_label(name, true))
    }

    fn mark_label(&mut self, label: &Label) -> Result<&mut Self> {
        self.check_mark(label)?;

        let line = self.stream.len();
        let offset = self.stream.push(Instruction::MarkLabel(label.clone()))?;
        if let Some(slot) = self.labels.get_mut(label.index() as usize) {
            slot.mark = Some(line);
        }

        trace!("assembler {}: mark {label} at IL_{offset:04x}", self.id);
        Ok(self)
    }

    fn create_local(&mut self, ty: TypeHandle, pinned: bool, name: Option<&str>) -> Result<Local> {
        Ok(self.allocate_local(ty, pinned, name))
    }

    fn emit_operand(&mut self, opcode: OpCode, operand: Operand) -> Result<&mut Self> {
        let op = self.prepare(opcode, operand)?;
        self.record(op)?;
        Ok(self)
    }

    fn begin_exception_block(&mut self) -> Result<Label> {
        let exit = self.allocate_label(None, false);
        self.stream
            .push(Instruction::BeginExceptionBlock(exit.clone()))?;
        self.regions.push_try(exit.clone());

        trace!(
            "assembler {}: begin_exception_block exit {exit} (depth {})",
            self.id,
            self.regions.depth()
        );
        Ok(exit)
    }

    fn begin_catch_block(&mut self, exception_type: Option<&TypeHandle>) -> Result<&mut Self> {
        self.transition(
            RegionCall::Catch {
                typed: exception_type.is_some(),
            },
            Instruction::BeginCatchBlock(exception_type.cloned()),
        )?;
        Ok(self)
    }

    fn begin_except_filter_block(&mut self) -> Result<&mut Self> {
        self.transition(RegionCall::Filter, Instruction::BeginExceptFilterBlock)?;
        Ok(self)
    }

    fn begin_finally_block(&mut self) -> Result<&mut Self> {
        self.transition(RegionCall::Finally, Instruction::BeginFinallyBlock)?;
        Ok(self)
    }

    fn begin_fault_block(&mut self) -> Result<&mut Self> {
        self.transition(RegionCall::Fault, Instruction::BeginFaultBlock)?;
        Ok(self)
    }

    fn end_exception_block(&mut self) -> Result<&mut Self> {
        self.check_region(RegionCall::End)?;
        let Some(exit) = self.regions.innermost_exit().cloned() else {
            return Err(Error::RegionViolation {
                operation: "end_exception_block",
                message: "no exception region is open".to_string(),
            });
        };

        self.transition(RegionCall::End, Instruction::EndExceptionBlock(exit))?;
        Ok(self)
    }

    fn begin_scope(&mut self) -> Result<&mut Self> {
        self.stream.push(Instruction::BeginScope)?;
        self.regions.push_scope();
        trace!("assembler {}: begin_scope", self.id);
        Ok(self)
    }

    fn end_scope(&mut self) -> Result<&mut Self> {
        self.transition(RegionCall::EndScope, Instruction::EndScope)?;
        Ok(self)
    }

    fn stream(&self) -> &InstructionStream {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::EmitExt,
        metadata::{handles::MethodHandle, token::Token},
    };

    fn int32() -> TypeHandle {
        TypeHandle::new(Token::new(0x0100_0001), "int32")
    }

    #[test]
    fn test_define_label_records_marker() {
        let mut asm = RecordingAssembler::new();
        let a = asm.define_label();
        let b = asm.define_named_label("exit");

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(b.name(), Some("exit"));
        assert_eq!(asm.stream().len(), 2);
        assert_eq!(asm.stream().end_offset(), 0);
    }

    #[test]
    fn test_double_mark_rejected() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let label = asm.define_label();
        asm.mark_label(&label)?;
        assert!(asm.is_marked(&label));

        let before = asm.stream().len();
        let result = asm.mark_label(&label);
        assert!(matches!(
            result,
            Err(Error::InvalidLabel {
                fault: ReferenceFault::AlreadyMarked,
                ..
            })
        ));
        assert_eq!(asm.stream().len(), before);
        Ok(())
    }

    #[test]
    fn test_foreign_local_rejected() {
        let mut first = RecordingAssembler::new();
        let mut second = RecordingAssembler::new();
        let local = first.declare_local(int32(), false);
        second.declare_local(int32(), false);

        let result = second.emit_local(OpCode::LdlocS, &local);
        assert!(matches!(
            result,
            Err(Error::InvalidLocal {
                fault: ReferenceFault::Foreign,
                ..
            })
        ));
    }

    #[test]
    fn test_operand_checked_before_append() {
        let mut asm = RecordingAssembler::new();
        let method = MethodHandle::new(Token::new(0x0600_0001), "Program::Run");

        assert!(asm.emit_method(OpCode::Ldfld, &method).is_err());
        assert!(asm.emit_i32(OpCode::Ret, 1).is_err());
        assert!(asm.stream().is_empty());
    }

    #[test]
    fn test_rewind_discards_tail() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let kept = asm.define_label();
        asm.ldc_i4(1)?;

        let checkpoint = asm.checkpoint();
        let dropped = asm.define_label();
        let local = asm.declare_local(int32(), false);
        asm.mark_label(&kept)?.stloc(&local)?;
        asm.begin_exception_block()?;

        asm.rewind(&checkpoint)?;
        assert_eq!(asm.stream().len(), checkpoint.lines());
        assert_eq!(asm.stream().end_offset(), 1);
        assert!(asm.locals().is_empty());
        assert!(asm.regions().is_empty());
        assert!(!asm.is_marked(&kept));

        let result = asm.mark_label(&dropped);
        assert!(matches!(
            result,
            Err(Error::InvalidLabel {
                fault: ReferenceFault::Invalidated,
                ..
            })
        ));

        // the reused index does not revive the discarded handle
        let fresh = asm.define_label();
        assert_eq!(fresh.index(), dropped.index());
        assert_ne!(fresh, dropped);
        assert!(asm.stloc(&local).is_err());

        asm.mark_label(&kept)?.ret()?;
        Ok(())
    }

    #[test]
    fn test_stale_checkpoint_rejected() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let outer = asm.checkpoint();
        asm.ldc_i4(1)?;
        let inner = asm.checkpoint();
        asm.ldc_i4(2)?;

        asm.rewind(&outer)?;
        asm.ldc_i4(3)?.ldc_i4(4)?;
        assert!(asm.rewind(&inner).is_err());
        asm.rewind(&outer)?;
        assert!(asm.stream().is_empty());

        let mut other = RecordingAssembler::new();
        assert!(other.rewind(&outer).is_err());
        Ok(())
    }

    #[test]
    fn test_finish_rejects_unmarked_target() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let label = asm.define_label();
        asm.emit_label(OpCode::Br, &label)?;

        assert!(matches!(asm.finish(), Err(Error::UnmarkedLabel(l)) if l == label));
        Ok(())
    }

    #[test]
    fn test_finish_rejects_open_scope() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        asm.begin_scope()?.ret()?;
        assert!(matches!(
            asm.finish(),
            Err(Error::RegionViolation {
                operation: "finish",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_exit_label_resolves_at_end() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let exit = asm.begin_exception_block()?;
        asm.emit(OpCode::Nop)?.emit_label(OpCode::LeaveS, &exit)?;
        asm.begin_finally_block()?.emit(OpCode::Endfinally)?;
        asm.end_exception_block()?;
        asm.ret()?;

        assert!(asm.is_marked(&exit));
        assert!(asm.mark_label(&exit).is_err());

        let stream = asm.finish()?;
        assert_eq!(stream.label_offsets().get(&exit.index()), Some(&4));
        Ok(())
    }
}
