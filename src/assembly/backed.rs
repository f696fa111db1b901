//! The backed assembler: recording plus a live code-generation sink.
//!
//! [`BackedAssembler`] wraps a [`RecordingAssembler`] and a [`CodeSink`]. Every call is
//! validated by the recorder first, then forwarded to the sink with symbolic labels and
//! locals translated to the sink's own objects, and finally recorded. The translation
//! tables are plain vectors indexed by roster position, kept in lockstep with the
//! recorder's rosters.
//!
//! Forwarded operations cannot be retracted, so there is no rewind here.

use std::fmt;

use log::trace;

use crate::{
    assembly::{
        emitter::Emitter,
        instruction::Op,
        region::RegionCall,
        InstructionStream, Label, Local, OpCode, Operand, RecordingAssembler,
    },
    metadata::handles::{ConstructorHandle, FieldHandle, MethodHandle, TypeHandle},
    Result,
};

/// A write-only code generator driven by [`BackedAssembler`].
///
/// The sink receives exactly one call per recorded instruction or marker, in emission
/// order. Opcodes arrive already validated against their operand category.
pub trait CodeSink {
    /// The sink's concrete label type.
    type Label: Clone + fmt::Debug;
    /// The sink's concrete local type.
    type Local: Clone + fmt::Debug;

    /// Creates a label.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn define_label(&mut self) -> Result<Self::Label>;

    /// Declares a local slot.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn declare_local(&mut self, ty: &TypeHandle, pinned: bool) -> Result<Self::Local>;

    /// Places `label` at the current position.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn mark_label(&mut self, label: &Self::Label) -> Result<()>;

    /// Emits an opcode without operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit(&mut self, opcode: OpCode) -> Result<()>;

    /// Emits an opcode with a signed 8-bit operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_i8(&mut self, opcode: OpCode, value: i8) -> Result<()>;

    /// Emits an opcode with an unsigned 8-bit operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_u8(&mut self, opcode: OpCode, value: u8) -> Result<()>;

    /// Emits an opcode with an unsigned 16-bit operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_u16(&mut self, opcode: OpCode, value: u16) -> Result<()>;

    /// Emits an opcode with a signed 32-bit operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_i32(&mut self, opcode: OpCode, value: i32) -> Result<()>;

    /// Emits an opcode with a signed 64-bit operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_i64(&mut self, opcode: OpCode, value: i64) -> Result<()>;

    /// Emits an opcode with a 32-bit float operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_f32(&mut self, opcode: OpCode, value: f32) -> Result<()>;

    /// Emits an opcode with a 64-bit float operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_f64(&mut self, opcode: OpCode, value: f64) -> Result<()>;

    /// Emits an opcode with a string literal.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_string(&mut self, opcode: OpCode, value: &str) -> Result<()>;

    /// Emits a branch to `target`.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_label(&mut self, opcode: OpCode, target: &Self::Label) -> Result<()>;

    /// Emits a jump table.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_switch(&mut self, opcode: OpCode, targets: &[Self::Label]) -> Result<()>;

    /// Emits an opcode that addresses `local`.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_local(&mut self, opcode: OpCode, local: &Self::Local) -> Result<()>;

    /// Emits an opcode with a field operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_field(&mut self, opcode: OpCode, field: &FieldHandle) -> Result<()>;

    /// Emits an opcode with a method operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_method(&mut self, opcode: OpCode, method: &MethodHandle) -> Result<()>;

    /// Emits an opcode with a constructor operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_constructor(&mut self, opcode: OpCode, constructor: &ConstructorHandle)
        -> Result<()>;

    /// Emits an opcode with a type operand.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn emit_type(&mut self, opcode: OpCode, ty: &TypeHandle) -> Result<()>;

    /// Opens a protected region and returns the label of its exit point.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_exception_block(&mut self) -> Result<Self::Label>;

    /// Opens a catch handler; `None` for a catch-all, or for the handler of a filter.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_catch_block(&mut self, exception_type: Option<&TypeHandle>) -> Result<()>;

    /// Opens a filter block.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_except_filter_block(&mut self) -> Result<()>;

    /// Opens a finally handler.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_finally_block(&mut self) -> Result<()>;

    /// Opens a fault handler.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_fault_block(&mut self) -> Result<()>;

    /// Closes the innermost protected region.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn end_exception_block(&mut self) -> Result<()>;

    /// Opens a lexical scope. Sinks without scope support ignore it.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn begin_scope(&mut self) -> Result<()> {
        Ok(())
    }

    /// Closes a lexical scope. Sinks without scope support ignore it.
    ///
    /// # Errors
    ///
    /// Sink-specific.
    fn end_scope(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An assembler that records and drives a [`CodeSink`] at the same time.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = BackedAssembler::new(BytecodeSink::new());
/// let done = asm.define_label()?;
/// asm.ldarg(0)?
///     .emit_label(OpCode::BrfalseS, &done)?
///     .ldc_i4(1)?
///     .ret()?
///     .mark_label(&done)?
///     .ldc_i4(0)?
///     .ret()?;
///
/// let (stream, sink) = asm.finish()?;
/// let body = sink.finish()?;
/// assert_eq!(body.code.len() as u32, stream.end_offset());
/// assert_eq!(body.code, vec![0x02, 0x2C, 0x02, 0x17, 0x2A, 0x16, 0x2A]);
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug)]
pub struct BackedAssembler<S: CodeSink> {
    recorder: RecordingAssembler,
    sink: S,
    labels: Vec<S::Label>,
    locals: Vec<S::Local>,
}

impl<S: CodeSink> BackedAssembler<S> {
    /// Creates an assembler that forwards to `sink`.
    pub fn new(sink: S) -> Self {
        BackedAssembler {
            recorder: RecordingAssembler::new(),
            sink,
            labels: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// The recording half.
    #[must_use]
    pub fn recorder(&self) -> &RecordingAssembler {
        &self.recorder
    }

    /// The sink, for inspection. Writing to it directly would desynchronize the record.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink's label paired with `label`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidLabel`] if `label` is not owned by this assembler.
    pub fn sink_label(&self, label: &Label) -> Result<&S::Label> {
        self.recorder.check_label(label)?;
        self.labels
            .get(label.index() as usize)
            .ok_or_else(|| malformed_error!("Label roster out of sync at {}", label.index()))
    }

    /// The sink's local paired with `local`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidLocal`] if `local` is not owned by this assembler.
    pub fn sink_local(&self, local: &Local) -> Result<&S::Local> {
        self.recorder.check_local(local)?;
        self.locals
            .get(local.index() as usize)
            .ok_or_else(|| malformed_error!("Local roster out of sync at {}", local.index()))
    }

    /// Completes the session, returning the recorded stream and the sink.
    ///
    /// # Errors
    ///
    /// See [`RecordingAssembler::finish`].
    pub fn finish(self) -> Result<(InstructionStream, S)> {
        let stream = self.recorder.finish()?;
        Ok((stream, self.sink))
    }

    fn forward(&mut self, op: &Op) -> Result<()> {
        let opcode = op.opcode();
        match op.operand() {
            Operand::None => self.sink.emit(opcode),
            Operand::Int8(value) => self.sink.emit_i8(opcode, *value),
            Operand::UInt8(value) => self.sink.emit_u8(opcode, *value),
            Operand::UInt16(value) => self.sink.emit_u16(opcode, *value),
            Operand::Int32(value) => self.sink.emit_i32(opcode, *value),
            Operand::Int64(value) => self.sink.emit_i64(opcode, *value),
            Operand::Float32(value) => self.sink.emit_f32(opcode, *value),
            Operand::Float64(value) => self.sink.emit_f64(opcode, *value),
            Operand::String(value) => self.sink.emit_string(opcode, value),
            Operand::Label(target) => {
                let target = self.sink_label(target)?.clone();
                self.sink.emit_label(opcode, &target)
            }
            Operand::Labels(targets) => {
                let targets = targets
                    .iter()
                    .map(|target| self.sink_label(target).cloned())
                    .collect::<Result<Vec<_>>>()?;
                self.sink.emit_switch(opcode, &targets)
            }
            Operand::Local(local) => {
                let local = self.sink_local(local)?.clone();
                self.sink.emit_local(opcode, &local)
            }
            Operand::Field(field) => self.sink.emit_field(opcode, field),
            Operand::Constructor(ctor) => self.sink.emit_constructor(opcode, ctor),
            Operand::Method(method) => self.sink.emit_method(opcode, method),
            Operand::Type(ty) => self.sink.emit_type(opcode, ty),
        }
    }

    fn region<F>(&mut self, call: RegionCall, forward: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()>,
    {
        self.recorder.check_region(call)?;
        forward(&mut self.sink)?;
        trace!("backed: forwarded {}", call.operation());
        Ok(())
    }
}

impl<S: CodeSink> Emitter for BackedAssembler<S> {
    fn create_label(&mut self, name: Option<&str>) -> Result<Label> {
        let concrete = self.sink.define_label()?;
        let label = self.recorder.create_label(name)?;
        self.labels.push(concrete);
        Ok(label)
    }

    fn mark_label(&mut self, label: &Label) -> Result<&mut Self> {
        self.recorder.check_mark(label)?;
        let concrete = self.sink_label(label)?.clone();
        self.sink.mark_label(&concrete)?;
        self.recorder.mark_label(label)?;
        Ok(self)
    }

    fn create_local(&mut self, ty: TypeHandle, pinned: bool, name: Option<&str>) -> Result<Local> {
        let concrete = self.sink.declare_local(&ty, pinned)?;
        let local = self.recorder.create_local(ty, pinned, name)?;
        self.locals.push(concrete);
        Ok(local)
    }

    fn emit_operand(&mut self, opcode: OpCode, operand: Operand) -> Result<&mut Self> {
        let op = self.recorder.prepare(opcode, operand)?;
        self.forward(&op)?;
        trace!("backed: forwarded {}", op.opcode());
        self.recorder.record(op)?;
        Ok(self)
    }

    fn begin_exception_block(&mut self) -> Result<Label> {
        let concrete = self.sink.begin_exception_block()?;
        let exit = self.recorder.begin_exception_block()?;
        self.labels.push(concrete);
        Ok(exit)
    }

    fn begin_catch_block(&mut self, exception_type: Option<&TypeHandle>) -> Result<&mut Self> {
        let call = RegionCall::Catch {
            typed: exception_type.is_some(),
        };
        self.region(call, |sink| sink.begin_catch_block(exception_type))?;
        self.recorder.begin_catch_block(exception_type)?;
        Ok(self)
    }

    fn begin_except_filter_block(&mut self) -> Result<&mut Self> {
        self.region(RegionCall::Filter, CodeSink::begin_except_filter_block)?;
        self.recorder.begin_except_filter_block()?;
        Ok(self)
    }

    fn begin_finally_block(&mut self) -> Result<&mut Self> {
        self.region(RegionCall::Finally, CodeSink::begin_finally_block)?;
        self.recorder.begin_finally_block()?;
        Ok(self)
    }

    fn begin_fault_block(&mut self) -> Result<&mut Self> {
        self.region(RegionCall::Fault, CodeSink::begin_fault_block)?;
        self.recorder.begin_fault_block()?;
        Ok(self)
    }

    fn end_exception_block(&mut self) -> Result<&mut Self> {
        self.region(RegionCall::End, CodeSink::end_exception_block)?;
        self.recorder.end_exception_block()?;
        Ok(self)
    }

    fn begin_scope(&mut self) -> Result<&mut Self> {
        self.sink.begin_scope()?;
        self.recorder.begin_scope()?;
        Ok(self)
    }

    fn end_scope(&mut self) -> Result<&mut Self> {
        self.region(RegionCall::EndScope, CodeSink::end_scope)?;
        self.recorder.end_scope()?;
        Ok(self)
    }

    fn stream(&self) -> &InstructionStream {
        self.recorder.stream()
    }
}
