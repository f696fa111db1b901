//! Bytecode sink: turns forwarded emission calls into a CIL method body.
//!
//! [`BytecodeSink`] is a [`CodeSink`] that writes opcode and operand bytes as they arrive.
//! Branch and switch displacements are written as placeholders and patched when the body
//! is finished, once every label has a position. Branch widths are never changed: a
//! `br.s` whose target ends up more than 127 bytes away is reported, not widened, which
//! keeps the encoded length identical to the recorded stream's offsets.
//!
//! The sink also collects local variable types, builds the exception clause table as
//! regions close, and interns `ldstr` literals into a user string heap.

use log::debug;

use crate::{
    assembly::{backed::CodeSink, instruction::OperandKind, OpCode},
    metadata::{
        exceptions::{encode_exception_section, ExceptionClause, ExceptionHandlerFlags},
        handles::{ConstructorHandle, FieldHandle, MethodHandle, TypeHandle},
        token::Token,
        userstrings::UserStringHeap,
    },
    Error, Result,
};

/// A label of a [`BytecodeSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyLabel(u32);

impl BodyLabel {
    /// Position of the label in the sink's label table.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A local slot of a [`BytecodeSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyLocal(u16);

impl BodyLocal {
    /// The slot index encoded in `ldloc`/`stloc` operands.
    #[must_use]
    pub fn index(self) -> u16 {
        self.0
    }
}

/// A declared local variable of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// The variable type
    pub ty: TypeHandle,
    /// Whether the variable is pinned
    pub pinned: bool,
}

/// Label fixup information for branch instruction resolution.
#[derive(Debug, Clone)]
struct LabelFixup {
    label: BodyLabel,
    opcode: OpCode,
    /// Offset of the branch instruction
    instruction_position: u32,
    /// Offset of the displacement field
    fixup_position: u32,
    short: bool,
}

/// Switch fixup information for multi-way branch resolution.
#[derive(Debug, Clone)]
struct SwitchFixup {
    labels: Vec<BodyLabel>,
    instruction_position: u32,
    /// Offset of the first target slot (after the count)
    fixup_position: u32,
    /// Offsets are relative to this position
    instruction_end_position: u32,
}

#[derive(Debug, Clone)]
struct OpenHandler {
    flags: ExceptionHandlerFlags,
    start: u32,
    class_token: Option<Token>,
    filter_offset: Option<u32>,
    /// Still in the filter expression; the handler has not started
    awaiting_handler: bool,
    /// A finally/fault after catch handlers protects the try block and those handlers
    covers_previous: bool,
}

#[derive(Debug, Clone)]
struct OpenRegion {
    exit: BodyLabel,
    try_start: u32,
    try_end: Option<u32>,
    closed_handlers: u32,
    handler: Option<OpenHandler>,
}

/// The product of a [`BytecodeSink`].
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// CIL instruction bytes with all branch displacements resolved
    pub code: Vec<u8>,
    /// Declared locals in index order
    pub locals: Vec<LocalVariable>,
    /// Exception clauses, innermost first
    pub exception_clauses: Vec<ExceptionClause>,
    /// Literals referenced by `ldstr`
    pub user_strings: UserStringHeap,
}

impl MethodBody {
    /// Size of the code in bytes.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// True if the body has at least one exception clause.
    #[must_use]
    pub fn has_exception_handlers(&self) -> bool {
        !self.exception_clauses.is_empty()
    }

    /// The exception clauses encoded as a method data section.
    #[must_use]
    pub fn exception_section(&self) -> Vec<u8> {
        encode_exception_section(&self.exception_clauses)
    }
}

/// A [`CodeSink`] that produces CIL bytes.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut sink = BytecodeSink::new();
/// let end = sink.define_label()?;
/// sink.emit_i8(OpCode::LdcI4S, 42)?;
/// sink.emit_label(OpCode::BrS, &end)?;
/// sink.mark_label(&end)?;
/// sink.emit(OpCode::Ret)?;
///
/// let body = sink.finish()?;
/// assert_eq!(body.code, vec![0x1F, 42, 0x2B, 0x00, 0x2A]);
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct BytecodeSink {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<LabelFixup>,
    switch_fixups: Vec<SwitchFixup>,
    locals: Vec<LocalVariable>,
    regions: Vec<OpenRegion>,
    clauses: Vec<ExceptionClause>,
    user_strings: UserStringHeap,
}

impl BytecodeSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the code has outgrown `u32` offsets.
    pub fn position(&self) -> Result<u32> {
        u32::try_from(self.code.len())
            .map_err(|_| malformed_error!("Method body exceeds u32 offsets"))
    }

    /// The bytes written so far, with unresolved displacements still zero.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Resolves all branch and switch displacements and returns the finished body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] for a branch to a label that was never placed,
    /// [`Error::BranchOutOfRange`] when a displacement does not fit its encoding, and
    /// [`Error::RegionViolation`] if a protected region is still open.
    pub fn finish(mut self) -> Result<MethodBody> {
        if !self.regions.is_empty() {
            return Err(Error::RegionViolation {
                operation: "finish",
                message: format!("{} exception region(s) still open", self.regions.len()),
            });
        }

        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = self.label_position(fixup.label)?;
            let width: u32 = if fixup.short { 1 } else { 4 };
            let next = i64::from(fixup.fixup_position) + i64::from(width);
            let displacement = i64::from(target) - next;

            let out_of_range = || Error::BranchOutOfRange {
                opcode: fixup.opcode,
                position: fixup.instruction_position,
                target,
                displacement,
            };

            let at = fixup.fixup_position as usize;
            if fixup.short {
                let value = i8::try_from(displacement).map_err(|_| out_of_range())?;
                self.code[at] = value.to_le_bytes()[0];
            } else {
                let value = i32::try_from(displacement).map_err(|_| out_of_range())?;
                self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        let switch_fixups = std::mem::take(&mut self.switch_fixups);
        for fixup in &switch_fixups {
            for (slot, label) in fixup.labels.iter().enumerate() {
                let target = self.label_position(*label)?;
                let displacement =
                    i64::from(target) - i64::from(fixup.instruction_end_position);
                let value = i32::try_from(displacement).map_err(|_| Error::BranchOutOfRange {
                    opcode: OpCode::Switch,
                    position: fixup.instruction_position,
                    target,
                    displacement,
                })?;

                let at = fixup.fixup_position as usize + slot * 4;
                self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        debug!(
            "bytecode sink: {} bytes, {} fixups, {} locals, {} clauses, {} strings",
            self.code.len(),
            fixups.len() + switch_fixups.len(),
            self.locals.len(),
            self.clauses.len(),
            self.user_strings.len()
        );

        Ok(MethodBody {
            code: self.code,
            locals: self.locals,
            exception_clauses: self.clauses,
            user_strings: self.user_strings,
        })
    }

    fn label_position(&self, label: BodyLabel) -> Result<u32> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| Error::UndefinedLabel(format!("body label {}", label.0)))
    }

    fn expect_kind(opcode: OpCode, accepted: &[OperandKind], found: &str) -> Result<()> {
        let expected = opcode.operand_kind();
        if accepted.contains(&expected) {
            Ok(())
        } else {
            Err(Error::OperandMismatch {
                opcode,
                expected,
                found: found.to_string(),
            })
        }
    }

    fn write_opcode(&mut self, opcode: OpCode) {
        opcode.encode_into(&mut self.code);
    }

    fn write_token(
        &mut self,
        opcode: OpCode,
        accepted: &[OperandKind],
        token: Token,
        found: &str,
    ) -> Result<()> {
        Self::expect_kind(opcode, accepted, found)?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&token.value().to_le_bytes());
        Ok(())
    }

    fn innermost(&mut self, operation: &'static str) -> Result<&mut OpenRegion> {
        self.regions.last_mut().ok_or_else(|| Error::RegionViolation {
            operation,
            message: "no exception region is open".to_string(),
        })
    }

    /// Closes the current handler of the innermost region at `position`.
    fn close_handler(region: &mut OpenRegion, position: u32, clauses: &mut Vec<ExceptionClause>) {
        let try_end = *region.try_end.get_or_insert(position);

        if let Some(handler) = region.handler.take() {
            let handler_start = if handler.awaiting_handler {
                position
            } else {
                handler.start
            };
            let try_length = if handler.covers_previous {
                handler.start - region.try_start
            } else {
                try_end - region.try_start
            };

            clauses.push(ExceptionClause {
                flags: handler.flags,
                try_offset: region.try_start,
                try_length,
                handler_offset: handler_start,
                handler_length: position - handler_start,
                class_token: handler.class_token,
                filter_offset: handler.filter_offset,
            });
            region.closed_handlers += 1;
        }
    }

    fn open_handler(
        &mut self,
        operation: &'static str,
        flags: ExceptionHandlerFlags,
        class_token: Option<Token>,
    ) -> Result<()> {
        let position = self.position()?;
        let Some(region) = self.regions.last_mut() else {
            return Err(Error::RegionViolation {
                operation,
                message: "no exception region is open".to_string(),
            });
        };

        Self::close_handler(region, position, &mut self.clauses);
        let cleanup =
            flags.intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT);
        let filter = flags.contains(ExceptionHandlerFlags::FILTER);
        region.handler = Some(OpenHandler {
            flags,
            start: position,
            class_token,
            filter_offset: filter.then_some(position),
            awaiting_handler: filter,
            covers_previous: cleanup && region.closed_handlers > 0,
        });
        Ok(())
    }
}

impl CodeSink for BytecodeSink {
    type Label = BodyLabel;
    type Local = BodyLocal;

    fn define_label(&mut self) -> Result<BodyLabel> {
        let index = u32::try_from(self.labels.len())
            .map_err(|_| malformed_error!("Too many labels"))?;
        self.labels.push(None);
        Ok(BodyLabel(index))
    }

    fn declare_local(&mut self, ty: &TypeHandle, pinned: bool) -> Result<BodyLocal> {
        let index = u16::try_from(self.locals.len())
            .ok()
            .filter(|index| *index < u16::MAX)
            .ok_or_else(|| malformed_error!("Too many locals: {}", self.locals.len()))?;
        self.locals.push(LocalVariable {
            ty: ty.clone(),
            pinned,
        });
        Ok(BodyLocal(index))
    }

    fn mark_label(&mut self, label: &BodyLabel) -> Result<()> {
        let position = self.position()?;
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or_else(|| Error::UndefinedLabel(format!("body label {}", label.0)))?;
        if let Some(previous) = *slot {
            return Err(Error::Error(format!(
                "body label {} already placed at IL_{:04x}",
                label.0, previous
            )));
        }

        *slot = Some(position);
        Ok(())
    }

    fn emit(&mut self, opcode: OpCode) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::None], "no operand")?;
        self.write_opcode(opcode);
        Ok(())
    }

    fn emit_i8(&mut self, opcode: OpCode, value: i8) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Int8], "int8")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_u8(&mut self, opcode: OpCode, value: u8) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::UInt8], "uint8")?;
        self.write_opcode(opcode);
        self.code.push(value);
        Ok(())
    }

    fn emit_u16(&mut self, opcode: OpCode, value: u16) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::UInt16], "uint16")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_i32(&mut self, opcode: OpCode, value: i32) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Int32], "int32")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_i64(&mut self, opcode: OpCode, value: i64) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Int64], "int64")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_f32(&mut self, opcode: OpCode, value: f32) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Float32], "float32")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_f64(&mut self, opcode: OpCode, value: f64) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Float64], "float64")?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn emit_string(&mut self, opcode: OpCode, value: &str) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::String], "string")?;
        let token = self.user_strings.intern(value)?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&token.value().to_le_bytes());
        Ok(())
    }

    fn emit_label(&mut self, opcode: OpCode, target: &BodyLabel) -> Result<()> {
        Self::expect_kind(
            opcode,
            &[OperandKind::ShortBranch, OperandKind::Branch],
            "label",
        )?;
        if target.0 as usize >= self.labels.len() {
            return Err(Error::UndefinedLabel(format!("body label {}", target.0)));
        }

        let instruction_position = self.position()?;
        self.write_opcode(opcode);
        let fixup_position = self.position()?;
        let short = opcode.operand_kind() == OperandKind::ShortBranch;
        if short {
            self.code.push(0);
        } else {
            self.code.extend_from_slice(&[0; 4]);
        }

        self.fixups.push(LabelFixup {
            label: *target,
            opcode,
            instruction_position,
            fixup_position,
            short,
        });
        Ok(())
    }

    fn emit_switch(&mut self, opcode: OpCode, targets: &[BodyLabel]) -> Result<()> {
        Self::expect_kind(opcode, &[OperandKind::Switch], "labels")?;
        let count = u32::try_from(targets.len())
            .map_err(|_| malformed_error!("Too many switch targets: {}", targets.len()))?;

        let instruction_position = self.position()?;
        self.write_opcode(opcode);
        self.code.extend_from_slice(&count.to_le_bytes());
        let fixup_position = self.position()?;
        self.code.resize(self.code.len() + targets.len() * 4, 0);

        self.switch_fixups.push(SwitchFixup {
            labels: targets.to_vec(),
            instruction_position,
            fixup_position,
            instruction_end_position: self.position()?,
        });
        Ok(())
    }

    fn emit_local(&mut self, opcode: OpCode, local: &BodyLocal) -> Result<()> {
        match opcode.operand_kind() {
            OperandKind::ShortLocal => {
                let index = u8::try_from(local.0).map_err(|_| Error::OperandMismatch {
                    opcode,
                    expected: OperandKind::ShortLocal,
                    found: format!("local {}", local.0),
                })?;
                self.write_opcode(opcode);
                self.code.push(index);
            }
            OperandKind::Local => {
                self.write_opcode(opcode);
                self.code.extend_from_slice(&local.0.to_le_bytes());
            }
            expected => {
                return Err(Error::OperandMismatch {
                    opcode,
                    expected,
                    found: format!("local {}", local.0),
                })
            }
        }
        Ok(())
    }

    fn emit_field(&mut self, opcode: OpCode, field: &FieldHandle) -> Result<()> {
        self.write_token(
            opcode,
            &[OperandKind::Field, OperandKind::Token],
            field.token(),
            "field",
        )
    }

    fn emit_method(&mut self, opcode: OpCode, method: &MethodHandle) -> Result<()> {
        self.write_token(
            opcode,
            &[OperandKind::Method, OperandKind::Token],
            method.token(),
            "method",
        )
    }

    fn emit_constructor(&mut self, opcode: OpCode, constructor: &ConstructorHandle) -> Result<()> {
        self.write_token(
            opcode,
            &[
                OperandKind::Constructor,
                OperandKind::Method,
                OperandKind::Token,
            ],
            constructor.token(),
            "constructor",
        )
    }

    fn emit_type(&mut self, opcode: OpCode, ty: &TypeHandle) -> Result<()> {
        self.write_token(
            opcode,
            &[OperandKind::Type, OperandKind::Token],
            ty.token(),
            "type",
        )
    }

    fn begin_exception_block(&mut self) -> Result<BodyLabel> {
        let exit = self.define_label()?;
        let try_start = self.position()?;
        self.regions.push(OpenRegion {
            exit,
            try_start,
            try_end: None,
            closed_handlers: 0,
            handler: None,
        });
        Ok(exit)
    }

    fn begin_catch_block(&mut self, exception_type: Option<&TypeHandle>) -> Result<()> {
        let position = self.position()?;
        let region = self.innermost("begin_catch_block")?;

        // the handler of a filter starts where the filter expression ends
        if exception_type.is_none() {
            if let Some(handler) = region
                .handler
                .as_mut()
                .filter(|handler| handler.awaiting_handler)
            {
                handler.start = position;
                handler.awaiting_handler = false;
                return Ok(());
            }
        }

        self.open_handler(
            "begin_catch_block",
            ExceptionHandlerFlags::EXCEPTION,
            exception_type.map(TypeHandle::token),
        )
    }

    fn begin_except_filter_block(&mut self) -> Result<()> {
        self.open_handler(
            "begin_except_filter_block",
            ExceptionHandlerFlags::FILTER,
            None,
        )
    }

    fn begin_finally_block(&mut self) -> Result<()> {
        self.open_handler("begin_finally_block", ExceptionHandlerFlags::FINALLY, None)
    }

    fn begin_fault_block(&mut self) -> Result<()> {
        self.open_handler("begin_fault_block", ExceptionHandlerFlags::FAULT, None)
    }

    fn end_exception_block(&mut self) -> Result<()> {
        let position = self.position()?;
        let Some(mut region) = self.regions.pop() else {
            return Err(Error::RegionViolation {
                operation: "end_exception_block",
                message: "no exception region is open".to_string(),
            });
        };

        Self::close_handler(&mut region, position, &mut self.clauses);
        self.mark_label(&region.exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception_type() -> TypeHandle {
        TypeHandle::new(Token::new(0x0100_0010), "System.Exception")
    }

    #[test]
    fn test_backward_branch() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let top = sink.define_label()?;
        sink.mark_label(&top)?;
        sink.emit(OpCode::Nop)?;
        sink.emit_label(OpCode::BrS, &top)?;
        sink.emit_label(OpCode::Br, &top)?;

        let body = sink.finish()?;
        assert_eq!(
            body.code,
            vec![0x00, 0x2B, 0xFD, 0x38, 0xF8, 0xFF, 0xFF, 0xFF]
        );
        Ok(())
    }

    #[test]
    fn test_short_branch_out_of_range() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let far = sink.define_label()?;
        sink.emit_label(OpCode::BrS, &far)?;
        for _ in 0..200 {
            sink.emit(OpCode::Nop)?;
        }
        sink.mark_label(&far)?;

        assert!(matches!(
            sink.finish(),
            Err(Error::BranchOutOfRange {
                opcode: OpCode::BrS,
                position: 0,
                target: 202,
                displacement: 200
            })
        ));
        Ok(())
    }

    #[test]
    fn test_unplaced_label() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let nowhere = sink.define_label()?;
        sink.emit_label(OpCode::Brtrue, &nowhere)?;
        assert!(matches!(sink.finish(), Err(Error::UndefinedLabel(_))));
        Ok(())
    }

    #[test]
    fn test_switch_offsets_relative_to_end() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let a = sink.define_label()?;
        let b = sink.define_label()?;
        sink.emit(OpCode::Ldarg0)?;
        sink.emit_switch(OpCode::Switch, &[a, b])?;
        sink.mark_label(&a)?;
        sink.emit(OpCode::Nop)?;
        sink.mark_label(&b)?;
        sink.emit(OpCode::Ret)?;

        let body = sink.finish()?;
        assert_eq!(&body.code[1..2], &[0x45]);
        assert_eq!(&body.code[2..6], &2u32.to_le_bytes());
        assert_eq!(&body.code[6..10], &0i32.to_le_bytes());
        assert_eq!(&body.code[10..14], &1i32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_try_catch_clause() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let exit = sink.begin_exception_block()?;
        sink.emit(OpCode::Nop)?;
        sink.emit_label(OpCode::LeaveS, &exit)?;
        sink.begin_catch_block(Some(&exception_type()))?;
        sink.emit(OpCode::Pop)?;
        sink.emit_label(OpCode::LeaveS, &exit)?;
        sink.end_exception_block()?;
        sink.emit(OpCode::Ret)?;

        let body = sink.finish()?;
        assert_eq!(body.code, vec![0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A]);
        assert_eq!(
            body.exception_clauses,
            vec![ExceptionClause {
                flags: ExceptionHandlerFlags::EXCEPTION,
                try_offset: 0,
                try_length: 3,
                handler_offset: 3,
                handler_length: 3,
                class_token: Some(Token::new(0x0100_0010)),
                filter_offset: None,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_finally_after_catch_covers_catch() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let exit = sink.begin_exception_block()?;
        sink.emit_label(OpCode::LeaveS, &exit)?; // 0..2
        sink.begin_catch_block(Some(&exception_type()))?;
        sink.emit(OpCode::Pop)?; // 2..3
        sink.emit_label(OpCode::LeaveS, &exit)?; // 3..5
        sink.begin_finally_block()?;
        sink.emit(OpCode::Endfinally)?; // 5..6
        sink.end_exception_block()?;

        let body = sink.finish()?;
        assert_eq!(body.exception_clauses.len(), 2);
        let finally = &body.exception_clauses[1];
        assert_eq!(finally.flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!((finally.try_offset, finally.try_length), (0, 5));
        assert_eq!((finally.handler_offset, finally.handler_length), (5, 1));
        Ok(())
    }

    #[test]
    fn test_filter_clause() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let exit = sink.begin_exception_block()?;
        sink.emit_label(OpCode::LeaveS, &exit)?; // 0..2
        sink.begin_except_filter_block()?;
        sink.emit(OpCode::Pop)?; // 2..3
        sink.emit(OpCode::LdcI41)?; // 3..4
        sink.emit(OpCode::Endfilter)?; // 4..6
        sink.begin_catch_block(None)?;
        sink.emit(OpCode::Pop)?; // 6..7
        sink.emit_label(OpCode::LeaveS, &exit)?; // 7..9
        sink.end_exception_block()?;

        let body = sink.finish()?;
        let clause = &body.exception_clauses[0];
        assert_eq!(clause.flags, ExceptionHandlerFlags::FILTER);
        assert_eq!(clause.filter_offset, Some(2));
        assert_eq!((clause.handler_offset, clause.handler_length), (6, 3));
        assert_eq!(clause.try_length, 2);
        Ok(())
    }

    #[test]
    fn test_filter_without_handler_gets_empty_handler() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let exit = sink.begin_exception_block()?;
        sink.emit(OpCode::Nop)?; // 0..1
        sink.begin_except_filter_block()?;
        sink.emit(OpCode::Pop)?; // 1..2
        sink.emit(OpCode::LdcI40)?; // 2..3
        sink.emit(OpCode::Endfilter)?; // 3..5
        sink.end_exception_block()?;
        sink.emit(OpCode::Ret)?;

        assert_eq!(sink.labels[exit.index() as usize], Some(5));
        let body = sink.finish()?;
        assert_eq!(
            body.exception_clauses,
            vec![ExceptionClause {
                flags: ExceptionHandlerFlags::FILTER,
                try_offset: 0,
                try_length: 1,
                handler_offset: 5,
                handler_length: 0,
                class_token: None,
                filter_offset: Some(1),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_untyped_catch_without_filter() -> Result<()> {
        let mut sink = BytecodeSink::new();
        let exit = sink.begin_exception_block()?;
        sink.emit_label(OpCode::LeaveS, &exit)?; // 0..2
        sink.begin_catch_block(None)?;
        sink.emit(OpCode::Pop)?; // 2..3
        sink.emit_label(OpCode::LeaveS, &exit)?; // 3..5
        sink.begin_catch_block(None)?;
        sink.emit(OpCode::Pop)?; // 5..6
        sink.end_exception_block()?;

        let body = sink.finish()?;
        assert_eq!(body.exception_clauses.len(), 2);
        for clause in &body.exception_clauses {
            assert_eq!(clause.flags, ExceptionHandlerFlags::EXCEPTION);
            assert_eq!(clause.class_token, None);
            assert_eq!((clause.try_offset, clause.try_length), (0, 2));
        }
        assert_eq!(body.exception_clauses[1].handler_offset, 5);
        Ok(())
    }

    #[test]
    fn test_ldstr_uses_user_string_token() -> Result<()> {
        let mut sink = BytecodeSink::new();
        sink.emit_string(OpCode::Ldstr, "hi")?;
        sink.emit_string(OpCode::Ldstr, "hi")?;

        let body = sink.finish()?;
        assert_eq!(&body.code[0..5], &[0x72, 0x01, 0x00, 0x00, 0x70]);
        assert_eq!(&body.code[5..10], &body.code[0..5]);
        assert_eq!(body.user_strings.len(), 1);
        Ok(())
    }

    #[test]
    fn test_sink_rejects_wrong_kind() {
        let mut sink = BytecodeSink::new();
        assert!(matches!(
            sink.emit_i32(OpCode::Ret, 1),
            Err(Error::OperandMismatch { .. })
        ));
        assert!(sink.code().is_empty());
    }
}
