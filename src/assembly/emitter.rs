//! The emission surface shared by every assembler.
//!
//! [`Emitter`] is implemented by [`crate::assembly::RecordingAssembler`] and
//! [`crate::assembly::BackedAssembler`], so code generators can be written once against
//! the trait and run with or without a live backend. [`EmitExt`] adds the compact-form
//! helpers on top of any emitter.
//!
//! # Examples
//!
//! ```rust
//! use cilemit::prelude::*;
//!
//! fn emit_abs<E: Emitter>(e: &mut E) -> Result<()> {
//!     let positive = e.define_label()?;
//!     e.ldarg(0)?
//!         .emit(OpCode::Dup)?
//!         .ldc_i4(0)?
//!         .emit_label(OpCode::BgeS, &positive)?
//!         .emit(OpCode::Neg)?
//!         .mark_label(&positive)?
//!         .ret()?;
//!     Ok(())
//! }
//!
//! let mut asm = RecordingAssembler::new();
//! emit_abs(&mut asm)?;
//! assert_eq!(asm.stream().end_offset(), 7);
//! # Ok::<(), cilemit::Error>(())
//! ```

use crate::{
    assembly::{InstructionStream, Label, Local, OpCode, Operand},
    metadata::handles::{ConstructorHandle, FieldHandle, MethodHandle, TypeHandle},
    Result,
};

/// Instruction emission, label/local allocation and region bookkeeping.
///
/// Every call either succeeds completely or fails without changing the emitter's state.
/// Emission calls return `&mut Self` so they can be chained with `?`.
pub trait Emitter {
    /// Allocates a new label with an optional debug name.
    ///
    /// # Errors
    ///
    /// Only fails if a backend refuses to allocate its own label.
    fn create_label(&mut self, name: Option<&str>) -> Result<Label>;

    /// Resolves `label` to the current offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidLabel`] if the label is foreign, discarded by a
    /// rewind, or already marked.
    fn mark_label(&mut self, label: &Label) -> Result<&mut Self>;

    /// Declares a new local slot; its index is the number of locals declared before it.
    ///
    /// # Errors
    ///
    /// Only fails if a backend refuses to declare its own local.
    fn create_local(&mut self, ty: TypeHandle, pinned: bool, name: Option<&str>)
        -> Result<Local>;

    /// Appends `opcode` with `operand`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperandMismatch`] if the operand does not fit the opcode,
    /// and [`crate::Error::InvalidLabel`] / [`crate::Error::InvalidLocal`] for symbolic
    /// references this emitter does not own.
    fn emit_operand(&mut self, opcode: OpCode, operand: Operand) -> Result<&mut Self>;

    /// Opens a protected region and returns its exit label.
    ///
    /// The exit label resolves at the matching [`Emitter::end_exception_block`].
    ///
    /// # Errors
    ///
    /// Only fails if a backend refuses to open the region.
    fn begin_exception_block(&mut self) -> Result<Label>;

    /// Opens a catch handler. `None` directly after a filter block starts the filter's
    /// handler; anywhere else it opens a catch-all handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] outside a try, catch or filter block, or
    /// when a filter's handler names an exception type.
    fn begin_catch_block(&mut self, exception_type: Option<&TypeHandle>) -> Result<&mut Self>;

    /// Opens a filter block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] outside a try or catch block.
    fn begin_except_filter_block(&mut self) -> Result<&mut Self>;

    /// Opens a finally handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] outside a try or catch block.
    fn begin_finally_block(&mut self) -> Result<&mut Self>;

    /// Opens a fault handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] outside a try or catch block.
    fn begin_fault_block(&mut self) -> Result<&mut Self>;

    /// Closes the innermost exception region and resolves its exit label here.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] if no region is open or the innermost
    /// region has no handler yet.
    fn end_exception_block(&mut self) -> Result<&mut Self>;

    /// Opens a lexical scope.
    ///
    /// # Errors
    ///
    /// Only fails if a backend refuses to open the scope.
    fn begin_scope(&mut self) -> Result<&mut Self>;

    /// Closes the innermost lexical scope.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RegionViolation`] if the innermost region is not a scope.
    fn end_scope(&mut self) -> Result<&mut Self>;

    /// The instructions recorded so far.
    fn stream(&self) -> &InstructionStream;

    /// Allocates an unnamed label.
    ///
    /// # Errors
    ///
    /// See [`Emitter::create_label`].
    fn define_label(&mut self) -> Result<Label> {
        self.create_label(None)
    }

    /// Declares an unnamed local.
    ///
    /// # Errors
    ///
    /// See [`Emitter::create_local`].
    fn declare_local(&mut self, ty: TypeHandle, pinned: bool) -> Result<Local> {
        self.create_local(ty, pinned, None)
    }

    /// Offset at which the next instruction will be placed.
    fn offset(&self) -> u32 {
        self.stream().end_offset()
    }

    /// Appends an opcode that takes no operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit(&mut self, opcode: OpCode) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::None)
    }

    /// Appends an opcode with a signed 8-bit operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_i8(&mut self, opcode: OpCode, value: i8) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Int8(value))
    }

    /// Appends an opcode with an unsigned 8-bit operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_u8(&mut self, opcode: OpCode, value: u8) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::UInt8(value))
    }

    /// Appends an opcode with an unsigned 16-bit operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_u16(&mut self, opcode: OpCode, value: u16) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::UInt16(value))
    }

    /// Appends an opcode with a signed 32-bit operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_i32(&mut self, opcode: OpCode, value: i32) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Int32(value))
    }

    /// Appends an opcode with a signed 64-bit operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_i64(&mut self, opcode: OpCode, value: i64) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Int64(value))
    }

    /// Appends an opcode with a 32-bit float operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_f32(&mut self, opcode: OpCode, value: f32) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Float32(value))
    }

    /// Appends an opcode with a 64-bit float operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_f64(&mut self, opcode: OpCode, value: f64) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Float64(value))
    }

    /// Appends an opcode with a string literal operand (`ldstr`).
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_string(&mut self, opcode: OpCode, value: &str) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::String(value.to_string()))
    }

    /// Appends a branch to `target`.
    ///
    /// The opcode decides the displacement width; nothing is chosen automatically.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_label(&mut self, opcode: OpCode, target: &Label) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Label(target.clone()))
    }

    /// Appends a jump table (`switch`).
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_switch(&mut self, opcode: OpCode, targets: &[Label]) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Labels(targets.to_vec()))
    }

    /// Appends an opcode that addresses a local slot.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_local(&mut self, opcode: OpCode, local: &Local) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Local(local.clone()))
    }

    /// Appends an opcode with a field operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_field(&mut self, opcode: OpCode, field: &FieldHandle) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Field(field.clone()))
    }

    /// Appends an opcode with a method operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_method(&mut self, opcode: OpCode, method: &MethodHandle) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Method(method.clone()))
    }

    /// Appends an opcode with a constructor operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_constructor(
        &mut self,
        opcode: OpCode,
        constructor: &ConstructorHandle,
    ) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Constructor(constructor.clone()))
    }

    /// Appends an opcode with a type operand.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn emit_type(&mut self, opcode: OpCode, ty: &TypeHandle) -> Result<&mut Self> {
        self.emit_operand(opcode, Operand::Type(ty.clone()))
    }
}

/// Compact-form helpers available on every [`Emitter`].
///
/// These pick the smallest encoding for constants and argument indices. Locals always keep
/// their symbolic operand, so only the `.s` and long forms are used for them. Branches are
/// never rewritten; the caller chooses `br` or `br.s`.
pub trait EmitExt: Emitter {
    /// Loads a 32-bit constant using `ldc.i4.m1`..`ldc.i4.8`, `ldc.i4.s` or `ldc.i4`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        let compact = match value {
            -1 => Some(OpCode::LdcI4M1),
            0 => Some(OpCode::LdcI40),
            1 => Some(OpCode::LdcI41),
            2 => Some(OpCode::LdcI42),
            3 => Some(OpCode::LdcI43),
            4 => Some(OpCode::LdcI44),
            5 => Some(OpCode::LdcI45),
            6 => Some(OpCode::LdcI46),
            7 => Some(OpCode::LdcI47),
            8 => Some(OpCode::LdcI48),
            _ => None,
        };

        if let Some(opcode) = compact {
            self.emit(opcode)
        } else if let Ok(short) = i8::try_from(value) {
            self.emit_i8(OpCode::LdcI4S, short)
        } else {
            self.emit_i32(OpCode::LdcI4, value)
        }
    }

    /// Loads argument `index` using `ldarg.0`..`ldarg.3`, `ldarg.s` or `ldarg`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0 => self.emit(OpCode::Ldarg0),
            1 => self.emit(OpCode::Ldarg1),
            2 => self.emit(OpCode::Ldarg2),
            3 => self.emit(OpCode::Ldarg3),
            _ => match u8::try_from(index) {
                Ok(short) => self.emit_u8(OpCode::LdargS, short),
                Err(_) => self.emit_u16(OpCode::Ldarg, index),
            },
        }
    }

    /// Stores into argument `index` using `starg.s` or `starg`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn starg(&mut self, index: u16) -> Result<&mut Self> {
        match u8::try_from(index) {
            Ok(short) => self.emit_u8(OpCode::StargS, short),
            Err(_) => self.emit_u16(OpCode::Starg, index),
        }
    }

    /// Loads `local` using `ldloc.s` or `ldloc`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn ldloc(&mut self, local: &Local) -> Result<&mut Self> {
        let opcode = if local.index() <= u32::from(u8::MAX) {
            OpCode::LdlocS
        } else {
            OpCode::Ldloc
        };
        self.emit_local(opcode, local)
    }

    /// Stores into `local` using `stloc.s` or `stloc`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn stloc(&mut self, local: &Local) -> Result<&mut Self> {
        let opcode = if local.index() <= u32::from(u8::MAX) {
            OpCode::StlocS
        } else {
            OpCode::Stloc
        };
        self.emit_local(opcode, local)
    }

    /// Loads the address of `local` using `ldloca.s` or `ldloca`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn ldloca(&mut self, local: &Local) -> Result<&mut Self> {
        let opcode = if local.index() <= u32::from(u8::MAX) {
            OpCode::LdlocaS
        } else {
            OpCode::Ldloca
        };
        self.emit_local(opcode, local)
    }

    /// Emits `ret`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit_operand`].
    fn ret(&mut self) -> Result<&mut Self> {
        self.emit(OpCode::Ret)
    }
}

impl<T: Emitter + ?Sized> EmitExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::RecordingAssembler, metadata::token::Token};

    fn opcodes(asm: &RecordingAssembler) -> Vec<OpCode> {
        asm.stream().ops().map(|(_, op)| op.opcode()).collect()
    }

    #[test]
    fn test_ldc_i4_forms() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        asm.ldc_i4(-1)?.ldc_i4(8)?.ldc_i4(9)?.ldc_i4(-128)?.ldc_i4(1000)?;

        assert_eq!(
            opcodes(&asm),
            vec![
                OpCode::LdcI4M1,
                OpCode::LdcI48,
                OpCode::LdcI4S,
                OpCode::LdcI4S,
                OpCode::LdcI4
            ]
        );
        assert_eq!(asm.offset(), 1 + 1 + 2 + 2 + 5);
        Ok(())
    }

    #[test]
    fn test_argument_forms() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        asm.ldarg(3)?.ldarg(4)?.ldarg(256)?.starg(1)?.starg(300)?;

        assert_eq!(
            opcodes(&asm),
            vec![
                OpCode::Ldarg3,
                OpCode::LdargS,
                OpCode::Ldarg,
                OpCode::StargS,
                OpCode::Starg
            ]
        );
        Ok(())
    }

    #[test]
    fn test_local_forms_keep_symbolic_operand() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let ty = TypeHandle::new(Token::new(0x0100_0001), "int32");
        let first = asm.declare_local(ty.clone(), false);

        asm.ldc_i4(1)?.stloc(&first)?.ldloc(&first)?.ldloca(&first)?;

        let locals: Vec<_> = asm
            .stream()
            .ops()
            .filter_map(|(_, op)| match op.operand() {
                Operand::Local(local) => Some(local.index()),
                _ => None,
            })
            .collect();
        assert_eq!(locals, vec![0, 0, 0]);
        assert_eq!(
            opcodes(&asm)[1..],
            [OpCode::StlocS, OpCode::LdlocS, OpCode::LdlocaS]
        );
        Ok(())
    }

    #[test]
    fn test_generic_body() -> Result<()> {
        fn body<E: Emitter>(e: &mut E) -> Result<()> {
            let done = e.define_label()?;
            e.ldarg(0)?.emit_label(OpCode::BrfalseS, &done)?;
            e.ldc_i4(1)?.ret()?;
            e.mark_label(&done)?.ldc_i4(0)?.ret()?;
            Ok(())
        }

        let mut asm = RecordingAssembler::new();
        body(&mut asm)?;
        assert_eq!(asm.offset(), 1 + 2 + 1 + 1 + 1 + 1);
        Ok(())
    }
}
