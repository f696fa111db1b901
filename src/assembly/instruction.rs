//! Instruction model: operand categories, operand values and the recorded instruction type.
//!
//! # Key Components
//!
//! - [`OperandKind`] - The operand category an opcode encodes (from the opcode table)
//! - [`Operand`] - A concrete operand value supplied by the caller
//! - [`Op`] - A validated, sized `opcode + operand` pair
//! - [`Instruction`] - One line of the instruction stream: an [`Op`] or a structural marker
//!
//! An [`Op`] can only be built through [`Op::new`], which checks the operand against the
//! opcode and computes the size exactly once. Markers never occupy bytes.

use std::fmt;

use crate::{
    assembly::{opcodes::OpCode, sizing, Label, Local},
    metadata::handles::{ConstructorHandle, FieldHandle, MethodHandle, TypeHandle},
    Error, Result,
};

/// Types of operands for CIL instructions.
///
/// Each opcode expects exactly one kind. The kind decides which [`Operand`] variants are
/// accepted and how many bytes the operand adds to the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// No operand present
    None,
    /// Signed 8-bit integer (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit integer (`ldarg.s`, `unaligned.`)
    UInt8,
    /// Unsigned 16-bit integer (`ldarg`, `starg`)
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// String literal (`ldstr`)
    String,
    /// Branch target with a 1-byte displacement
    ShortBranch,
    /// Branch target with a 4-byte displacement
    Branch,
    /// Jump table (`switch`)
    Switch,
    /// Local slot with a 1-byte index
    ShortLocal,
    /// Local slot with a 2-byte index
    Local,
    /// Field handle
    Field,
    /// Method handle, or a constructor handle used as a method (`call` chaining to a base constructor)
    Method,
    /// Constructor handle (`newobj`)
    Constructor,
    /// Type handle
    Type,
    /// Any member handle (`ldtoken`)
    Token,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OperandKind::None => "no operand",
            OperandKind::Int8 => "int8",
            OperandKind::UInt8 => "uint8",
            OperandKind::UInt16 => "uint16",
            OperandKind::Int32 => "int32",
            OperandKind::Int64 => "int64",
            OperandKind::Float32 => "float32",
            OperandKind::Float64 => "float64",
            OperandKind::String => "string",
            OperandKind::ShortBranch => "short branch target",
            OperandKind::Branch => "branch target",
            OperandKind::Switch => "switch targets",
            OperandKind::ShortLocal => "local (index <= 255)",
            OperandKind::Local => "local",
            OperandKind::Field => "field",
            OperandKind::Method => "method",
            OperandKind::Constructor => "constructor",
            OperandKind::Type => "type",
            OperandKind::Token => "member token",
        };
        f.write_str(text)
    }
}

/// An operand value supplied with an opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8(i8),
    /// Unsigned 8-bit immediate
    UInt8(u8),
    /// Unsigned 16-bit immediate
    UInt16(u16),
    /// Signed 32-bit immediate
    Int32(i32),
    /// Signed 64-bit immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// String literal
    String(String),
    /// Single branch target
    Label(Label),
    /// Jump-table targets
    Labels(Vec<Label>),
    /// Local slot
    Local(Local),
    /// Field reference
    Field(FieldHandle),
    /// Constructor reference
    Constructor(ConstructorHandle),
    /// Method reference
    Method(MethodHandle),
    /// Type reference
    Type(TypeHandle),
}

impl Operand {
    /// Short description of the operand shape, used in mismatch errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Operand::None => "no operand".to_string(),
            Operand::Int8(_) => "int8".to_string(),
            Operand::UInt8(_) => "uint8".to_string(),
            Operand::UInt16(_) => "uint16".to_string(),
            Operand::Int32(_) => "int32".to_string(),
            Operand::Int64(_) => "int64".to_string(),
            Operand::Float32(_) => "float32".to_string(),
            Operand::Float64(_) => "float64".to_string(),
            Operand::String(_) => "string".to_string(),
            Operand::Label(_) => "label".to_string(),
            Operand::Labels(labels) => format!("{} labels", labels.len()),
            Operand::Local(local) => format!("local {}", local.index()),
            Operand::Field(_) => "field".to_string(),
            Operand::Constructor(_) => "constructor".to_string(),
            Operand::Method(_) => "method".to_string(),
            Operand::Type(_) => "type".to_string(),
        }
    }

    /// Returns true if this operand is acceptable for `kind`.
    #[must_use]
    pub fn fits(&self, kind: OperandKind) -> bool {
        match (kind, self) {
            (OperandKind::None, Operand::None)
            | (OperandKind::Int8, Operand::Int8(_))
            | (OperandKind::UInt8, Operand::UInt8(_))
            | (OperandKind::UInt16, Operand::UInt16(_))
            | (OperandKind::Int32, Operand::Int32(_))
            | (OperandKind::Int64, Operand::Int64(_))
            | (OperandKind::Float32, Operand::Float32(_))
            | (OperandKind::Float64, Operand::Float64(_))
            | (OperandKind::String, Operand::String(_))
            | (OperandKind::ShortBranch | OperandKind::Branch, Operand::Label(_))
            | (OperandKind::Switch, Operand::Labels(_))
            | (OperandKind::Field, Operand::Field(_))
            | (OperandKind::Method, Operand::Method(_) | Operand::Constructor(_))
            | (OperandKind::Constructor, Operand::Constructor(_))
            | (OperandKind::Type, Operand::Type(_))
            | (
                OperandKind::Token,
                Operand::Field(_) | Operand::Method(_) | Operand::Constructor(_) | Operand::Type(_),
            ) => true,
            (OperandKind::ShortLocal, Operand::Local(local)) => local.index() <= u32::from(u8::MAX),
            // 0xFFFF is reserved by the encoding
            (OperandKind::Local, Operand::Local(local)) => local.index() < u32::from(u16::MAX),
            _ => false,
        }
    }

    /// Returns every label this operand refers to.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        match self {
            Operand::Label(label) => std::slice::from_ref(label),
            Operand::Labels(labels) => labels,
            _ => &[],
        }
    }
}

/// A validated instruction: opcode, matching operand and its encoded size.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    opcode: OpCode,
    operand: Operand,
    size: u32,
}

impl Op {
    /// Validates `operand` against `opcode` and sizes the instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperandMismatch`] if the operand does not fit the opcode's
    /// [`OperandKind`], or [`Error::SizeTableGap`] if the opcode cannot be sized.
    pub fn new(opcode: OpCode, operand: Operand) -> Result<Self> {
        let expected = opcode.operand_kind();
        if !operand.fits(expected) {
            return Err(Error::OperandMismatch {
                opcode,
                expected,
                found: operand.describe(),
            });
        }

        let size = sizing::instruction_size(opcode, &operand)?;
        Ok(Op {
            opcode,
            operand,
            size,
        })
    }

    /// The opcode.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The operand.
    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// One line of an instruction stream.
///
/// [`Instruction::Op`] is a real instruction. Every other variant is a zero-sized marker
/// that records allocation or nesting structure, so that the stream is a complete and
/// replayable account of the build session.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// A real instruction
    Op(Op),
    /// A label was allocated
    DefineLabel(Label),
    /// A label was placed at this offset
    MarkLabel(Label),
    /// A local slot was declared
    DeclareLocal(Local),
    /// A protected region opens; carries its exit label
    BeginExceptionBlock(Label),
    /// A catch handler opens; `None` when it is the handler of a preceding filter
    BeginCatchBlock(Option<TypeHandle>),
    /// A filter block opens
    BeginExceptFilterBlock,
    /// A finally handler opens
    BeginFinallyBlock,
    /// A fault handler opens
    BeginFaultBlock,
    /// The innermost protected region closes; its exit label resolves here
    EndExceptionBlock(Label),
    /// A lexical scope opens
    BeginScope,
    /// The innermost lexical scope closes
    EndScope,
}

impl Instruction {
    /// Encoded size in bytes; zero for markers.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            Instruction::Op(op) => op.size(),
            _ => 0,
        }
    }

    /// Returns the real instruction, if this line is one.
    #[must_use]
    pub fn as_op(&self) -> Option<&Op> {
        match self {
            Instruction::Op(op) => Some(op),
            _ => None,
        }
    }

    /// Returns true for zero-sized structural markers.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        !matches!(self, Instruction::Op(_))
    }

    /// The opcode-like name of the line, e.g. `"add"` or `"MarkLabel"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Op(op) => op.opcode().mnemonic(),
            Instruction::DefineLabel(_) => "DefineLabel",
            Instruction::MarkLabel(_) => "MarkLabel",
            Instruction::DeclareLocal(_) => "DeclareLocal",
            Instruction::BeginExceptionBlock(_) => "BeginExceptionBlock",
            Instruction::BeginCatchBlock(_) => "BeginCatchBlock",
            Instruction::BeginExceptFilterBlock => "BeginExceptFilterBlock",
            Instruction::BeginFinallyBlock => "BeginFinallyBlock",
            Instruction::BeginFaultBlock => "BeginFaultBlock",
            Instruction::EndExceptionBlock(_) => "EndExceptionBlock",
            Instruction::BeginScope => "BeginScope",
            Instruction::EndScope => "EndScope",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::RecordingAssembler, metadata::token::Token};

    #[test]
    fn test_op_sizes() -> Result<()> {
        assert_eq!(Op::new(OpCode::Add, Operand::None)?.size(), 1);
        assert_eq!(Op::new(OpCode::LdcI4, Operand::Int32(5))?.size(), 5);
        assert_eq!(Op::new(OpCode::LdcI4S, Operand::Int8(-3))?.size(), 2);
        assert_eq!(Op::new(OpCode::LdcR8, Operand::Float64(1.5))?.size(), 9);
        assert_eq!(Op::new(OpCode::Ldarg, Operand::UInt16(300))?.size(), 4);
        assert_eq!(Op::new(OpCode::Ldstr, Operand::String("hi".into()))?.size(), 5);
        Ok(())
    }

    #[test]
    fn test_operand_mismatch() {
        let result = Op::new(OpCode::Add, Operand::Int32(1));
        assert!(matches!(
            result,
            Err(Error::OperandMismatch {
                opcode: OpCode::Add,
                expected: OperandKind::None,
                ..
            })
        ));

        let result = Op::new(OpCode::LdcI4, Operand::None);
        assert!(matches!(result, Err(Error::OperandMismatch { .. })));
    }

    #[test]
    fn test_method_kind_accepts_constructor() -> Result<()> {
        let ctor = ConstructorHandle::new(Token::new(0x0A00_0001), "System.Object::.ctor");
        Op::new(OpCode::Call, Operand::Constructor(ctor.clone()))?;
        Op::new(OpCode::Newobj, Operand::Constructor(ctor))?;

        let method = MethodHandle::new(Token::new(0x0600_0001), "Program::Main");
        assert!(Op::new(OpCode::Newobj, Operand::Method(method)).is_err());
        Ok(())
    }

    #[test]
    fn test_short_local_range() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let ty = TypeHandle::new(Token::new(0x0100_0001), "int32");
        let mut last = asm.declare_local(ty.clone(), false);
        for _ in 0..256 {
            last = asm.declare_local(ty.clone(), false);
        }
        assert_eq!(last.index(), 256);

        assert!(Op::new(OpCode::LdlocS, Operand::Local(last.clone())).is_err());
        assert_eq!(Op::new(OpCode::Ldloc, Operand::Local(last))?.size(), 4);
        Ok(())
    }

    #[test]
    fn test_markers_are_zero_sized() {
        let mut asm = RecordingAssembler::new();
        let label = asm.define_label();
        let marker = Instruction::MarkLabel(label);
        assert_eq!(marker.size(), 0);
        assert!(marker.is_marker());
        assert_eq!(marker.name(), "MarkLabel");
    }
}
