//! # cilemit Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilemit library. Import this module to get the emitters, the traits that give
//! them their emission methods, the operand types and the error types in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilemit operations
pub use crate::Error;

/// The result type used throughout cilemit
pub use crate::Result;

/// Reason a symbolic label or local was rejected
pub use crate::ReferenceFault;

// ================================================================================================
// Assemblers and Emission Traits
// ================================================================================================

/// The emission surface shared by every assembler, and its compact-form helpers
pub use crate::assembly::{EmitExt, Emitter};

/// Backend-less assembler and its rewind checkpoints
pub use crate::assembly::{Checkpoint, RecordingAssembler};

/// Sink-forwarding assembler and the sink interface it drives
pub use crate::assembly::{BackedAssembler, CodeSink};

/// Bundled bytecode sink and its output
pub use crate::assembly::{BodyLabel, BodyLocal, BytecodeSink, LocalVariable, MethodBody};

// ================================================================================================
// Instruction Model
// ================================================================================================

/// Opcodes, operands and instructions
pub use crate::assembly::{Instruction, Op, OpCode, Operand, OperandKind, FE_PREFIX};

/// Symbolic handles
pub use crate::assembly::{AssemblerId, Label, Local};

/// The recorded instruction stream
pub use crate::assembly::{InstructionStream, Line};

/// Exception region and scope bookkeeping
pub use crate::assembly::{RegionCall, RegionFrame, RegionStack, RegionState};

/// Textual rendering
pub use crate::assembly::{Disassembler, DisassemblyOptions};

// ================================================================================================
// Metadata Collaborators
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Opaque member handles accepted as operands
pub use crate::metadata::handles::{ConstructorHandle, FieldHandle, MethodHandle, TypeHandle};

/// Exception clauses produced by the bytecode sink
pub use crate::metadata::exceptions::{ExceptionClause, ExceptionHandlerFlags};

/// The `#US` heap that `ldstr` literals are interned into
pub use crate::metadata::userstrings::UserStringHeap;

// ================================================================================================
// Helper Caches
// ================================================================================================

/// Explicit helper cache and its structural key
pub use crate::cache::{CallableShape, HelperCache};
