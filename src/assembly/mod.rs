//! Symbolic CIL instruction-stream assembly.
//!
//! This module holds everything needed to build a method body one instruction at a time
//! with symbolic labels and locals:
//!
//! - [`OpCode`] - the fixed opcode set with mnemonics, encodings and operand kinds
//! - [`Operand`], [`Op`] and [`Instruction`] - operands, opcode/operand pairs and the
//!   structural markers recorded alongside them
//! - [`InstructionStream`] - the ordered, offset-annotated record of a body
//! - [`Emitter`] / [`EmitExt`] - the emission surface shared by all assemblers
//! - [`RecordingAssembler`] - validates and records without producing bytes
//! - [`BackedAssembler`] - records and forwards every call to a [`CodeSink`]
//! - [`BytecodeSink`] - a sink producing real bytecode and exception clauses
//! - [`Disassembler`] - text rendering of a stream
//!
//! # Offsets
//!
//! Every line is annotated with the byte offset it starts at. An instruction's size is
//! its opcode length (one byte, or two for the `0xFE` prefixed set) plus its operand
//! width, and depends only on the opcode and operand. Markers occupy zero bytes.
//! Branch instructions are sized by the form the caller chose; no short/long relaxation
//! takes place.
//!
//! # Examples
//!
//! ```rust
//! use cilemit::prelude::*;
//!
//! let mut asm = RecordingAssembler::new();
//! let done = asm.define_label();
//! asm.ldarg(0)?
//!     .emit_label(OpCode::BrtrueS, &done)?
//!     .ldc_i4(-1)?
//!     .ret()?
//!     .mark_label(&done)?
//!     .ldc_i4(1)?
//!     .ret()?;
//!
//! let stream = asm.finish()?;
//! assert_eq!(stream.end_offset(), 7);
//! assert_eq!(stream.label_offsets().get(&done.index()), Some(&5));
//! # Ok::<(), cilemit::Error>(())
//! ```

mod backed;
mod disassembly;
mod emitter;
mod encoder;
mod instruction;
mod opcodes;
mod recording;
mod region;
mod replay;
mod sizing;
mod stream;
mod symbols;

pub use backed::{BackedAssembler, CodeSink};
pub use disassembly::{Disassembler, DisassemblyOptions};
pub use emitter::{EmitExt, Emitter};
pub use encoder::{BodyLabel, BodyLocal, BytecodeSink, LocalVariable, MethodBody};
pub use instruction::{Instruction, Op, Operand, OperandKind};
pub use opcodes::{OpCode, FE_PREFIX};
pub use recording::{Checkpoint, RecordingAssembler};
pub use region::{RegionCall, RegionFrame, RegionStack, RegionState};
pub use sizing::{instruction_size, operand_size, switch_table_size};
pub use stream::{InstructionStream, Line};
pub use symbols::{AssemblerId, Label, Local};
