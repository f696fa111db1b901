// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilemit
//!
//! A symbolic assembler for CIL (Common Intermediate Language) method bodies. Callers emit
//! instructions one at a time with integer, floating point, string, metadata-handle, label
//! and local operands, while two decisions are deferred:
//!
//! - the concrete identity of labels and locals, which stay symbolic until a backend
//!   resolves them, and
//! - whether instructions are only recorded for inspection, or mirrored into a live code
//!   generation backend as they are emitted.
//!
//! ## Quick Start
//!
//! ```rust
//! use cilemit::prelude::*;
//!
//! let mut asm = RecordingAssembler::new();
//! asm.emit_i32(OpCode::LdcI4, 5)?
//!     .emit_i32(OpCode::LdcI4, 7)?
//!     .emit(OpCode::Add)?
//!     .ret()?;
//!
//! let offsets: Vec<u32> = asm.stream().iter().map(|line| line.offset()).collect();
//! assert_eq!(offsets, vec![0, 5, 10, 11]);
//! # Ok::<(), cilemit::Error>(())
//! ```
//!
//! ### Producing bytecode
//!
//! A [`assembly::BackedAssembler`] records exactly like the recording assembler and also
//! drives a [`assembly::CodeSink`]. The bundled [`assembly::BytecodeSink`] turns the calls
//! into CIL bytes, local signatures and exception clauses:
//!
//! ```rust
//! use cilemit::prelude::*;
//!
//! let mut asm = BackedAssembler::new(BytecodeSink::new());
//! let exit = asm.begin_exception_block()?;
//! asm.emit(OpCode::Nop)?.emit_label(OpCode::LeaveS, &exit)?;
//! asm.begin_finally_block()?.emit(OpCode::Endfinally)?;
//! asm.end_exception_block()?.ret()?;
//!
//! let (stream, sink) = asm.finish()?;
//! let body = sink.finish()?;
//! assert_eq!(body.code.len() as u32, stream.end_offset());
//! assert_eq!(body.exception_clauses.len(), 1);
//! # Ok::<(), cilemit::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`assembly`] - Opcodes, instruction model, emitters, regions, sinks and disassembly
//! - [`metadata`] - Tokens, member handles, exception clauses and the user-string heap
//! - [`cache`] - Explicit caches for generated helpers
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Guarantees
//!
//! - Instruction sizes depend only on opcode and operand, so every line's offset is the
//!   running sum of the sizes before it.
//! - Labels and locals are scoped to the assembler that allocated them; using them
//!   anywhere else fails at the offending call.
//! - A failing call leaves the assembler unchanged.
//! - Exception regions and scopes follow an explicit begin/end protocol tracked as a
//!   stack.
//!
//! The assembler does not verify that a body is semantically valid for the runtime, and it
//! never picks between short and long branch encodings on the caller's behalf.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = RecordingAssembler::new();
/// asm.ldc_i4(1)?.ret()?;
/// assert_eq!(asm.stream().end_offset(), 2);
/// # Ok::<(), cilemit::Error>(())
/// ```
pub mod prelude;

/// Symbolic instruction-stream assembly.
///
/// See the module documentation for the recording and backed assemblers, the emitter
/// traits and the bytecode sink.
pub mod assembly;

/// Explicit helper caches keyed by structural shapes.
pub mod cache;

/// Metadata collaborator types: tokens, member handles, exception clauses and the
/// user-string heap.
pub mod metadata;

/// `cilemit` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilemit` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = RecordingAssembler::new();
/// match asm.end_exception_block() {
///     Err(Error::RegionViolation { operation, .. }) => {
///         assert_eq!(operation, "end_exception_block")
///     }
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub use error::Error;

/// Why a symbolic label or local was rejected.
pub use error::ReferenceFault;
