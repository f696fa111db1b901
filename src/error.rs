use thiserror::Error;

use crate::assembly::{Label, Local, OpCode, OperandKind};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Why a symbolic label or local was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFault {
    /// The handle was allocated by a different assembler instance.
    Foreign,
    /// The handle belonged to this assembler but was discarded by a rewind.
    Invalidated,
    /// The label has already been marked.
    AlreadyMarked,
    /// A local whose index exists but whose type or pinned flag does not match the roster.
    Mismatched,
}

impl std::fmt::Display for ReferenceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ReferenceFault::Foreign => "owned by another assembler",
            ReferenceFault::Invalidated => "discarded by a rewind",
            ReferenceFault::AlreadyMarked => "already marked",
            ReferenceFault::Mismatched => "does not match the declared slot",
        };
        f.write_str(text)
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every error is raised synchronously by the call that caused it. A failing call leaves the
/// assembler untouched, so the caller either fixes its emission logic or abandons the body.
///
/// # Error Categories
///
/// ## Symbolic references
/// - [`Error::InvalidLabel`] - A label not owned (or no longer owned) by this assembler
/// - [`Error::InvalidLocal`] - A local not owned (or no longer owned) by this assembler
/// - [`Error::UnmarkedLabel`] - A referenced label was never marked before finishing
///
/// ## Instruction shape
/// - [`Error::OperandMismatch`] - The operand does not fit the opcode's operand category
/// - [`Error::SizeTableGap`] - The sizing table has no entry for the opcode
/// - [`Error::InvalidMnemonic`] - Unknown mnemonic during opcode lookup
///
/// ## Regions
/// - [`Error::RegionViolation`] - Exception/scope begin/end calls out of protocol
///
/// ## Encoding
/// - [`Error::UndefinedLabel`] - A sink label was referenced but never placed
/// - [`Error::BranchOutOfRange`] - A branch displacement does not fit its encoding
/// - [`Error::Malformed`] - Arithmetic limits exceeded (offsets, counts)
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut first = RecordingAssembler::new();
/// let mut second = RecordingAssembler::new();
/// let label = first.define_label();
///
/// match second.mark_label(&label) {
///     Err(Error::InvalidLabel { fault, .. }) => assert_eq!(fault, ReferenceFault::Foreign),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Internal limits were exceeded while building the body.
    ///
    /// Raised for conditions such as offsets overflowing `u32` or switch tables with more
    /// targets than the encoding can express. The error records where it was raised.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A label was used that this assembler cannot resolve.
    #[error("Invalid symbolic reference to label {label}: {fault}")]
    InvalidLabel {
        /// The offending label
        label: Label,
        /// Why it was rejected
        fault: ReferenceFault,
    },

    /// A local was used that this assembler cannot resolve.
    #[error("Invalid symbolic reference to local {local}: {fault}")]
    InvalidLocal {
        /// The offending local
        local: Local,
        /// Why it was rejected
        fault: ReferenceFault,
    },

    /// The supplied operand is not what the opcode encodes.
    #[error("Operand mismatch for '{opcode}': expected {expected}, found {found}")]
    OperandMismatch {
        /// The opcode being emitted
        opcode: OpCode,
        /// The operand category the opcode encodes
        expected: OperandKind,
        /// Description of what was supplied instead
        found: String,
    },

    /// Begin/end calls for exception regions or scopes broke the region protocol.
    #[error("Region protocol violation in {operation}: {message}")]
    RegionViolation {
        /// The region operation that was attempted
        operation: &'static str,
        /// What was wrong with the current region state
        message: String,
    },

    /// The opcode has no entry in the operand size table.
    #[error("No operand size entry for '{0}'")]
    SizeTableGap(OpCode),

    /// A label targeted by a branch was never marked.
    #[error("Label {0} is referenced but never marked")]
    UnmarkedLabel(Label),

    /// A sink-side label was referenced but never placed.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A branch displacement does not fit the encoding chosen for it.
    #[error("Branch from '{opcode}' at offset {position} to {target} is out of range ({displacement} does not fit)")]
    BranchOutOfRange {
        /// The branch opcode
        opcode: OpCode,
        /// Offset of the branch instruction
        position: u32,
        /// Offset of the branch target
        target: u32,
        /// The displacement that had to be encoded
        displacement: i64,
    },

    /// The mnemonic does not name a known opcode.
    #[error("Invalid mnemonic - {0}")]
    InvalidMnemonic(String),

    /// Generic error for miscellaneous failures.
    ///
    /// Used by code sinks to report failures that don't fit into other categories.
    #[error("{0}")]
    Error(String),
}
