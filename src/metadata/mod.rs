//! Metadata types the assembler exchanges with its collaborators.
//!
//! The assembler does not read or write assemblies. It only carries the values a
//! member-search layer hands it, and produces the raw pieces a method body writer needs.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references embedded in instructions
//! - [`handles`] - Opaque field, method, constructor and type handles used as operands
//! - [`exceptions`] - Exception handling clauses and their method data section encoding
//! - [`userstrings`] - The `#US` heap that `ldstr` literals are interned into
//!
//! # Reference
//! - ECMA-335 6th Edition, Partition II, Sections 22 and 24-25

/// Metadata tokens
pub mod token;

/// Member handles
pub mod handles;

/// Exception clauses
pub mod exceptions;

/// User string heap
pub mod userstrings;
