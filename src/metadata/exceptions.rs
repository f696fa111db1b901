//! Exception handling clauses of an assembled method body.
//!
//! Clauses are produced by the bytecode sink as regions close, innermost first, which is
//! the order the runtime requires. [`encode_exception_section`] lays them out as the
//! extra data section that follows the code of a method body, choosing the small layout
//! when every clause fits it.
//!
//! # Reference
//! - ECMA-335 6th Edition, Partition II, Section 25.4.5 and 25.4.6

use bitflags::bitflags;

use crate::metadata::token::Token;

/// `CorILMethod_Sect_EHTable`
pub const SECTION_EH_TABLE: u8 = 0x01;
/// `CorILMethod_Sect_FatFormat`
pub const SECTION_FAT_FORMAT: u8 = 0x40;
/// `CorILMethod_Sect_MoreSects`
pub const SECTION_MORE_SECTS: u8 = 0x80;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `class_token` names the caught type.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// The filter code at `filter_offset` decides whether the handler runs.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// One try/handler pair of a method body.
///
/// ```text
/// try {
///     // try_offset -> try_offset + try_length
/// }
/// catch (ExceptionType) / filter / finally / fault {
///     // handler_offset -> handler_offset + handler_length
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Kind of handler.
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of the try block from the start of the body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Offset in bytes of the handler block.
    pub handler_offset: u32,
    /// Length in bytes of the handler block.
    pub handler_length: u32,
    /// The caught type, for typed clauses.
    pub class_token: Option<Token>,
    /// Start of the filter expression, for filter clauses.
    pub filter_offset: Option<u32>,
}

impl ExceptionClause {
    /// True if the clause fits the small (12-byte) layout.
    #[must_use]
    pub fn is_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }

    /// The value stored in the shared class-token / filter-offset slot.
    #[must_use]
    pub fn class_or_filter(&self) -> u32 {
        if self.flags.contains(ExceptionHandlerFlags::FILTER) {
            self.filter_offset.unwrap_or(0)
        } else {
            self.class_token.map_or(0, |token| token.value())
        }
    }

    /// End of the handler block (exclusive).
    #[must_use]
    pub fn handler_end(&self) -> u32 {
        self.handler_offset.saturating_add(self.handler_length)
    }
}

/// Encodes `clauses` as a method body extra data section.
///
/// Returns an empty vector when there are no clauses. The small layout is used when all
/// clauses fit it and the section size fits one byte; otherwise the fat layout is used.
/// Any padding needed to 4-byte align the section after the code is left to the caller.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_exception_section(clauses: &[ExceptionClause]) -> Vec<u8> {
    if clauses.is_empty() {
        return Vec::new();
    }

    let small_size = clauses.len() * 12 + 4;
    if small_size <= usize::from(u8::MAX) && clauses.iter().all(ExceptionClause::is_small) {
        let mut section = Vec::with_capacity(small_size);
        section.push(SECTION_EH_TABLE);
        section.push(small_size as u8);
        section.extend_from_slice(&[0, 0]);

        for clause in clauses {
            section.extend_from_slice(&clause.flags.bits().to_le_bytes());
            section.extend_from_slice(&(clause.try_offset as u16).to_le_bytes());
            section.push(clause.try_length as u8);
            section.extend_from_slice(&(clause.handler_offset as u16).to_le_bytes());
            section.push(clause.handler_length as u8);
            section.extend_from_slice(&clause.class_or_filter().to_le_bytes());
        }
        return section;
    }

    let fat_size = clauses.len() * 24 + 4;
    let mut section = Vec::with_capacity(fat_size);
    section.push(SECTION_EH_TABLE | SECTION_FAT_FORMAT);
    section.extend_from_slice(&(fat_size as u32).to_le_bytes()[..3]);

    for clause in clauses {
        section.extend_from_slice(&u32::from(clause.flags.bits()).to_le_bytes());
        section.extend_from_slice(&clause.try_offset.to_le_bytes());
        section.extend_from_slice(&clause.try_length.to_le_bytes());
        section.extend_from_slice(&clause.handler_offset.to_le_bytes());
        section.extend_from_slice(&clause.handler_length.to_le_bytes());
        section.extend_from_slice(&clause.class_or_filter().to_le_bytes());
    }
    section
}
