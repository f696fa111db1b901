//! Metadata tokens carried by member-handle operands.
//!
//! A token is the 32-bit reference CIL embeds after `call`, `ldfld`, `newobj`,
//! `ldstr` and friends. The high byte selects the metadata table (or the `#US`
//! heap for string literals), the low 24 bits hold the row or heap offset.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token representing a reference to a metadata table entry or heap offset.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table
    pub const TABLE_TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TABLE_TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const TABLE_FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const TABLE_METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table
    pub const TABLE_MEMBER_REF: u8 = 0x0A;
    /// `StandAloneSig` table
    pub const TABLE_STANDALONE_SIG: u8 = 0x11;
    /// `TypeSpec` table
    pub const TABLE_TYPE_SPEC: u8 = 0x1B;
    /// `MethodSpec` table
    pub const TABLE_METHOD_SPEC: u8 = 0x2B;
    /// Pseudo-table for offsets into the `#US` heap, used by `ldstr`
    pub const TABLE_USER_STRING: u8 = 0x70;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table byte and a 24-bit row (or heap offset).
    ///
    /// Bits of `row` above the low 24 are discarded.
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token addresses a type-like table (`TypeDef`, `TypeRef`, `TypeSpec`).
    #[must_use]
    pub const fn is_type(&self) -> bool {
        matches!(
            self.table(),
            Self::TABLE_TYPE_DEF | Self::TABLE_TYPE_REF | Self::TABLE_TYPE_SPEC
        )
    }

    /// Returns true if the token addresses a method-like table (`MethodDef`, `MemberRef`, `MethodSpec`).
    #[must_use]
    pub const fn is_method(&self) -> bool {
        matches!(
            self.table(),
            Self::TABLE_METHOD_DEF | Self::TABLE_MEMBER_REF | Self::TABLE_METHOD_SPEC
        )
    }

    /// Returns true if the token is a `#US` heap reference.
    #[must_use]
    pub const fn is_user_string(&self) -> bool {
        self.table() == Self::TABLE_USER_STRING
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(Token::TABLE_METHOD_DEF, 1);
        assert_eq!(token.value(), 0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
    }

    #[test]
    fn test_token_row_is_masked() {
        let token = Token::from_parts(Token::TABLE_FIELD, 0xFF00_0002);
        assert_eq!(token.value(), 0x0400_0002);
    }

    #[test]
    fn test_token_classification() {
        assert!(Token::new(0x0200_0001).is_type());
        assert!(Token::new(0x1B00_0003).is_type());
        assert!(!Token::new(0x0400_0001).is_type());

        assert!(Token::new(0x0A00_0010).is_method());
        assert!(Token::new(0x2B00_0001).is_method());
        assert!(!Token::new(0x0200_0001).is_method());

        assert!(Token::from_parts(Token::TABLE_USER_STRING, 1).is_user_string());
    }

    #[test]
    fn test_token_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_formatting() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{token}"), "0x06000001");

        let debug_str = format!("{token:?}");
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }
}
