//! User String Heap (`#US`) builder.
//!
//! `ldstr` operands are interned here and replaced by `0x70` tokens whose row is the byte
//! offset of the entry in the heap. Each entry is a compressed length, the UTF-16LE code
//! units, and a trailing flag byte that is set when the string holds characters needing
//! special handling. Offset 0 is the mandatory empty entry.
//!
//! # Reference
//! - ECMA-335 II.24.2.4

use std::collections::HashMap;

use widestring::U16String;

use crate::{metadata::token::Token, Result};

/// Largest heap offset a user string token can address.
const MAX_OFFSET: usize = 0x00FF_FFFF;

/// An append-only `#US` heap with deduplication.
///
/// # Examples
///
/// ```rust
/// use cilemit::metadata::userstrings::UserStringHeap;
///
/// let mut heap = UserStringHeap::new();
/// let token = heap.intern("A")?;
/// assert_eq!(token.value(), 0x7000_0001);
/// assert_eq!(heap.as_bytes(), &[0x00, 0x03, 0x41, 0x00, 0x00]);
/// assert_eq!(heap.get(token).as_deref(), Some("A"));
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct UserStringHeap {
    data: Vec<u8>,
    interned: HashMap<String, u32>,
}

impl Default for UserStringHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStringHeap {
    /// Creates a heap holding only the empty entry at offset 0.
    #[must_use]
    pub fn new() -> Self {
        UserStringHeap {
            data: vec![0],
            interned: HashMap::new(),
        }
    }

    /// Adds `value` (or finds it) and returns its token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the heap has outgrown the 24-bit token row.
    pub fn intern(&mut self, value: &str) -> Result<Token> {
        if let Some(offset) = self.interned.get(value) {
            return Ok(Token::from_parts(Token::TABLE_USER_STRING, *offset));
        }

        let offset = self.data.len();
        if offset > MAX_OFFSET {
            return Err(malformed_error!(
                "User string heap exceeds {} bytes",
                MAX_OFFSET
            ));
        }

        let units = U16String::from_str(value).into_vec();
        let blob_len = units.len() * 2 + 1;
        write_compressed_length(&mut self.data, blob_len)?;
        for unit in &units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(units.iter().any(|unit| needs_flag(*unit))));

        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u32;
        self.interned.insert(value.to_string(), offset);
        Ok(Token::from_parts(Token::TABLE_USER_STRING, offset))
    }

    /// Looks up the string a token refers to.
    #[must_use]
    pub fn get(&self, token: Token) -> Option<String> {
        if !token.is_user_string() {
            return None;
        }

        let offset = token.row() as usize;
        let (blob_len, header) = read_compressed_length(self.data.get(offset..)?)?;
        let start = offset + header;
        let units: Vec<u16> = self
            .data
            .get(start..start + blob_len.checked_sub(1)?)?
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        U16String::from_vec(units).to_string().ok()
    }

    /// Number of distinct strings interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interned.len()
    }

    /// True if no string has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }

    /// The heap bytes as they would appear in the `#US` stream.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the heap and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// ECMA-335 II.24.2.4: set the flag for any unit with a non-zero high byte, or a low byte
/// in 0x01..=0x08, 0x0E..=0x1F, 0x27, 0x2D or 0x7F.
fn needs_flag(unit: u16) -> bool {
    if unit > 0xFF {
        return true;
    }
    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

#[allow(clippy::cast_possible_truncation)]
fn write_compressed_length(buffer: &mut Vec<u8>, len: usize) -> Result<()> {
    if len < 0x80 {
        buffer.push(len as u8);
    } else if len < 0x4000 {
        buffer.extend_from_slice(&((len as u16) | 0x8000).to_be_bytes());
    } else if len < 0x2000_0000 {
        buffer.extend_from_slice(&((len as u32) | 0xC000_0000).to_be_bytes());
    } else {
        return Err(malformed_error!("User string of {} bytes is too long", len));
    }
    Ok(())
}

fn read_compressed_length(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.first()?;
    if first & 0x80 == 0 {
        Some((usize::from(first), 1))
    } else if first & 0xC0 == 0x80 {
        let bytes = data.get(..2)?;
        Some((usize::from(u16::from_be_bytes([bytes[0], bytes[1]]) & 0x3FFF), 2))
    } else {
        let bytes = data.get(..4)?;
        let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x1FFF_FFFF;
        Some((value as usize, 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() -> Result<()> {
        let mut heap = UserStringHeap::new();
        let hello = heap.intern("hello")?;
        let world = heap.intern("world")?;
        assert_eq!(heap.intern("hello")?, hello);
        assert_ne!(hello, world);
        assert_eq!(heap.len(), 2);

        // 1 empty + (1 + 10 + 1) per string
        assert_eq!(heap.as_bytes().len(), 1 + 12 + 12);
        assert_eq!(world.row(), 13);
        Ok(())
    }

    #[test]
    fn test_flag_byte() -> Result<()> {
        let mut heap = UserStringHeap::new();
        heap.intern("it's")?;
        assert_eq!(heap.as_bytes().last(), Some(&1));

        let mut plain = UserStringHeap::new();
        plain.intern("abc")?;
        assert_eq!(plain.as_bytes().last(), Some(&0));
        Ok(())
    }

    #[test]
    fn test_long_string_uses_two_byte_length() -> Result<()> {
        let text = "x".repeat(100);
        let mut heap = UserStringHeap::new();
        let token = heap.intern(&text)?;

        assert_eq!(&heap.as_bytes()[1..3], &[0x80, 201]);
        assert_eq!(heap.get(token), Some(text));
        Ok(())
    }

    #[test]
    fn test_non_ascii_round_trip() -> Result<()> {
        let mut heap = UserStringHeap::new();
        let token = heap.intern("Grüße, 世界")?;
        assert_eq!(heap.get(token).as_deref(), Some("Grüße, 世界"));
        assert!(heap.get(Token::new(0x0600_0001)).is_none());
        Ok(())
    }

    #[test]
    fn test_empty_string() -> Result<()> {
        let mut heap = UserStringHeap::new();
        let token = heap.intern("")?;
        assert_eq!(heap.get(token).as_deref(), Some(""));
        assert_eq!(&heap.as_bytes()[1..], &[0x01, 0x00]);
        Ok(())
    }
}
