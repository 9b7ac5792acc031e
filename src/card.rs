//! Card identifier type
//!
//! Wraps the hex identifier the reader reports for a proximity card.

use std::fmt;

/// Identifier of a proximity card as reported by the sensor transport.
///
/// Stored trimmed and uppercased so `04A3B2C1` and `04a3b2c1 ` compare equal.
/// Equality is exact-string beyond that normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardId(String);

impl CardId {
    /// Parse a raw identifier string from the transport.
    ///
    /// Returns `None` for empty input or anything that is not hex — line
    /// noise from the reader must never turn into a phantom card.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        // Odd-length UIDs don't occur in the wild; pad-free validation only.
        if trimmed.len() % 2 != 0 || hex::decode(trimmed).is_err() {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    /// Build an identifier from the raw UID bytes a bus-level reader yields.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let id = CardId::parse(" 04a3b2c1\n").unwrap();
        assert_eq!(id.as_str(), "04A3B2C1");
        assert_eq!(id, CardId::parse("04A3B2C1").unwrap());
    }

    #[test]
    fn parse_rejects_empty_and_non_hex() {
        assert!(CardId::parse("").is_none());
        assert!(CardId::parse("   ").is_none());
        assert!(CardId::parse("hello!").is_none());
        assert!(CardId::parse("ABC").is_none()); // odd length
    }

    #[test]
    fn from_bytes_matches_reader_format() {
        let id = CardId::from_bytes(&[0x04, 0xA3, 0xB2, 0xC1]);
        assert_eq!(id.as_str(), "04A3B2C1");
    }
}
