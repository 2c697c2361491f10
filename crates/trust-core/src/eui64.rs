use serde::{Deserialize, Serialize};
use std::fmt;

/// An 8-byte globally unique interface identifier.
///
/// Rendered in gossip topics and logs as 16 lowercase hex digits.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Parses the lowercase 16-hex-digit form used in gossip topics.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return None;
        }
        let raw = hex::decode(s).ok()?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        Some(Self(bytes))
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let id = Eui64([0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        let hex = id.to_string();
        assert_eq!(hex, "0011223344556677");
        assert_eq!(Eui64::parse_hex(&hex), Some(id));
    }

    #[test]
    fn rejects_uppercase_and_wrong_length() {
        assert_eq!(Eui64::parse_hex("0011223344556677AA"), None);
        assert_eq!(Eui64::parse_hex("00112233445566"), None);
        assert_eq!(Eui64::parse_hex("001122334455667Z"), None);
    }
}
