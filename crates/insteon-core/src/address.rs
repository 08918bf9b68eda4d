//! Insteon device addresses.
//!
//! Every Insteon device and every PLM carries a 3-byte address printed on
//! its label as three hex pairs (`1A.2B.3C`). The engine keeps addresses as
//! raw bytes and renders them as lowercase dotted hex; parsing accepts either
//! case. Conversion in both directions is exact.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 3-byte Insteon address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 3]);

impl Address {
    /// Build an address from its three raw bytes.
    pub const fn new(bytes: [u8; 3]) -> Self {
        Address(bytes)
    }

    /// Read an address from the first three bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        match data {
            [a, b, c, ..] => Ok(Address([*a, *b, *c])),
            _ => Err(Error::Parse(format!(
                "address needs 3 bytes, got {}",
                data.len()
            ))),
        }
    }

    /// The raw address bytes, high byte first.
    pub const fn bytes(&self) -> [u8; 3] {
        self.0
    }

    /// Whether this is a group/broadcast pseudo-address (`00.00.xx`).
    ///
    /// Broadcast and all-link messages put the group number (or a
    /// device-specific report code) in the last byte of the to-address.
    pub fn is_group(&self) -> bool {
        self.0[0] == 0 && self.0[1] == 0
    }

    /// The group number of a `00.00.xx` address.
    pub fn group(&self) -> Option<u8> {
        self.is_group().then_some(self.0[2])
    }
}

impl From<[u8; 3]> for Address {
    fn from(bytes: [u8; 3]) -> Self {
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 3];
        let mut parts = s.split('.');
        for slot in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::Parse(format!("address {s:?} needs 3 segments")))?;
            // from_str_radix alone would take a sign, e.g. "+1".
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::Parse(format!(
                    "address segment {part:?} in {s:?} is not a hex pair"
                )));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Parse(format!("address segment {part:?} in {s:?} is not hex")))?;
        }
        if parts.next().is_some() {
            return Err(Error::Parse(format!("address {s:?} has more than 3 segments")));
        }
        Ok(Address(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_dotted_hex() {
        let addr = Address::new([0x1A, 0x2B, 0x3C]);
        assert_eq!(addr.to_string(), "1a.2b.3c");
        assert_eq!(Address::new([0, 0, 2]).to_string(), "00.00.02");
    }

    #[test]
    fn parse_accepts_both_cases() {
        let upper: Address = "1A.2B.3C".parse().unwrap();
        let lower: Address = "1a.2b.3c".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.bytes(), [0x1A, 0x2B, 0x3C]);
    }

    #[test]
    fn round_trip_every_byte_value_in_every_position() {
        for pos in 0..3 {
            for value in 0..=255u8 {
                let mut bytes = [0x5A; 3];
                bytes[pos] = value;
                let addr = Address::new(bytes);
                let parsed: Address = addr.to_string().parse().unwrap();
                assert_eq!(parsed, addr);
            }
        }
    }

    #[test]
    fn malformed_addresses_are_parse_errors() {
        for bad in ["", "11.22", "11.22.33.44", "11.22.3", "11.22.333", "gg.22.33", "11-22-33", "11..33", "+1.22.33", "1.22.33", "11.-2.33"] {
            let result = bad.parse::<Address>();
            assert!(
                matches!(result, Err(Error::Parse(_))),
                "expected parse error for {bad:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn from_slice_requires_three_bytes() {
        assert_eq!(
            Address::from_slice(&[0x11, 0x22, 0x33, 0x44]).unwrap(),
            Address::new([0x11, 0x22, 0x33])
        );
        assert!(matches!(Address::from_slice(&[0x11, 0x22]), Err(Error::Parse(_))));
    }

    #[test]
    fn group_addresses() {
        let group = Address::new([0, 0, 3]);
        assert!(group.is_group());
        assert_eq!(group.group(), Some(3));

        let device = Address::new([0x11, 0x00, 0x03]);
        assert!(!device.is_group());
        assert_eq!(device.group(), None);
    }
}
