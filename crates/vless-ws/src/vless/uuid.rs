use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Write as _},
    str::FromStr,
};

use super::ProtocolError;

// Hyphen positions of the canonical 8-4-4-4-12 text form.
const GROUP_ENDS: [usize; 4] = [8, 13, 18, 23];
const CANONICAL_LEN: usize = 36;

/// A VLESS user identifier, the 16 raw bytes of an RFC 4122 UUID.
///
/// Wire order is the big-endian field order, so the byte array can be
/// compared and hashed directly without field decomposition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Generates a random identifier (version/variant bits included).
    pub fn random() -> Self {
        let mut data = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut data);
        data[6] = (data[6] & 0x0f) | 0x40;
        data[8] = (data[8] & 0x3f) | 0x80;
        Self(data)
    }

    /// Builds an identifier from its 16 wire bytes.
    pub fn from_bytes(b: &[u8]) -> Result<Self, ProtocolError> {
        let data: [u8; 16] = b.try_into().map_err(|_| ProtocolError::ShortHeader)?;
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for Uuid {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CANONICAL_LEN {
            return Err(ProtocolError::InvalidUserId);
        }

        let mut hex_digits = [0u8; 32];
        let mut n = 0;
        for (pos, c) in s.bytes().enumerate() {
            if GROUP_ENDS.contains(&pos) {
                if c != b'-' {
                    return Err(ProtocolError::InvalidUserId);
                }
                continue;
            }
            if n == hex_digits.len() {
                return Err(ProtocolError::InvalidUserId);
            }
            hex_digits[n] = c;
            n += 1;
        }

        let mut data = [0u8; 16];
        hex::decode_to_slice(&hex_digits[..n], &mut data).map_err(|_| ProtocolError::InvalidUserId)?;
        Ok(Self(data))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        f.write_str(&hex[..8])?;
        for group in [8..12, 12..16, 16..20, 20..32] {
            f.write_char('-')?;
            f.write_str(&hex[group])?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Uuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
