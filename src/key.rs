//! The per-user secret key fed to AES during passcode derivation.
//!
//! Unlike [`crate::counter::Counter`], a [`SequenceKey`] is never computed
//! on; it is only generated, stored and encrypted-with. It therefore gets
//! its own fixed-size, zeroizing byte container rather than riding on the
//! counter type.

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SEQUENCE_KEY_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("key hex string did not decode to {SEQUENCE_KEY_LEN} bytes")]
    InvalidHexStr,
}

/// A 256-bit secret key, zeroized on drop. `Debug` never prints the
/// contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SequenceKey([u8; SEQUENCE_KEY_LEN]);

impl SequenceKey {
    pub fn from_bytes(bytes: [u8; SEQUENCE_KEY_LEN]) -> Self {
        SequenceKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEQUENCE_KEY_LEN] {
        &self.0
    }

    pub fn from_hex_str(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHexStr)?;
        let arr: [u8; SEQUENCE_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidHexStr)?;
        Ok(SequenceKey(arr))
    }

    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl PartialEq for SequenceKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        bool::from(self.0.ct_eq(&other.0))
    }
}
impl Eq for SequenceKey {}

impl fmt::Debug for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceKey")
            .field("len", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_is_uppercase() {
        let k = SequenceKey::from_bytes([0xAB; SEQUENCE_KEY_LEN]);
        let hex = k.to_hex_upper();
        assert_eq!(hex, hex.to_uppercase());
        assert_eq!(SequenceKey::from_hex_str(&hex).unwrap(), k);
    }

    #[test]
    fn rejects_short_hex_str() {
        assert_eq!(
            SequenceKey::from_hex_str("abcd"),
            Err(KeyError::InvalidHexStr)
        );
    }
}
