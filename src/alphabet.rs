//! The passcode alphabet registry: five built-in alphabets plus one
//! policy-configured custom alphabet, selected by a small integer id.

use thiserror::Error;

/// `simple`: 64 characters.
pub const ALPHABET_SIMPLE: &str =
    "!#%+23456789:=?@ABCDEFGHJKLMNPRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
/// `extended`: 88 characters.
pub const ALPHABET_EXTENDED: &str =
    "!\"#$%&'()*+,-./23456789:;<=>?@ABCDEFGHJKLMNOPRSTUVWXYZ[\\]^_abcdefghijkmnopqrstuvwxyz{|}~";
/// `simple_no_vowels`: 54 characters.
pub const ALPHABET_SIMPLE_NO_VOWELS: &str =
    "!#%+23456789:=?@BCDFGHJKLMNPRSTVWXZbcdfghjkmnpqrstvwxz";
/// `extended_no_vowels`: 78 characters.
pub const ALPHABET_EXTENDED_NO_VOWELS: &str =
    "!\"#$%&'()*+,-./23456789:;<=>?@BCDFGHJKLMNPRSTVWXZ[\\]^_bcdfghjkmnpqrstvwxz{|}~";
/// `alpha`: 56 characters.
pub const ALPHABET_ALPHA: &str = "23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPRSTUVWXYZ";

pub const MIN_CODE_LENGTH: u32 = 2;
pub const MAX_CODE_LENGTH: u32 = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AlphabetError {
    #[error("alphabet id {0} is not a recognized built-in alphabet")]
    UnknownId(u8),
    #[error("custom alphabet was requested but none is configured")]
    NoCustomAlphabet,
    #[error("alphabet length {len} is outside the allowed range [{min}, {max}]")]
    LengthOutOfPolicy { len: usize, min: usize, max: usize },
}

/// Selects one of the built-in alphabets, or the policy-configured
/// custom alphabet when `id == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlphabetId {
    Custom,
    Simple,
    Extended,
    SimpleNoVowels,
    ExtendedNoVowels,
    Alpha,
}

impl AlphabetId {
    pub fn from_u8(id: u8) -> Result<Self, AlphabetError> {
        Ok(match id {
            0 => AlphabetId::Custom,
            1 => AlphabetId::Simple,
            2 => AlphabetId::Extended,
            3 => AlphabetId::SimpleNoVowels,
            4 => AlphabetId::ExtendedNoVowels,
            5 => AlphabetId::Alpha,
            other => return Err(AlphabetError::UnknownId(other)),
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            AlphabetId::Custom => 0,
            AlphabetId::Simple => 1,
            AlphabetId::Extended => 2,
            AlphabetId::SimpleNoVowels => 3,
            AlphabetId::ExtendedNoVowels => 4,
            AlphabetId::Alpha => 5,
        }
    }

    /// Resolves this id to its character table. `custom` is consulted
    /// only for [`AlphabetId::Custom`].
    pub fn resolve<'a>(&self, custom: Option<&'a str>) -> Result<&'a str, AlphabetError> {
        Ok(match self {
            AlphabetId::Custom => custom.ok_or(AlphabetError::NoCustomAlphabet)?,
            AlphabetId::Simple => ALPHABET_SIMPLE,
            AlphabetId::Extended => ALPHABET_EXTENDED,
            AlphabetId::SimpleNoVowels => ALPHABET_SIMPLE_NO_VOWELS,
            AlphabetId::ExtendedNoVowels => ALPHABET_EXTENDED_NO_VOWELS,
            AlphabetId::Alpha => ALPHABET_ALPHA,
        })
    }
}

/// Validates that an alphabet string's length fits within the policy
/// bounds `[min, max]`.
pub fn check_length_policy(alphabet: &str, min: usize, max: usize) -> Result<(), AlphabetError> {
    let len = alphabet.chars().count();
    if len < min || len > max {
        return Err(AlphabetError::LengthOutOfPolicy { len, min, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_alphabets_have_the_documented_lengths() {
        assert_eq!(ALPHABET_SIMPLE.chars().count(), 64);
        assert_eq!(ALPHABET_EXTENDED.chars().count(), 88);
        assert_eq!(ALPHABET_SIMPLE_NO_VOWELS.chars().count(), 54);
        assert_eq!(ALPHABET_EXTENDED_NO_VOWELS.chars().count(), 78);
        assert_eq!(ALPHABET_ALPHA.chars().count(), 56);
    }

    #[test]
    fn id_round_trips() {
        for id in [
            AlphabetId::Custom,
            AlphabetId::Simple,
            AlphabetId::Extended,
            AlphabetId::SimpleNoVowels,
            AlphabetId::ExtendedNoVowels,
            AlphabetId::Alpha,
        ] {
            assert_eq!(AlphabetId::from_u8(id.to_u8()).unwrap(), id);
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        assert_eq!(AlphabetId::from_u8(6), Err(AlphabetError::UnknownId(6)));
    }

    #[test]
    fn custom_without_configuration_is_an_error() {
        assert_eq!(
            AlphabetId::Custom.resolve(None),
            Err(AlphabetError::NoCustomAlphabet)
        );
    }
}
