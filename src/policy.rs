//! The configuration snapshot every mutating operation is checked
//! against. `Policy` is built once per process (from whatever on-disk
//! config format a caller parses -- that grammar is outside this crate)
//! and passed by reference into every gate check; it carries no
//! interior mutability and no global state.

use crate::alphabet::AlphabetId;
use crate::PolicyDenial;

/// A disallow/allow/enforce tri-state, used for the `salt` and `show`
/// policy knobs: `Enforce` overrides whatever the caller asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriState {
    Disallow,
    Allow,
    Enforce,
}

/// Bits set by [`validate_spass`] describing why a candidate static
/// password was rejected. Zero means acceptable.
pub mod spass_violation {
    pub const SHORT: u32 = 1 << 0;
    pub const NO_DIGITS: u32 = 1 << 1;
    pub const NO_UPPERCASE: u32 = 1 << 2;
    pub const NO_SPECIAL: u32 = 1 << 3;
    pub const ILLEGAL_CHARACTER: u32 = 1 << 4;
    pub const NON_ASCII: u32 = 1 << 5;
}

#[derive(Clone, Debug)]
pub struct Policy {
    pub key_generation: bool,
    pub key_regeneration: bool,
    pub key_removal: bool,
    pub disabling: bool,
    pub skipping: bool,
    pub passcode_print: bool,
    pub key_print: bool,

    pub salt: TriState,
    pub show: TriState,

    pub alphabet_change: bool,
    pub alphabet_def: AlphabetId,
    pub alphabet_min_length: usize,
    pub alphabet_max_length: usize,
    pub custom_alphabet: Option<String>,

    pub passcode_def_length: u32,
    pub passcode_min_length: u32,
    pub passcode_max_length: u32,

    pub contact_change: bool,
    pub label_change: bool,

    pub spass_change: bool,
    pub spass_min_length: usize,
    pub spass_require_digit: bool,
    pub spass_require_special: bool,
    pub spass_require_uppercase: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            key_generation: true,
            key_regeneration: true,
            key_removal: true,
            disabling: true,
            skipping: true,
            passcode_print: true,
            key_print: false,
            salt: TriState::Allow,
            show: TriState::Allow,
            alphabet_change: true,
            alphabet_def: AlphabetId::Simple,
            alphabet_min_length: 54,
            alphabet_max_length: 88,
            custom_alphabet: None,
            passcode_def_length: 4,
            passcode_min_length: 2,
            passcode_max_length: 16,
            contact_change: true,
            label_change: true,
            spass_change: true,
            spass_min_length: 8,
            spass_require_digit: false,
            spass_require_special: false,
            spass_require_uppercase: false,
        }
    }
}

macro_rules! gate {
    ($name:ident, $field:ident, $denial:ident) => {
        pub fn $name(&self) -> Result<(), PolicyDenial> {
            if self.$field {
                Ok(())
            } else {
                Err(PolicyDenial::$denial)
            }
        }
    };
}

impl Policy {
    gate!(check_key_generation, key_generation, KeyGeneration);
    gate!(check_key_regeneration, key_regeneration, KeyRegeneration);
    gate!(check_key_removal, key_removal, KeyRemoval);
    gate!(check_disabling, disabling, Disabling);
    gate!(check_skipping, skipping, Skipping);
    gate!(check_passcode_print, passcode_print, PasscodePrint);
    gate!(check_key_print, key_print, KeyPrint);
    gate!(check_contact_change, contact_change, ContactChange);
    gate!(check_label_change, label_change, LabelChange);
    gate!(check_spass_change, spass_change, SpassChange);

    /// Resolves whether a freshly generated state should have the
    /// `SALTED` flag set, given what the caller requested.
    pub fn resolve_salt(&self, requested: bool) -> Result<bool, PolicyDenial> {
        match self.salt {
            TriState::Disallow if requested => Err(PolicyDenial::Salt),
            TriState::Disallow => Ok(false),
            TriState::Enforce => Ok(true),
            TriState::Allow => Ok(requested),
        }
    }

    /// Resolves whether a freshly generated state should have the
    /// `SHOW` flag set.
    pub fn resolve_show(&self, requested: bool) -> Result<bool, PolicyDenial> {
        match self.show {
            TriState::Disallow if requested => Err(PolicyDenial::Show),
            TriState::Disallow => Ok(false),
            TriState::Enforce => Ok(true),
            TriState::Allow => Ok(requested),
        }
    }

    pub fn check_alphabet(&self, id: AlphabetId) -> Result<(), PolicyDenial> {
        if id != self.alphabet_def && !self.alphabet_change {
            return Err(PolicyDenial::Alphabet);
        }
        let table = id
            .resolve(self.custom_alphabet.as_deref())
            .map_err(|_| PolicyDenial::Alphabet)?;
        crate::alphabet::check_length_policy(
            table,
            self.alphabet_min_length,
            self.alphabet_max_length,
        )
        .map_err(|_| PolicyDenial::Alphabet)
    }

    pub fn check_code_length(&self, len: u32) -> Result<(), PolicyDenial> {
        if len < self.passcode_min_length || len > self.passcode_max_length {
            return Err(PolicyDenial::PasscodeLength);
        }
        Ok(())
    }

    /// Checks a candidate static password against the configured rules,
    /// returning a bitset of [`spass_violation`] bits (zero = accepted).
    pub fn validate_spass(&self, candidate: &str) -> u32 {
        let mut bits = 0;
        if candidate.len() < self.spass_min_length {
            bits |= spass_violation::SHORT;
        }
        if !candidate.is_ascii() {
            bits |= spass_violation::NON_ASCII;
        }
        if candidate.bytes().any(|b| b < 0x20) {
            bits |= spass_violation::ILLEGAL_CHARACTER;
        }
        if self.spass_require_digit && !candidate.bytes().any(|b| b.is_ascii_digit()) {
            bits |= spass_violation::NO_DIGITS;
        }
        if self.spass_require_uppercase && !candidate.bytes().any(|b| b.is_ascii_uppercase()) {
            bits |= spass_violation::NO_UPPERCASE;
        }
        if self.spass_require_special
            && !candidate
                .bytes()
                .any(|b| b.is_ascii_punctuation() && !b.is_ascii_alphanumeric())
        {
            bits |= spass_violation::NO_SPECIAL;
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_overrides_a_disabled_request() {
        let mut p = Policy::default();
        p.salt = TriState::Enforce;
        assert_eq!(p.resolve_salt(false), Ok(true));
    }

    #[test]
    fn disallow_rejects_an_explicit_request() {
        let mut p = Policy::default();
        p.salt = TriState::Disallow;
        assert_eq!(p.resolve_salt(true), Err(PolicyDenial::Salt));
        assert_eq!(p.resolve_salt(false), Ok(false));
    }

    #[test]
    fn allow_passes_through_the_request() {
        let p = Policy::default();
        assert_eq!(p.resolve_show(true), Ok(true));
        assert_eq!(p.resolve_show(false), Ok(false));
    }

    #[test]
    fn validate_spass_flags_short_passwords() {
        let p = Policy::default();
        let bits = p.validate_spass("short");
        assert_ne!(bits & spass_violation::SHORT, 0);
    }

    #[test]
    fn validate_spass_accepts_a_policy_conforming_password() {
        let p = Policy::default();
        assert_eq!(p.validate_spass("longenoughpw"), 0);
    }

    #[test]
    fn key_generation_gate_reflects_policy() {
        let mut p = Policy::default();
        p.key_generation = false;
        assert_eq!(
            p.check_key_generation(),
            Err(PolicyDenial::KeyGeneration)
        );
    }
}
