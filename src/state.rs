//! The in-memory representation of a single user's OTP state: key,
//! counter, flags, and the bookkeeping fields that ride alongside them.

use thiserror::Error;

use crate::counter::Counter;
use crate::key::SequenceKey;

pub const STATE_VERSION: u32 = 1;
pub const LABEL_MAX_LEN: usize = 30;
pub const CONTACT_MAX_LEN: usize = 60;
pub const SPASS_HASH_LEN: usize = 40;
pub const MAX_FAILURE_COUNT: u64 = 1_000_000_000;

/// Bit positions within [`State::flags`].
pub mod flags {
    /// Echo the passcode prompt (and typed passcode) on the terminal.
    pub const SHOW: u32 = 1;
    /// State counter was last advanced by an explicit skip, not by use.
    pub const SKIP: u32 = 2;
    /// Legacy alphabet-selection bit; superseded by the numeric alphabet
    /// id. Recognized only so legacy state lines still parse.
    pub const ALPHABET_EXTENDED: u32 = 4;
    /// The high 64 bits of the counter are a per-user salt offset.
    pub const SALTED: u32 = 8;
    /// The state has been administratively disabled.
    pub const DISABLED: u32 = 16;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("label exceeds {LABEL_MAX_LEN} characters")]
    LabelTooLong,
    #[error("contact exceeds {CONTACT_MAX_LEN} characters")]
    ContactTooLong,
    #[error("field contains a delimiter or control character")]
    InvalidFieldContent,
}

/// Validates a free-text field (label/contact) against the persisted
/// format's restrictions: no field delimiter, no newline, no control
/// characters.
pub fn validate_field_str(s: &str) -> Result<(), StateError> {
    if s.bytes().any(|b| b == b':' || b == b'\n' || b < 0x20) {
        return Err(StateError::InvalidFieldContent);
    }
    Ok(())
}

/// Cached card geometry, recomputed by `ppp::calculate` whenever the
/// counter or code length changes. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardGeometry {
    pub codes_in_row: u32,
    pub codes_on_card: u32,
    pub current_card: u128,
    pub current_row: u32,
    pub current_column: u8,
    pub max_card: u128,
    pub max_code: u128,
}

/// A user's full OTP state, as loaded from or about to be written to the
/// store.
#[derive(Clone, Debug)]
pub struct State {
    pub username: String,
    pub version: u32,
    pub key: SequenceKey,
    pub counter: Counter,
    pub latest_card: u128,
    pub failures: u64,
    pub recent_failures: u64,
    pub channel_time: u64,
    pub code_length: u32,
    pub alphabet_id: u8,
    pub flags: u32,
    pub spass: Option<[u8; SPASS_HASH_LEN]>,
    pub spass_time: u64,
    pub label: String,
    pub contact: String,
    pub geometry: CardGeometry,
}

impl State {
    /// A fresh state for `username` with a newly generated key and
    /// counter zero. Callers still need to pick code length/alphabet and
    /// run it through `ppp::calculate` before first use.
    pub fn new(username: impl Into<String>, key: SequenceKey) -> Self {
        State {
            username: username.into(),
            version: STATE_VERSION,
            key,
            counter: Counter::ZERO,
            latest_card: 0,
            failures: 0,
            recent_failures: 0,
            channel_time: 0,
            code_length: 4,
            alphabet_id: 1,
            flags: 0,
            spass: None,
            spass_time: 0,
            label: String::new(),
            contact: String::new(),
            geometry: CardGeometry::default(),
        }
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    pub fn set_flag(&mut self, bit: u32) {
        self.flags |= bit;
    }

    pub fn clear_flag(&mut self, bit: u32) {
        self.flags &= !bit;
    }

    pub fn is_salted(&self) -> bool {
        self.has_flag(flags::SALTED)
    }

    pub fn is_disabled(&self) -> bool {
        self.has_flag(flags::DISABLED)
    }

    pub fn set_label(&mut self, label: &str) -> Result<(), StateError> {
        if label.len() > LABEL_MAX_LEN {
            return Err(StateError::LabelTooLong);
        }
        validate_field_str(label)?;
        self.label = label.to_string();
        Ok(())
    }

    pub fn set_contact(&mut self, contact: &str) -> Result<(), StateError> {
        if contact.len() > CONTACT_MAX_LEN {
            return Err(StateError::ContactTooLong);
        }
        validate_field_str(contact)?;
        self.contact = contact.to_string();
        Ok(())
    }

    pub fn bump_failure(&mut self) {
        self.failures = self.failures.saturating_add(1).min(MAX_FAILURE_COUNT);
        self.recent_failures = self
            .recent_failures
            .saturating_add(1)
            .min(MAX_FAILURE_COUNT);
    }

    pub fn clear_recent_failures(&mut self) {
        self.recent_failures = 0;
    }
}
