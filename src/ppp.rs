//! The derivation/geometry/authentication engine: turns a (key, counter)
//! pair into a passcode, maps counters to card/row/column positions, and
//! checks a supplied passcode against the expected one.

use crate::alphabet::{AlphabetId, MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use crate::counter::Counter;
use crate::crypto::{aes256_encrypt_block, constant_time_eq};
use crate::key::SequenceKey;
use crate::policy::Policy;
use crate::state::{flags, CardGeometry, State};
use crate::{OtpError, PolicyDenial, Result};

/// High 64 bits of a salted counter select the per-user offset; low 64
/// bits select card/row/column.
pub const SALT_MASK: u128 = 0xFFFF_FFFF_FFFF_FFFF_0000_0000_0000_0000;
pub const CODE_MASK: u128 = 0x0000_0000_0000_0000_FFFF_FFFF_FFFF_FFFF;

pub mod warnings {
    pub const LAST_CARD: u32 = 1;
    pub const NOTHING_LEFT: u32 = 2;
    pub const RECENT_FAILURES: u32 = 4;
}

/// Number of passcodes per row for a given passcode length, per the
/// fixed layout table every printed passcard follows.
pub fn codes_in_row_for_length(code_length: u32) -> Result<u32> {
    let rows = match code_length {
        2 => 11,
        3 => 8,
        4 => 7,
        5 | 6 => 5,
        7 => 4,
        8..=10 => 3,
        11..=16 => 2,
        _ => return Err(OtpError::InvalidLength),
    };
    Ok(rows)
}

/// Derives the passcode at counter `C` under key `K` using alphabet
/// `table`. Every intermediate buffer is zeroed before returning,
/// including on the error path, since they carry key-derived material.
pub fn derive(key: &SequenceKey, counter: Counter, table: &str, code_length: u32) -> Result<String> {
    if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code_length) {
        return Err(OtpError::InvalidLength);
    }
    let alphabet: Vec<char> = table.chars().collect();
    let n = alphabet.len() as u128;
    if n == 0 {
        return Err(OtpError::InvalidAlphabet);
    }

    let mut block = counter.to_le_bytes();
    let mut cipher_bytes = aes256_encrypt_block(key, block);
    block.fill(0);

    let mut x = Counter::from_le_bytes(cipher_bytes);
    cipher_bytes.fill(0);

    let mut passcode = String::with_capacity(code_length as usize);
    for _ in 0..code_length {
        let (quotient, remainder) = x.div_rem(n);
        passcode.push(alphabet[remainder as usize]);
        x = quotient;
    }
    Ok(passcode)
}

/// Applies the salt offset to a card-relative counter index.
pub fn add_salt(card_relative: u128, salt_source: u128, salted: bool) -> u128 {
    if salted {
        card_relative + (salt_source & SALT_MASK)
    } else {
        card_relative
    }
}

/// Strips the salt offset, returning the card-identifying low bits.
pub fn unsalt(counter: Counter, salted: bool) -> u128 {
    if salted {
        counter.value() & CODE_MASK
    } else {
        counter.value()
    }
}

/// Recomputes cached card geometry (current position, max card/code)
/// after a counter or code-length change. Mirrors the source's
/// `ppp_calculate`.
pub fn calculate(state: &mut State) -> Result<()> {
    let codes_in_row = codes_in_row_for_length(state.code_length)?;
    let codes_on_card = codes_in_row * 10;

    let salted = state.is_salted();
    let range_max: u128 = if salted { CODE_MASK } else { u128::MAX };
    // minus one card as a safety margin so max_code never rounds up to
    // a card whose last passcode would overflow the counter range.
    let max_card = range_max / codes_on_card as u128 - 1;
    let max_code = max_card * codes_on_card as u128;

    let u = unsalt(state.counter, salted);
    let r = u % codes_on_card as u128;
    let current_card = u / codes_on_card as u128 + 1;
    let current_column = b'A' + (r % codes_in_row as u128) as u8;
    let current_row = 1 + (r / codes_in_row as u128) as u32;

    state.geometry = CardGeometry {
        codes_in_row,
        codes_on_card,
        current_card,
        current_row,
        current_column,
        max_card,
        max_code,
    };
    Ok(())
}

/// Checks that a loaded state's counter still lies within the passcode
/// space for its key/alphabet/length combination.
pub fn verify_range(state: &State) -> Result<()> {
    let salted = state.is_salted();
    if unsalt(state.counter, salted) >= state.geometry.max_code {
        return Err(OtpError::Numspace);
    }
    Ok(())
}

/// Computes which [`warnings`] bits apply to the current state.
pub fn warning_conditions(state: &State) -> u32 {
    let mut bits = 0;
    if state.geometry.current_card == state.latest_card {
        bits |= warnings::LAST_CARD;
    }
    if state.geometry.current_card > state.latest_card {
        bits |= warnings::NOTHING_LEFT;
    }
    if state.recent_failures > 0 {
        bits |= warnings::RECENT_FAILURES;
    }
    bits
}

/// Computes the counter identifying a specific (card, row, column)
/// position.
pub fn passcode_at(state: &State, card: u128, row: u32, column: u8) -> Result<Counter> {
    let geometry = &state.geometry;
    if column < b'A' || column >= b'A' + geometry.codes_in_row as u8 {
        return Err(OtpError::ColumnRange);
    }
    if row < 1 || row > 10 {
        return Err(OtpError::RowRange);
    }
    let card_relative = (card - 1) * geometry.codes_on_card as u128
        + (row as u128 - 1) * geometry.codes_in_row as u128
        + (column - b'A') as u128;
    let salted = state.is_salted();
    Ok(Counter::new(add_salt(
        card_relative,
        state.counter.value(),
        salted,
    )))
}

/// Checks `candidate` against the passcode expected at the state's
/// current counter, in constant time. Does not mutate `state`; callers
/// combine this with [`session`](crate::session) to advance the counter
/// on success.
pub fn authenticate(state: &State, policy: &Policy, candidate: &str) -> Result<bool> {
    if state.is_disabled() {
        return Err(OtpError::Policy(PolicyDenial::StateDisabled));
    }
    let alphabet_id = AlphabetId::from_u8(state.alphabet_id).map_err(|_| OtpError::InvalidAlphabet)?;
    let table = alphabet_id
        .resolve(policy.custom_alphabet.as_deref())
        .map_err(|_| OtpError::InvalidAlphabet)?;
    let expected = derive(&state.key, state.counter, table, state.code_length)?;
    Ok(constant_time_eq(expected.as_bytes(), candidate.as_bytes()))
}

/// Formats the terminal prompt for the current position, e.g.
/// `"Passcode  5E [12]: "`.
pub fn prompt_string(state: &State) -> String {
    format!(
        "Passcode {:2}{} [{}]: ",
        state.geometry.current_row,
        state.geometry.current_column as char,
        state.geometry.current_card
    )
}

/// Advances the counter to an arbitrary later position, gated by
/// policy. Rejects moving backwards.
pub fn skip(state: &mut State, policy: &Policy, new_counter: Counter) -> Result<()> {
    policy.check_skipping().map_err(OtpError::Policy)?;
    if new_counter < state.counter {
        return Err(OtpError::InvalidLength);
    }
    state.counter = new_counter;
    state.set_flag(flags::SKIP);
    calculate(state)?;
    verify_range(state)
}

/// Records that the user has printed (or otherwise obtained) card `n`,
/// gated by policy.
pub fn update_latest_card(state: &mut State, policy: &Policy, n: u128) -> Result<()> {
    policy.check_passcode_print().map_err(OtpError::Policy)?;
    state.latest_card = state.latest_card.max(n);
    Ok(())
}
