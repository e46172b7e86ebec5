//! The on-disk line format for one state entry: fifteen `:`-delimited
//! fields, one entry per line, no quoting. Field order and encoding
//! follow the layout the original state file format used.

use crate::counter::Counter;
use crate::key::SequenceKey;
use crate::state::{validate_field_str, State, STATE_VERSION};
use crate::{OtpError, Result};

pub const FIELD_COUNT: usize = 15;
pub const MAX_FIELD_LEN: usize = 100;
pub const MAX_LINE_LEN: usize = 1000;
const DELIM: char = ':';

/// Serializes a [`State`] into one `:`-delimited line (no trailing
/// newline). Fails if `state.username` contains a delimiter or control
/// character, since that would desynchronize the fixed field split on
/// the next load -- the same check `set_label`/`set_contact` already
/// run against `label`/`contact`.
pub fn format_entry(state: &State) -> Result<String> {
    validate_field_str(&state.username)
        .map_err(|_| OtpError::ParseError("username contains a delimiter or control character".into()))?;
    let spass_field = match &state.spass {
        Some(bytes) => hex::encode(bytes),
        None => String::new(),
    };
    Ok(format!(
        "{user}:{version}:{key}:{counter}:{latest_card:x}:{failures}:{recent_failures}:{channel_time}:{code_length}:{alphabet}:{flags:x}:{spass}:{spass_time}:{label}:{contact}",
        user = state.username,
        version = state.version,
        key = state.key.to_hex_upper(),
        counter = state.counter.to_hex_lower(),
        latest_card = state.latest_card,
        failures = state.failures,
        recent_failures = state.recent_failures,
        channel_time = state.channel_time,
        code_length = state.code_length,
        alphabet = state.alphabet_id,
        flags = state.flags,
        spass = spass_field,
        spass_time = state.spass_time,
        label = state.label,
        contact = state.contact,
    ))
}

/// Parses one `:`-delimited line into a [`State`]. Rejects anything
/// that doesn't have exactly [`FIELD_COUNT`] fields, an unrecognized
/// version, or a field exceeding [`MAX_FIELD_LEN`].
pub fn parse_entry(line: &str) -> Result<State> {
    if line.len() > MAX_LINE_LEN {
        return Err(OtpError::ParseError("line too long".into()));
    }
    let fields: Vec<&str> = line.split(DELIM).collect();
    if fields.len() != FIELD_COUNT {
        return Err(OtpError::ParseError(format!(
            "expected {FIELD_COUNT} fields, found {}",
            fields.len()
        )));
    }
    for f in &fields {
        if f.len() > MAX_FIELD_LEN {
            return Err(OtpError::ParseError("field too long".into()));
        }
    }

    let username = fields[0].to_string();
    let version: u32 = fields[1]
        .parse()
        .map_err(|_| OtpError::ParseError("bad version".into()))?;
    if version != STATE_VERSION {
        return Err(OtpError::ParseError(format!(
            "unsupported state version {version}"
        )));
    }
    let key = SequenceKey::from_hex_str(fields[2])
        .map_err(|_| OtpError::ParseError("bad key hex".into()))?;
    let counter =
        Counter::from_hex_str(fields[3]).map_err(|_| OtpError::ParseError("bad counter hex".into()))?;
    let latest_card = u128::from_str_radix(fields[4], 16)
        .map_err(|_| OtpError::ParseError("bad latest_card hex".into()))?;
    let failures: u64 = fields[5]
        .parse()
        .map_err(|_| OtpError::ParseError("bad failures".into()))?;
    let recent_failures: u64 = fields[6]
        .parse()
        .map_err(|_| OtpError::ParseError("bad recent_failures".into()))?;
    let channel_time: u64 = fields[7]
        .parse()
        .map_err(|_| OtpError::ParseError("bad channel_time".into()))?;
    let code_length: u32 = fields[8]
        .parse()
        .map_err(|_| OtpError::ParseError("bad code_length".into()))?;
    let alphabet_id: u8 = fields[9]
        .parse()
        .map_err(|_| OtpError::ParseError("bad alphabet id".into()))?;
    let flags = u32::from_str_radix(fields[10], 16)
        .map_err(|_| OtpError::ParseError("bad flags hex".into()))?;
    let spass = if fields[11].is_empty() {
        None
    } else {
        let bytes = hex::decode(fields[11]).map_err(|_| OtpError::ParseError("bad spass hex".into()))?;
        let arr: [u8; crate::state::SPASS_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| OtpError::ParseError("bad spass length".into()))?;
        Some(arr)
    };
    let spass_time: u64 = fields[12]
        .parse()
        .map_err(|_| OtpError::ParseError("bad spass_time".into()))?;
    let label = fields[13].to_string();
    let contact = fields[14].to_string();
    validate_field_str(&label).map_err(|_| OtpError::ParseError("bad label".into()))?;
    validate_field_str(&contact).map_err(|_| OtpError::ParseError("bad contact".into()))?;

    let mut state = State::new(username, key);
    state.version = version;
    state.counter = counter;
    state.latest_card = latest_card;
    state.failures = failures;
    state.recent_failures = recent_failures;
    state.channel_time = channel_time;
    state.code_length = code_length;
    state.alphabet_id = alphabet_id;
    state.flags = flags;
    state.spass = spass;
    state.spass_time = spass_time;
    state.label = label;
    state.contact = contact;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::flags as state_flags;

    fn sample_state() -> State {
        let mut s = State::new("alice", SequenceKey::from_bytes([0xAB; 32]));
        s.counter = Counter::new(42);
        s.latest_card = 3;
        s.failures = 1;
        s.recent_failures = 0;
        s.channel_time = 1_700_000_000;
        s.code_length = 4;
        s.alphabet_id = 1;
        s.set_flag(state_flags::SALTED);
        s.label = "work laptop".into();
        s.contact = "alice@example.com".into();
        s
    }

    #[test]
    fn round_trips_through_format_and_parse() {
        let original = sample_state();
        let line = format_entry(&original).unwrap();
        let parsed = parse_entry(&line).unwrap();
        assert_eq!(parsed.username, original.username);
        assert_eq!(parsed.counter, original.counter);
        assert_eq!(parsed.latest_card, original.latest_card);
        assert_eq!(parsed.flags, original.flags);
        assert_eq!(parsed.label, original.label);
        assert_eq!(parsed.contact, original.contact);
        assert_eq!(parsed.key, original.key);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = parse_entry("alice:1:only:four:fields").unwrap_err();
        assert!(matches!(err, OtpError::ParseError(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut original = sample_state();
        original.version = 2;
        let line = format_entry(&original).unwrap();
        assert!(matches!(parse_entry(&line), Err(OtpError::ParseError(_))));
    }

    #[test]
    fn spass_field_round_trips_when_set() {
        let mut s = sample_state();
        s.spass = Some([0x11; crate::state::SPASS_HASH_LEN]);
        let line = format_entry(&s).unwrap();
        let parsed = parse_entry(&line).unwrap();
        assert_eq!(parsed.spass, s.spass);
    }

    #[test]
    fn rejects_username_containing_the_field_delimiter() {
        let mut s = sample_state();
        s.username = "ali:ce".into();
        assert!(matches!(format_entry(&s), Err(OtpError::ParseError(_))));
    }
}
