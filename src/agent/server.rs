//! Server side: the privileged agent's request dispatch loop. Owns at
//! most one loaded [`Session`] at a time and enforces that invariant
//! the same way the protocol's state machine requires.

use std::io::{Read, Write};

use crate::agent::{decode_frame, encode_frame, Frame, Opcode};
use crate::alphabet::AlphabetId;
use crate::counter::Counter;
use crate::policy::Policy;
use crate::ppp;
use crate::session::Session;
use crate::store::StateStore;
use crate::{OtpError, Result};

/// Runs the server loop against `io_in`/`io_out` (in production, the
/// agent's inherited stdin/stdout) until the peer disconnects or a
/// protocol-level error occurs. `store`/`policy` are the already
/// privilege-checked backend and configuration this agent process
/// serves with.
pub fn run<S, R, W>(store: &S, policy: &Policy, io_in: &mut R, io_out: &mut W) -> Result<()>
where
    S: StateStore,
    R: Read,
    W: Write,
{
    let init_status = match store.check_permissions() {
        Ok(()) => 0,
        Err(OtpError::NonExistent) => 0, // brand-new install: no state yet is fine
        Err(_) => OtpError::InitConfiguration.status_code(),
    };
    encode_frame(io_out, &Frame::response(Opcode::Init, init_status))?;
    if init_status != 0 {
        return Ok(());
    }

    let mut session = Session::new(store, policy);
    let mut username: Option<String> = None;

    loop {
        let request = match decode_frame(io_in) {
            Ok(f) => f,
            Err(OtpError::Disconnect) => return Ok(()),
            Err(e) => return Err(e),
        };
        let opcode = match Opcode::from_u16(request.opcode) {
            Ok(op) => op,
            Err(_) => {
                encode_frame(
                    io_out,
                    &Frame::response(Opcode::Init, OtpError::Protocol(String::new()).status_code()),
                )?;
                continue;
            }
        };

        let response = dispatch(opcode, &request, store, policy, &mut session, &mut username);
        let reply = match response {
            Ok(frame) => frame,
            Err(e) => Frame::response(opcode, e.status_code()),
        };
        encode_frame(io_out, &reply)?;
    }
}

fn dispatch<S: StateStore>(
    opcode: Opcode,
    request: &Frame,
    store: &S,
    policy: &Policy,
    session: &mut Session<'_, S>,
    username: &mut Option<String>,
) -> Result<Frame> {
    match opcode {
        Opcode::UserSet => {
            *username = Some(request.str_arg_as_str()?.to_string());
            Ok(Frame::response(opcode, 0))
        }
        Opcode::StateNew => {
            if session.state().is_some() {
                return Err(OtpError::MustDropState);
            }
            let user = username.clone().ok_or(OtpError::NoSuchUser)?;
            session.generate_key(&user, false, false)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::StateLoad => {
            let user = username.clone().ok_or(OtpError::NoSuchUser)?;
            session.load(&user)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::StateStore => {
            session.release(true, false)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::StateDrop => {
            session.release(false, true)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::KeyGenerate => {
            let salted = request.int_arg != 0;
            let show = request.int_arg2 != 0;
            if session.state().is_some() {
                session.regenerate_key(salted, show)?;
            } else {
                let user = username.clone().ok_or(OtpError::NoSuchUser)?;
                session.generate_key(&user, salted, show)?;
            }
            Ok(Frame::response(opcode, 0))
        }
        Opcode::KeyRemove => {
            let user = username.clone().ok_or(OtpError::NoSuchUser)?;
            session.remove_key(&user)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::FlagAdd => {
            let bit = request.int_arg as u32;
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            state.set_flag(bit);
            Ok(Frame::response(opcode, 0))
        }
        Opcode::FlagClear => {
            let bit = request.int_arg as u32;
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            state.clear_flag(bit);
            Ok(Frame::response(opcode, 0))
        }
        Opcode::FlagGet => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let mut resp = Frame::response(opcode, 0);
            resp.int_arg = state.flags as i64;
            Ok(resp)
        }
        Opcode::GetNum => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let mut resp = Frame::response(opcode, 0);
            resp.num_arg = state.counter.to_be_bytes();
            Ok(resp)
        }
        Opcode::GetInt => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let mut resp = Frame::response(opcode, 0);
            resp.int_arg = match request.int_arg {
                0 => state.failures as i64,
                1 => state.recent_failures as i64,
                2 => state.code_length as i64,
                3 => state.latest_card as i64,
                _ => return Err(OtpError::Protocol("unknown GET_INT selector".into())),
            };
            Ok(resp)
        }
        Opcode::GetStr => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let text = match request.int_arg {
                0 => state.label.clone(),
                1 => state.contact.clone(),
                _ => return Err(OtpError::Protocol("unknown GET_STR selector".into())),
            };
            Frame::response(opcode, 0).with_str_arg(&text)
        }
        Opcode::GetAlphabet => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let mut resp = Frame::response(opcode, 0);
            resp.int_arg = state.alphabet_id as i64;
            Ok(resp)
        }
        Opcode::SetInt => {
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            match request.int_arg {
                2 => {
                    policy.check_code_length(request.int_arg2 as u32).map_err(OtpError::Policy)?;
                    state.code_length = request.int_arg2 as u32;
                }
                4 => {
                    let id = AlphabetId::from_u8(request.int_arg2 as u8)
                        .map_err(|_| OtpError::InvalidAlphabet)?;
                    policy.check_alphabet(id).map_err(OtpError::Policy)?;
                    state.alphabet_id = id.to_u8();
                }
                _ => return Err(OtpError::Protocol("unknown SET_INT selector".into())),
            }
            ppp::calculate(state)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::SetStr => {
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            let text = request.str_arg_as_str()?;
            match request.int_arg {
                0 => {
                    policy.check_label_change().map_err(OtpError::Policy)?;
                    state.set_label(text).map_err(|_| OtpError::InvalidLength)?;
                }
                1 => {
                    policy
                        .check_contact_change()
                        .map_err(OtpError::Policy)?;
                    state.set_contact(text).map_err(|_| OtpError::InvalidLength)?;
                }
                _ => return Err(OtpError::Protocol("unknown SET_STR selector".into())),
            }
            Ok(Frame::response(opcode, 0))
        }
        Opcode::SetSpass => {
            policy.check_spass_change().map_err(OtpError::Policy)?;
            let candidate = request.str_arg_as_str()?;
            let violations = policy.validate_spass(candidate);
            if violations != 0 {
                let mut resp = Frame::response(opcode, OtpError::InvalidLength.status_code());
                resp.int_arg = violations as i64;
                return Ok(resp);
            }
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            let hash = crate::crypto::sha256(candidate.as_bytes());
            let mut spass = [0u8; crate::state::SPASS_HASH_LEN];
            spass[..32].copy_from_slice(&hash);
            state.spass = Some(spass);
            Ok(Frame::response(opcode, 0))
        }
        Opcode::GetWarnings => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let mut resp = Frame::response(opcode, 0);
            resp.int_arg = ppp::warning_conditions(state) as i64;
            Ok(resp)
        }
        Opcode::GetPasscode => {
            let state = session.state().ok_or(OtpError::NoState)?;
            let id = AlphabetId::from_u8(state.alphabet_id).map_err(|_| OtpError::InvalidAlphabet)?;
            let table = id
                .resolve(policy.custom_alphabet.as_deref())
                .map_err(|_| OtpError::InvalidAlphabet)?;
            policy.check_passcode_print().map_err(OtpError::Policy)?;
            let passcode = ppp::derive(&state.key, state.counter, table, state.code_length)?;
            Frame::response(opcode, 0).with_str_arg(&passcode)
        }
        Opcode::GetPrompt => {
            let state = session.state().ok_or(OtpError::NoState)?;
            Frame::response(opcode, 0).with_str_arg(&ppp::prompt_string(state))
        }
        Opcode::Authenticate => {
            let candidate = request.str_arg_as_str()?;
            let ok = {
                let state = session.state().ok_or(OtpError::NoState)?;
                ppp::authenticate(state, policy, candidate)?
            };
            if ok {
                session.state_mut().unwrap().clear_recent_failures();
                session.increment()?;
                Ok(Frame::response(opcode, 0))
            } else {
                session.state_mut().unwrap().bump_failure();
                Err(OtpError::Mismatch)
            }
        }
        Opcode::Skip => {
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            let new_counter = Counter::from_be_bytes(request.num_arg);
            ppp::skip(state, policy, new_counter)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::UpdateLatest => {
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            ppp::update_latest_card(state, policy, request.int_arg as u128)?;
            Ok(Frame::response(opcode, 0))
        }
        Opcode::ClearRecentFailures => {
            let state = session.state_mut().ok_or(OtpError::NoState)?;
            state.clear_recent_failures();
            Ok(Frame::response(opcode, 0))
        }
        Opcode::Init => Err(OtpError::Protocol("INIT may only be sent by the agent".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::user_file::UserFileStore;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn roundtrip(store: &UserFileStore, policy: &Policy, requests: Vec<Frame>) -> Vec<Frame> {
        let mut input = Vec::new();
        for req in &requests {
            encode_frame(&mut input, req).unwrap();
        }
        let mut in_cursor = Cursor::new(input);
        let mut out = Vec::new();
        let _ = run(store, policy, &mut in_cursor, &mut out);
        let mut out_cursor = Cursor::new(out);
        let mut frames = Vec::new();
        while let Ok(f) = decode_frame(&mut out_cursor) {
            frames.push(f);
        }
        frames
    }

    #[test]
    fn full_session_generates_and_authenticates() {
        let dir = tempdir().unwrap();
        let store = UserFileStore::new(dir.path());
        let policy = Policy::default();

        let mut user_set = Frame::request(Opcode::UserSet);
        user_set.str_arg = b"alice".to_vec();

        let requests = vec![
            user_set,
            Frame::request(Opcode::StateNew),
            Frame::request(Opcode::GetPasscode),
        ];
        let frames = roundtrip(&store, &policy, requests);
        // INIT + 3 responses
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].opcode, Opcode::Init as u16);
        assert_eq!(frames[0].status, 0);
        assert_eq!(frames[3].status, 0);
    }
}
