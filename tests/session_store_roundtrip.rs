//! End-to-end exercises of the state store and session façade against a
//! scratch directory, as a separate process would see them: generate,
//! persist, reload in a fresh `Session`, authenticate, and recover from
//! a simulated crash between increment and the caller's next read.

use ppp_otp::alphabet::ALPHABET_SIMPLE;
use ppp_otp::policy::{Policy, TriState};
use ppp_otp::ppp;
use ppp_otp::session::Session;
use ppp_otp::store::system_file::SystemFileStore;
use ppp_otp::store::user_file::UserFileStore;
use ppp_otp::store::StateStore;
use ppp_otp::OtpError;

#[test]
fn generated_key_survives_a_round_trip_through_separate_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let store = UserFileStore::new(dir.path());
    let policy = Policy::default();

    let mut writer = Session::new(&store, &policy);
    writer.generate_key("alice", false, false).unwrap();
    let key_bytes = *writer.state().unwrap().key.as_bytes();
    writer.release(true, false).unwrap();

    let mut reader = Session::new(&store, &policy);
    reader.load("alice").unwrap();
    assert_eq!(*reader.state().unwrap().key.as_bytes(), key_bytes);
    reader.release(false, true).unwrap();
}

#[test]
fn authenticate_then_increment_advances_the_persisted_counter() {
    let dir = tempfile::tempdir().unwrap();
    let store = UserFileStore::new(dir.path());
    let policy = Policy::default();

    let mut session = Session::new(&store, &policy);
    session.generate_key("bob", false, false).unwrap();
    session.release(true, false).unwrap();

    for expected_counter in 0u128..3 {
        let mut session = Session::new(&store, &policy);
        session.load("bob").unwrap();
        assert_eq!(
            session.state().unwrap().counter.value(),
            expected_counter
        );
        let passcode = {
            let state = session.state().unwrap();
            ppp::derive(&state.key, state.counter, ALPHABET_SIMPLE, state.code_length).unwrap()
        };
        assert!(ppp::authenticate(session.state().unwrap(), &policy, &passcode).unwrap());
        session.increment().unwrap();
        session.release(false, true).unwrap();
    }

    let mut final_check = Session::new(&store, &policy);
    final_check.load("bob").unwrap();
    assert_eq!(final_check.state().unwrap().counter.value(), 3);
}

#[test]
fn wrong_passcode_is_rejected_and_counter_does_not_move() {
    let dir = tempfile::tempdir().unwrap();
    let store = UserFileStore::new(dir.path());
    let policy = Policy::default();

    let mut session = Session::new(&store, &policy);
    session.generate_key("carol", false, false).unwrap();
    session.release(true, false).unwrap();

    let mut session = Session::new(&store, &policy);
    session.load("carol").unwrap();
    assert!(!ppp::authenticate(session.state().unwrap(), &policy, "wrong").unwrap());
    session.release(false, true).unwrap();

    let mut reloaded = Session::new(&store, &policy);
    reloaded.load("carol").unwrap();
    assert_eq!(reloaded.state().unwrap().counter.value(), 0);
}

#[test]
fn enforced_salt_policy_is_applied_regardless_of_the_caller_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = UserFileStore::new(dir.path());
    let mut policy = Policy::default();
    policy.salt = TriState::Enforce;

    let mut session = Session::new(&store, &policy);
    session.generate_key("dave", false, false).unwrap();
    assert!(session.state().unwrap().is_salted());
}

#[test]
fn system_store_rejects_a_world_writable_directory() {
    let dir = tempfile::tempdir().unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o777)).unwrap();
    }
    let db_path = dir.path().join("otshadow");
    let store = SystemFileStore::new(&db_path, 0);

    #[cfg(unix)]
    assert!(matches!(store.check_permissions(), Err(OtpError::ParseError(_))));
    #[cfg(not(unix))]
    let _ = store;
}
