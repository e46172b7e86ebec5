use ppp_otp::alphabet::ALPHABET_SIMPLE;
use ppp_otp::policy::Policy;
use ppp_otp::ppp;
use ppp_otp::session::Session;
use ppp_otp::store::user_file::UserFileStore;
use std::time::{Duration, Instant};

fn main() {
    let home = std::env::temp_dir().join("ppp-otp-demo-carol");
    std::fs::create_dir_all(&home).unwrap();

    let store = UserFileStore::new(&home);
    let policy = Policy::default();

    // new user: a key is generated and persisted, same as 01_signup
    let mut setup = Session::new(&store, &policy);
    setup.generate_key("carol", false, false).unwrap();
    setup.release(true, false).unwrap();

    let mut durations = Duration::default();
    #[cfg(debug_assertions)]
    const NLOOPS: u32 = 10;
    #[cfg(not(debug_assertions))]
    const NLOOPS: u32 = 100;

    for _ in 0..NLOOPS {
        let start = Instant::now();

        // authentication server loads the user's state
        let mut session = Session::new(&store, &policy);
        session.load("carol").unwrap();

        // user's client derives the expected passcode itself, standing in
        // for a human reading it off a printed passcard
        let expected = {
            let state = session.state().unwrap();
            ppp::derive(&state.key, state.counter, ALPHABET_SIMPLE, state.code_length).unwrap()
        };

        // server checks the user-supplied passcode and advances the counter
        let accepted = ppp::authenticate(session.state().unwrap(), &policy, &expected).unwrap();
        assert!(accepted, "passcode should have been accepted");
        session.increment().unwrap();
        session.release(false, true).unwrap();

        durations = durations.checked_add(start.elapsed()).unwrap();
    }

    println!("Time elapsed per authentication: {:?}", durations / NLOOPS);
}
