//! Orchestration of the "lock -> load -> mutate -> verify -> store ->
//! unlock" sequences used by authentication, counter advancement, and
//! key (re)generation. A [`Session`] borrows a [`StateStore`] and a
//! [`Policy`], and owns at most one loaded [`State`] plus the lock that
//! protects it.

use crate::counter::Counter;
use crate::crypto::generate_sequence_key;
use crate::policy::Policy;
use crate::ppp;
use crate::state::{flags, State};
use crate::store::{lock::StateLock, StateStore};
use crate::{OtpError, Result};

pub struct Session<'s, S: StateStore> {
    store: &'s S,
    policy: &'s Policy,
    state: Option<State>,
    lock: Option<StateLock>,
}

impl<'s, S: StateStore> Session<'s, S> {
    pub fn new(store: &'s S, policy: &'s Policy) -> Self {
        Session {
            store,
            policy,
            state: None,
            lock: None,
        }
    }

    pub fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut State> {
        self.state.as_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// `permissions -> lock -> load -> calculate -> verify_range`. On
    /// any failure after the lock is acquired, the lock is released
    /// before the error is returned.
    pub fn load(&mut self, username: &str) -> Result<()> {
        self.store.check_permissions()?;
        let held_lock = self.store.lock()?;
        let loaded = match self.store.load(username) {
            Ok(mut s) => {
                if let Err(e) = ppp::calculate(&mut s).and_then(|_| ppp::verify_range(&s)) {
                    let _ = held_lock.release();
                    return Err(e);
                }
                s
            }
            Err(e) => {
                let _ = held_lock.release();
                return Err(e);
            }
        };
        self.state = Some(loaded);
        self.lock = Some(held_lock);
        Ok(())
    }

    /// Conditionally stores the current state and conditionally
    /// releases the lock. Both can fail independently; the first error
    /// encountered is returned, but both steps are still attempted.
    pub fn release(&mut self, do_store: bool, do_unlock: bool) -> Result<()> {
        let mut first_err = None;
        if do_store {
            if let Some(state) = &self.state {
                if let Err(e) = self.store.store(state) {
                    first_err = Some(e);
                }
            }
        }
        if do_unlock {
            if let Some(held_lock) = self.lock.take() {
                if let Err(e) = held_lock.release() {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Advances the counter by one, persists and unlocks, then resets
    /// the caller's in-memory view back to the pre-increment counter --
    /// intentional, not an oversight: the caller just authenticated
    /// against the pre-increment passcode and should keep seeing it.
    pub fn increment(&mut self) -> Result<()> {
        let pre = {
            let state = self.state.as_mut().ok_or(OtpError::NoState)?;
            let pre = state.counter;
            state.counter = state
                .counter
                .checked_add(1)
                .map_err(|_| OtpError::Numspace)?;
            ppp::calculate(state)?;
            ppp::verify_range(state)?;
            pre
        };
        self.release(true, true)?;
        if let Some(state) = self.state.as_mut() {
            state.counter = pre;
            ppp::calculate(state)?;
        }
        Ok(())
    }

    /// Rolls back a prior [`Session::increment`] on this user's state,
    /// used when a caller increments optimistically but a later step
    /// fails. Opens a *second*, freshly loaded copy of the on-disk state
    /// (not the session's own cached copy) and requires its counter to
    /// equal the caller's counter + 1 exactly; any other value means
    /// someone else has moved the counter in the meantime, and the
    /// rollback is refused rather than risk clobbering their advance.
    pub fn decrement(&mut self, username: &str) -> Result<()> {
        let caller_counter = self.state.as_ref().ok_or(OtpError::NoState)?.counter;

        self.store.check_permissions()?;
        let held_lock = self.store.lock()?;
        let mut fresh = match self.store.load(username) {
            Ok(s) => s,
            Err(e) => {
                let _ = held_lock.release();
                return Err(e);
            }
        };

        let expected = match caller_counter.checked_add(1) {
            Ok(c) => c,
            Err(_) => {
                let _ = held_lock.release();
                return Err(OtpError::Numspace);
            }
        };
        if fresh.counter != expected {
            let _ = held_lock.release();
            return Err(OtpError::ConcurrentModification);
        }

        fresh.counter = match fresh.counter.checked_sub(1) {
            Ok(c) => c,
            Err(_) => {
                let _ = held_lock.release();
                return Err(OtpError::Numspace);
            }
        };
        if let Err(e) = self.store.store(&fresh) {
            let _ = held_lock.release();
            return Err(e);
        }
        held_lock.release()
    }

    /// Creates a brand-new state for `username` with a freshly generated
    /// key and counter zero, gated by the `key_generation` policy. The
    /// new state becomes the session's loaded state but is not yet
    /// persisted; call [`Session::release`] to write it.
    pub fn generate_key(&mut self, username: &str, salted: bool, show: bool) -> Result<()> {
        self.policy.check_key_generation().map_err(OtpError::Policy)?;
        let key = generate_sequence_key();
        let mut state = State::new(username, key);
        if self.policy.resolve_salt(salted).map_err(OtpError::Policy)? {
            state.set_flag(flags::SALTED);
        }
        if self.policy.resolve_show(show).map_err(OtpError::Policy)? {
            state.set_flag(flags::SHOW);
        }
        state.code_length = self.policy.passcode_def_length;
        state.alphabet_id = self.policy.alphabet_def.to_u8();
        ppp::calculate(&mut state)?;
        self.state = Some(state);
        Ok(())
    }

    /// Replaces the currently loaded state's key with a fresh one,
    /// resetting the counter, gated by the `key_regeneration` policy.
    pub fn regenerate_key(&mut self, salted: bool, show: bool) -> Result<()> {
        self.policy
            .check_key_regeneration()
            .map_err(OtpError::Policy)?;
        let state = self.state.as_mut().ok_or(OtpError::NoState)?;
        state.key = generate_sequence_key();
        state.counter = Counter::ZERO;
        state.latest_card = 0;
        state.failures = 0;
        state.recent_failures = 0;
        state.clear_flag(flags::SALTED);
        state.clear_flag(flags::SHOW);
        if self.policy.resolve_salt(salted).map_err(OtpError::Policy)? {
            state.set_flag(flags::SALTED);
        }
        if self.policy.resolve_show(show).map_err(OtpError::Policy)? {
            state.set_flag(flags::SHOW);
        }
        ppp::calculate(state)?;
        Ok(())
    }

    /// Removes the currently loaded state from the store entirely,
    /// gated by the `key_removal` policy.
    pub fn remove_key(&mut self, username: &str) -> Result<()> {
        self.policy.check_key_removal().map_err(OtpError::Policy)?;
        self.store.remove(username)?;
        self.state = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::user_file::UserFileStore;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Policy) {
        (tempdir().unwrap(), Policy::default())
    }

    #[test]
    fn generate_then_release_then_load_round_trips() {
        let (dir, policy) = setup();
        let store = UserFileStore::new(dir.path());
        let mut session = Session::new(&store, &policy);
        session.generate_key("alice", false, false).unwrap();
        assert_eq!(session.state().unwrap().counter, Counter::ZERO);
        session.release(true, false).unwrap();

        let mut other = Session::new(&store, &policy);
        other.load("alice").unwrap();
        assert_eq!(other.state().unwrap().username, "alice");
        other.release(false, true).unwrap();
    }

    #[test]
    fn increment_persists_advance_but_restores_callers_view() {
        let (dir, policy) = setup();
        let store = UserFileStore::new(dir.path());
        let mut session = Session::new(&store, &policy);
        session.generate_key("bob", false, false).unwrap();
        session.release(true, false).unwrap();

        let mut session = Session::new(&store, &policy);
        session.load("bob").unwrap();
        assert_eq!(session.state().unwrap().counter, Counter::ZERO);
        session.increment().unwrap();
        assert_eq!(session.state().unwrap().counter, Counter::ZERO);
        assert!(!session.is_locked());

        let mut reloaded = Session::new(&store, &policy);
        reloaded.load("bob").unwrap();
        assert_eq!(reloaded.state().unwrap().counter, Counter::new(1));
        reloaded.release(false, true).unwrap();
    }

    #[test]
    fn decrement_rolls_back_a_matching_increment() {
        let (dir, policy) = setup();
        let store = UserFileStore::new(dir.path());
        let mut session = Session::new(&store, &policy);
        session.generate_key("carol", false, false).unwrap();
        session.release(true, false).unwrap();

        let mut session = Session::new(&store, &policy);
        session.load("carol").unwrap();
        session.increment().unwrap();
        session.decrement("carol").unwrap();

        let mut reloaded = Session::new(&store, &policy);
        reloaded.load("carol").unwrap();
        assert_eq!(reloaded.state().unwrap().counter, Counter::ZERO);
        reloaded.release(false, true).unwrap();
    }

    #[test]
    fn decrement_refuses_when_counter_moved_unexpectedly() {
        let (dir, policy) = setup();
        let store = UserFileStore::new(dir.path());
        let mut session = Session::new(&store, &policy);
        session.generate_key("dave", false, false).unwrap();
        session.release(true, false).unwrap();

        let mut session = Session::new(&store, &policy);
        session.load("dave").unwrap();
        // no increment happened on disk; caller's counter + 1 won't match.
        assert!(matches!(
            session.decrement("dave"),
            Err(OtpError::ConcurrentModification)
        ));
    }

    #[test]
    fn remove_key_deletes_the_entry() {
        let (dir, policy) = setup();
        let store = UserFileStore::new(dir.path());
        let mut session = Session::new(&store, &policy);
        session.generate_key("erin", false, false).unwrap();
        session.release(true, false).unwrap();

        let mut session = Session::new(&store, &policy);
        session.load("erin").unwrap();
        session.remove_key("erin").unwrap();
        session.release(false, true).unwrap();

        let mut reloaded = Session::new(&store, &policy);
        assert!(matches!(
            reloaded.load("erin"),
            Err(OtpError::NonExistent) | Err(OtpError::NoUserEntry)
        ));
    }
}
