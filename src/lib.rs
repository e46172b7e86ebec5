/*!
Core one-time password engine for a PPP-style (Perfect Paper Passwords)
authentication system.

This crate derives a deterministic sequence of short, human-typeable
passcodes from a per-user secret key and a monotonic counter, arranges
them into printable "passcards", and persists the per-user state to a
file-backed store with safe concurrent access across processes.

# Usage
See [`session`] for the orchestration layer ("load, verify, store") most
callers want, and [`ppp`] for the lower-level derivation primitives.

# Layout
- [`counter`] / [`key`] -- fixed-width integer and secret-key containers.
- [`crypto`] -- AES-256 single-block encryption, SHA-256, randomness.
- [`alphabet`] -- the built-in and custom passcode alphabets.
- [`state`] -- the in-memory per-user state value.
- [`policy`] -- the configuration snapshot that gates every mutation.
- [`store`] -- the file-backed persistence layer (locking, atomic writes).
- [`ppp`] -- the derivation/geometry/authentication engine.
- [`session`] -- load/verify/store orchestration.
- [`agent`] -- the privileged-helper wire protocol.
- [`oob`] -- the out-of-band passcode delivery subprocess.

[RFC]: this crate does not implement a network protocol; see each
module's documentation for the data formats it owns.
*/
use derive_more::{Display, Error};

pub mod agent;
pub mod alphabet;
pub mod counter;
pub mod crypto;
pub mod key;
pub mod oob;
pub mod policy;
pub mod ppp;
pub mod session;
pub mod state;
pub mod store;

pub use counter::Counter;
pub use key::SequenceKey;
pub use policy::Policy;
pub use state::State;

/// encapsulates an [`OtpError`]
pub type Result<T> = std::result::Result<T, OtpError>;

/// Reasons a requested mutation was refused by the [`policy`] gate.
#[derive(Error, Display, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PolicyDenial {
    #[display("key generation is disabled by policy")]
    KeyGeneration,
    #[display("key regeneration is disabled by policy")]
    KeyRegeneration,
    #[display("key removal is disabled by policy")]
    KeyRemoval,
    #[display("disabling a state is not permitted by policy")]
    Disabling,
    #[display("skipping ahead is disabled by policy")]
    Skipping,
    #[display("printing passcodes is disabled by policy")]
    PasscodePrint,
    #[display("printing the raw key is disabled by policy")]
    KeyPrint,
    #[display("the requested salt setting conflicts with policy")]
    Salt,
    #[display("the requested show setting conflicts with policy")]
    Show,
    #[display("the requested alphabet is not permitted by policy")]
    Alphabet,
    #[display("the requested passcode length is not permitted by policy")]
    PasscodeLength,
    #[display("changing the contact field is disabled by policy")]
    ContactChange,
    #[display("changing the label field is disabled by policy")]
    LabelChange,
    #[display("changing the static password is disabled by policy")]
    SpassChange,
    #[display("authentication against a disabled state is refused")]
    StateDisabled,
}

/// Top-level error type for every fallible operation in this crate.
///
/// Each variant corresponds to one of the negative status codes carried
/// over the [`agent`] wire protocol; see [`OtpError::status_code`].
#[derive(Error, Display, Debug)]
pub enum OtpError {
    #[display("out of memory")]
    NoMem,
    #[display("failed to acquire the state lock in time")]
    LockError,
    #[display("no such state entry exists")]
    NonExistent,
    #[display("underlying I/O failure: {_0}")]
    Io(#[error(source)] std::io::Error),
    #[display("the passcode space for this key is exhausted")]
    Numspace,
    #[display("state entry could not be parsed: {_0}")]
    ParseError(#[error(not(source))] String),
    #[display("no entry found for this user")]
    NoUserEntry,
    #[display("no such user")]
    NoSuchUser,
    #[display("the user's home directory could not be determined")]
    NoUserHome,
    #[display("a duplicate entry exists for this user")]
    DuplicateEntry,
    #[display("requested alphabet id is invalid")]
    InvalidAlphabet,
    #[display("requested passcode length is out of range")]
    InvalidLength,
    #[display("column out of range for this passcard")]
    ColumnRange,
    #[display("row out of range for this passcard")]
    RowRange,
    #[display("operation refused by policy: {_0}")]
    Policy(#[error(not(source))] PolicyDenial),
    #[display("state was modified concurrently")]
    ConcurrentModification,
    #[display("protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
    #[display("agent disconnected")]
    Disconnect,
    #[display("timed out waiting for agent to initialize")]
    ServerInit,
    #[display("agent speaks an incompatible protocol version")]
    ProtocolMismatch,
    #[display("agent configuration is invalid")]
    InitConfiguration,
    #[display("agent executable could not be located or is not runnable")]
    InitExecutable,
    #[display("agent could not acquire required privileges")]
    InitPrivileges,
    #[display("agent failed during emergency shutdown")]
    InitEmergency,
    #[display("a state is already loaded for this session")]
    MustDropState,
    #[display("no state is loaded for this session")]
    MustCreateState,
    #[display("no state loaded")]
    NoState,
    #[display("supplied passcode did not match")]
    Mismatch,
}

impl OtpError {
    /// The negative wire-protocol status code for this error, matching
    /// the `STATE_*` / `AGENT_ERR_*` namespaces callers key off of.
    pub fn status_code(&self) -> i32 {
        match self {
            OtpError::NoMem => -1,
            OtpError::LockError => -2,
            OtpError::NonExistent => -3,
            OtpError::Io(_) => -4,
            OtpError::Numspace => -5,
            OtpError::ParseError(_) => -6,
            OtpError::NoUserEntry => -7,
            OtpError::NoSuchUser => -8,
            OtpError::NoUserHome => -9,
            OtpError::DuplicateEntry => -10,
            OtpError::InvalidAlphabet => -11,
            OtpError::InvalidLength => -12,
            OtpError::ColumnRange => -13,
            OtpError::RowRange => -14,
            OtpError::Policy(_) => -15,
            OtpError::ConcurrentModification => -16,
            OtpError::Protocol(_) => -17,
            OtpError::Disconnect => -18,
            OtpError::ServerInit => -19,
            OtpError::ProtocolMismatch => -20,
            OtpError::InitConfiguration => -21,
            OtpError::InitExecutable => -22,
            OtpError::InitPrivileges => -23,
            OtpError::InitEmergency => -24,
            OtpError::MustDropState => -25,
            OtpError::MustCreateState => -26,
            OtpError::NoState => -27,
            OtpError::Mismatch => -28,
        }
    }
}
