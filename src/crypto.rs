//! Cryptographic primitives: AES-256 single-block encryption, SHA-256,
//! OS randomness and constant-time comparison.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::key::{SequenceKey, SEQUENCE_KEY_LEN};

/// Encrypts one 16-byte block with AES-256 under `key`. This is the only
/// cryptographic operation the passcode derivation step (`ppp::derive`)
/// needs; PPP uses AES as a keyed permutation, not as a stream cipher, so
/// a single ECB block is the whole story.
pub fn aes256_encrypt_block(key: &SequenceKey, block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));
    let mut buf = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Generates a fresh 256-bit key from the OS CSPRNG.
pub fn generate_sequence_key() -> SequenceKey {
    let mut bytes = [0u8; SEQUENCE_KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    SequenceKey::from_bytes(bytes)
}

/// Fills `buf` with OS-sourced random bytes, e.g. for salt generation.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Constant-time equality for two passcode/spass-hash strings, so
/// authentication never leaks timing information about where the first
/// mismatching byte occurred.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}
