//! Property-based checks on passcode derivation and card geometry:
//! things that should hold for *any* key/counter/length, not just the
//! fixed scenario vectors covered by the inline unit tests.

use ppp_otp::alphabet::ALPHABET_SIMPLE;
use ppp_otp::key::SequenceKey;
use ppp_otp::ppp;
use ppp_otp::Counter;
use proptest::prelude::*;

fn arb_key() -> impl Strategy<Value = SequenceKey> {
    prop::array::uniform32(any::<u8>()).prop_map(SequenceKey::from_bytes)
}

proptest! {
    #[test]
    fn derive_is_deterministic_for_a_fixed_key_and_counter(
        key_bytes in prop::array::uniform32(any::<u8>()),
        counter in any::<u64>(),
        code_length in 2u32..=16,
    ) {
        let key = SequenceKey::from_bytes(key_bytes);
        let a = ppp::derive(&key, Counter::from(counter), ALPHABET_SIMPLE, code_length).unwrap();
        let b = ppp::derive(&key, Counter::from(counter), ALPHABET_SIMPLE, code_length).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn derive_produces_exactly_code_length_characters_from_the_alphabet(
        key in arb_key(),
        counter in any::<u64>(),
        code_length in 2u32..=16,
    ) {
        let passcode = ppp::derive(&key, Counter::from(counter), ALPHABET_SIMPLE, code_length).unwrap();
        prop_assert_eq!(passcode.chars().count() as u32, code_length);
        prop_assert!(passcode.chars().all(|c| ALPHABET_SIMPLE.contains(c)));
    }

    #[test]
    fn different_counters_almost_always_derive_different_passcodes(
        key in arb_key(),
        counter in 0u64..1_000_000,
    ) {
        let a = ppp::derive(&key, Counter::from(counter), ALPHABET_SIMPLE, 8).unwrap();
        let b = ppp::derive(&key, Counter::from(counter + 1), ALPHABET_SIMPLE, 8).unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn codes_in_row_for_length_is_defined_for_every_policy_length(code_length in 2u32..=16) {
        prop_assert!(ppp::codes_in_row_for_length(code_length).is_ok());
    }

    #[test]
    fn codes_in_row_for_length_rejects_lengths_outside_policy(code_length in 17u32..1000) {
        prop_assert!(ppp::codes_in_row_for_length(code_length).is_err());
    }
}
