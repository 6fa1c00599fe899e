//! Property-based tests for the wire codec.
//!
//! The framing must be structurally lossless: any message assembled by
//! `encode_wire` decodes back to the same fields, and no input, however
//! mangled, may panic the decoder.

use attest_core::codec::{self, OsEnforcedFlags, PROTOCOL_VERSION};
use proptest::prelude::*;

/// A flag byte that satisfies the device-admin invariant.
fn flag_byte() -> impl Strategy<Value = u8> {
    any::<u8>().prop_map(|bits| {
        if bits & 0x80 != 0 {
            bits | 0x04
        } else {
            bits
        }
    })
}

fn cert_chain() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 0..4)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// Framing round-trips for every well-formed message.
    #[test]
    fn round_trip(
        chain in cert_chain(),
        fingerprint in any::<[u8; 32]>(),
        flags in flag_byte(),
        signature in prop::collection::vec(any::<u8>(), 0..80),
    ) {
        let flags = OsEnforcedFlags::from_bits(flags).unwrap();
        let wire =
            codec::encode_wire(PROTOCOL_VERSION, &chain, &fingerprint, flags, &signature).unwrap();
        let message = codec::decode(&wire).unwrap();

        prop_assert_eq!(message.version, PROTOCOL_VERSION);
        prop_assert_eq!(message.chain, chain);
        prop_assert_eq!(message.persistent_key_fingerprint, fingerprint);
        prop_assert_eq!(message.os_enforced_flags, flags);
        prop_assert_eq!(message.signature, signature);
    }

    /// The signed range and the signature partition the wire bytes.
    #[test]
    fn signed_range_and_signature_partition_the_message(
        chain in cert_chain(),
        fingerprint in any::<[u8; 32]>(),
        signature in prop::collection::vec(any::<u8>(), 0..80),
    ) {
        let flags = OsEnforcedFlags::from_bits(0).unwrap();
        let wire =
            codec::encode_wire(PROTOCOL_VERSION, &chain, &fingerprint, flags, &signature).unwrap();
        let message = codec::decode(&wire).unwrap();

        let mut reassembled = message.signed_range.clone();
        reassembled.extend_from_slice(&message.signature);
        prop_assert_eq!(reassembled, wire);
    }

    /// Arbitrary input is rejected or decoded, never a panic.
    #[test]
    fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..600)) {
        let _ = codec::decode(&data);
    }

    /// Single-byte corruption never panics the decoder.
    #[test]
    fn corrupted_messages_never_panic(
        chain in cert_chain(),
        index in any::<prop::sample::Index>(),
        xor in 1u8..,
    ) {
        let flags = OsEnforcedFlags::from_bits(0).unwrap();
        let mut wire =
            codec::encode_wire(PROTOCOL_VERSION, &chain, &[3u8; 32], flags, b"sig").unwrap();
        let target = index.index(wire.len());
        wire[target] ^= xor;
        let _ = codec::decode(&wire);
    }
}
