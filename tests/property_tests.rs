//! Property-based tests for the frame layout and signatures.

use proptest::prelude::*;

use meshcast_core::constants::HEADER_LEN;
use meshcast_core::encoding::ENCODING_RAW;
use meshcast_core::{Header, Identity, Message};

mod header_properties {
    use super::*;

    proptest! {
        /// Any 88 bytes decode to a header, and re-encode to the same bytes
        #[test]
        fn decode_is_total(raw in prop::collection::vec(any::<u8>(), HEADER_LEN)) {
            let header = Header::decode(&raw).unwrap();
            prop_assert_eq!(&header.to_bytes()[..], &raw[..]);
        }

        /// Anything shorter than a header is rejected, never panics
        #[test]
        fn short_input_rejected(raw in prop::collection::vec(any::<u8>(), 0..HEADER_LEN)) {
            prop_assert!(Header::decode(&raw).is_err());
        }

        /// Only version-0, zero-hop frames opening with the magic byte are pings
        #[test]
        fn ping_classification(magic in any::<u8>(), version in any::<i8>(), hops in any::<i8>()) {
            let mut header = Header::ping();
            header.magic = magic;
            header.version = version;
            header.hops = hops;
            prop_assert_eq!(header.is_ping(), magic == b'g' && version == 0 && hops == 0);
        }
    }
}

mod signature_properties {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// A signed message verifies, and flipping any body bit breaks it
        #[test]
        fn body_bit_flip_breaks_signature(
            body in prop::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = SigningKey::random(&mut OsRng);
            let msg = Message::signed(Identity::random(), ENCODING_RAW, body, &key).unwrap();
            prop_assert!(msg.verify(key.verifying_key()));

            let mut tampered = msg.body.to_vec();
            let at = flip.index(tampered.len());
            tampered[at] ^= 1u8 << bit;
            let forged = Message::new(msg.header, tampered);
            prop_assert!(!forged.verify(key.verifying_key()));
        }

        /// Flipping a bit of sender, encoding or length breaks the signature
        #[test]
        fn signed_header_field_flip_breaks_signature(field in 0usize..3, bit in 0u32..8, byte in 0usize..16) {
            let key = SigningKey::random(&mut OsRng);
            let mut msg = Message::signed(Identity::random(), ENCODING_RAW, vec![1u8, 2, 3], &key).unwrap();
            match field {
                0 => {
                    let mut raw = *msg.header.sender.as_bytes();
                    raw[byte] ^= 1u8 << bit;
                    msg.header.sender = Identity::from_bytes(raw);
                }
                1 => msg.header.encoding ^= 1i8 << bit,
                _ => msg.header.length ^= 1i32 << (bit + 8 * (byte % 4) as u32),
            }
            prop_assert!(!msg.verify(key.verifying_key()));
        }

        /// Hop count is outside the signed region
        #[test]
        fn hops_not_signed(hops in any::<i8>()) {
            let key = SigningKey::random(&mut OsRng);
            let mut msg = Message::signed(Identity::random(), ENCODING_RAW, vec![7u8; 16], &key).unwrap();
            msg.header.hops = hops;
            prop_assert!(msg.verify(key.verifying_key()));
        }
    }
}
