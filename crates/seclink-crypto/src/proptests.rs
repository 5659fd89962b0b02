
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::cipher::{self, IV_SIZE};
    use crate::exchange::{ExchangeState, KeyExchange, SHARED_KEY_SIZE};

    proptest! {
        // Round-trip: decrypt(encrypt(p)) == p for any key and plaintext.
        #[test]
        fn test_cipher_round_trip(
            key in any::<[u8; 32]>(),
            plaintext in any::<Vec<u8>>()
        ) {
            let blob = cipher::encrypt(&key, &plaintext).unwrap();
            let decrypted = cipher::decrypt(&key, &blob).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }

        // Fresh IV per call: identical inputs never produce identical output.
        #[test]
        fn test_cipher_iv_uniqueness(
            key in any::<[u8; 32]>(),
            plaintext in any::<Vec<u8>>()
        ) {
            let a = cipher::encrypt(&key, &plaintext).unwrap();
            let b = cipher::encrypt(&key, &plaintext).unwrap();
            prop_assert_ne!(a, b);
        }

        // Any buffer at or below the IV length is rejected outright.
        #[test]
        fn test_cipher_truncated_rejected(
            key in any::<[u8; 32]>(),
            blob in proptest::collection::vec(any::<u8>(), 0..=IV_SIZE)
        ) {
            prop_assert!(cipher::decrypt(&key, &blob).is_none());
        }

        // Flipping any bit of the buffer never yields the original plaintext.
        #[test]
        fn test_cipher_bitflip_never_round_trips(
            key in any::<[u8; 32]>(),
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            byte_pos in any::<proptest::sample::Index>(),
            bit in 0..8u8
        ) {
            let mut blob = cipher::encrypt(&key, &plaintext).unwrap();
            let pos = byte_pos.index(blob.len());
            blob[pos] ^= 1 << bit;
            prop_assert_ne!(cipher::decrypt(&key, &blob), Some(plaintext));
        }

        // Independently generated exchanges always agree on the secret.
        #[test]
        fn test_ecdh_agreement(_i in 0..16u8) {
            let mut a = KeyExchange::new();
            let mut b = KeyExchange::new();
            a.initialize();
            b.initialize();

            let a_pub = a.public_key().to_vec();
            let b_pub = b.public_key().to_vec();
            a.finish(&b_pub).unwrap();
            b.finish(&a_pub).unwrap();

            prop_assert_eq!(a.shared_key().unwrap(), b.shared_key().unwrap());
        }

        // Once latched, no sequence of bogus target keys un-latches.
        #[test]
        fn test_latch_monotonicity(
            bogus in proptest::collection::vec(
                any::<[u8; SHARED_KEY_SIZE]>(), 1..8
            )
        ) {
            let mut a = KeyExchange::new();
            let mut b = KeyExchange::new();
            a.initialize();
            b.initialize();
            let b_pub = b.public_key().to_vec();
            a.finish(&b_pub).unwrap();

            let mine = *a.shared_key().unwrap();
            a.set_target_shared_key(&mine);
            prop_assert!(a.is_exchanged());

            for wrong in &bogus {
                a.set_target_shared_key(wrong);
                prop_assert_eq!(a.state(), ExchangeState::Exchanged);
                prop_assert!(a.is_exchanged());
            }
        }
    }
}
