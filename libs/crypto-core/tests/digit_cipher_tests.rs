use crypto_core::digit_cipher::{
    decrypt, decrypt_encoded, encrypt, encrypt_encoded, finalize_decode, normalize_key,
    prepare_encode,
};
use crypto_core::{CipherOptions, CryptoError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz ";

fn random_text(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

fn random_digits(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(0..10u8)).collect()
}

#[test]
fn test_encoding_round_trips_random_text() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for len in 0..64 {
        let text = random_text(&mut rng, len);
        let digits = prepare_encode(&text).expect("encode");
        assert_eq!(finalize_decode(&digits, false).expect("decode"), text);
    }
}

#[test]
fn test_digit_encryption_round_trips_for_any_key() {
    let mut rng = StdRng::seed_from_u64(42);
    let exact = CipherOptions {
        strict_key: false,
        fit_to_key: false,
    };
    for _ in 0..200 {
        let key_len = rng.gen_range(1..40);
        let message_len = rng.gen_range(0..120);
        let key = random_digits(&mut rng, key_len);
        let message = random_digits(&mut rng, message_len);
        let ct = encrypt_encoded(&message, &key, exact).expect("encrypt");
        assert_eq!(decrypt_encoded(&ct, &key, false).expect("decrypt"), message);
    }
}

#[test]
fn test_strict_round_trip_when_message_outgrows_key() {
    let mut rng = StdRng::seed_from_u64(9);
    let strict = CipherOptions {
        strict_key: true,
        fit_to_key: false,
    };
    for _ in 0..50 {
        let key_len = rng.gen_range(1..20);
        let message_len = key_len + rng.gen_range(1..30);
        let key = random_digits(&mut rng, key_len);
        let message = random_digits(&mut rng, message_len);
        let ct = encrypt_encoded(&message, &key, strict).expect("encrypt");
        assert_eq!(decrypt_encoded(&ct, &key, true).expect("decrypt"), message);
    }
}

#[test]
fn test_padded_ciphertext_is_a_key_multiple_and_decodes() {
    let mut rng = StdRng::seed_from_u64(77);
    for _ in 0..100 {
        let key_len = rng.gen_range(1..33);
        let text_len = rng.gen_range(1..50);
        let key = normalize_key(&random_digits(&mut rng, key_len));
        let text = random_text(&mut rng, text_len).trim_end().to_string();
        let ct = encrypt(&text, &key, CipherOptions::default()).expect("encrypt");
        assert_eq!(ct.len() % key.len(), 0);
        assert_eq!(decrypt(&ct, &key, false).expect("decrypt"), text);
    }
}

#[test]
fn test_different_keys_produce_different_ciphertext() {
    let a = encrypt("meet me at noon", &[1, 2, 3], CipherOptions::default()).unwrap();
    let b = encrypt("meet me at noon", &[3, 2, 1], CipherOptions::default()).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_text_outside_alphabet_is_rejected() {
    for text in ["Hello", "a1b", "dot.", "new\nline"] {
        let err = encrypt(text, &[1], CipherOptions::default()).unwrap_err();
        assert!(matches!(err, CryptoError::MsgBad(_)), "{text}: {err:?}");
    }
}
