//! Key agreement and payload cipher primitives for the chat service.
//!
//! Nothing here is a vetted cryptosystem. The digit cipher and the handshake
//! helpers reproduce a fixed wire format that clients already speak.

pub mod diffie_hellman;
pub mod digit_cipher;
pub mod modular;
pub mod rsa_exchange;

pub use diffie_hellman::{DhParameters, DiffieHellmanSession};
pub use digit_cipher::{CipherOptions, Digits};
pub use num_bigint_dig::BigUint;
pub use rsa_exchange::{RsaPublicKey, ServerKeyPair};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bad key material: {0}")]
    KeyBad(String),
    #[error("key size mismatch: expected {expected} bits, got {actual}")]
    KeySize { expected: usize, actual: usize },
    #[error("bad message: {0}")]
    MsgBad(String),
    #[error("crypto backend failure: {0}")]
    Server(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
