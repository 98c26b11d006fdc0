//! RSA variant of the key handshake.
//!
//! The client posts its public key, the server answers with a fresh public
//! key of the same size. Both sides then use DER encodings reduced to digits
//! as cipher keys.

use crate::digit_cipher::{normalize_key, Digits};
use crate::{CryptoError, CryptoResult};
use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
pub use rsa::RsaPublicKey;
use rsa::RsaPrivateKey;
use std::fmt;
use tracing::debug;

/// Server key pair for one RSA handshake.
#[derive(Clone)]
pub struct ServerKeyPair {
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

impl ServerKeyPair {
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::Server(format!("rsa key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        debug!(bits, "generated rsa server keypair");
        Ok(Self { public, private })
    }

    /// Generation of a 4096-bit key takes seconds, so it runs off the
    /// async workers.
    pub async fn generate_async(bits: usize) -> CryptoResult<Self> {
        tokio::task::spawn_blocking(move || Self::generate(bits))
            .await
            .map_err(|e| CryptoError::Server(format!("rsa key task failed: {e}")))?
    }

    pub fn bits(&self) -> usize {
        self.public.n().bits()
    }

    pub fn public_key_pem(&self) -> CryptoResult<String> {
        public_key_to_pem(&self.public)
    }

    pub fn private_key_der(&self) -> CryptoResult<Vec<u8>> {
        self.private
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::Server(format!("private key export failed: {e}")))
    }

    /// Digit key used to decrypt what the peer sends us.
    pub fn decrypt_key(&self) -> CryptoResult<Digits> {
        Ok(normalize_key(&self.private_key_der()?))
    }
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// Accepts PKCS#1 (`BEGIN RSA PUBLIC KEY`) or SPKI (`BEGIN PUBLIC KEY`).
pub fn parse_public_key_pem(pem: &str) -> CryptoResult<RsaPublicKey> {
    let pem = pem.trim();
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
        .map_err(|e| CryptoError::KeyBad(format!("unreadable public key: {e}")))
}

/// Builds a public key from its exponent and big-endian modulus bytes.
pub fn public_key_from_components(e: &BigUint, n_be: &[u8]) -> CryptoResult<RsaPublicKey> {
    let n = BigUint::from_bytes_be(n_be);
    RsaPublicKey::new(n, e.clone())
        .map_err(|err| CryptoError::KeyBad(format!("invalid public key components: {err}")))
}

pub fn validate_peer_key_size(key: &RsaPublicKey, expected_bits: usize) -> CryptoResult<()> {
    let actual = key.n().bits();
    if actual != expected_bits {
        return Err(CryptoError::KeySize {
            expected: expected_bits,
            actual,
        });
    }
    Ok(())
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> CryptoResult<String> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Server(format!("public key export failed: {e}")))
}

pub fn public_key_to_der(key: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Server(format!("public key export failed: {e}")))
}

/// Digit key used to encrypt what we send to the holder of `key`.
pub fn encrypt_key_for(key: &RsaPublicKey) -> CryptoResult<Digits> {
    Ok(normalize_key(&public_key_to_der(key)?))
}
