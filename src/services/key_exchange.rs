use crate::config::{KeyExchangeScheme, KeyPolicy};
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::services::key_store::KeyStore;
use crypto_core::rsa_exchange::{
    encrypt_key_for, parse_public_key_pem, public_key_from_components, validate_peer_key_size,
};
use crypto_core::{BigUint, CryptoError, DhParameters, DiffieHellmanSession, RsaPublicKey, ServerKeyPair};
use std::sync::Arc;

/// Public key a client presents for the RSA exchange.
#[derive(Debug, Clone)]
pub enum PeerPublicKey {
    Pem(String),
    /// Exponent plus big-endian modulus bytes
    Components { e: BigUint, n: Vec<u8> },
}

/// Drives both handshakes and hands the resulting keys to the key store.
pub struct KeyExchangeService {
    policy: KeyPolicy,
    key_store: Arc<KeyStore>,
}

impl KeyExchangeService {
    pub fn new(policy: KeyPolicy, key_store: Arc<KeyStore>) -> Self {
        Self { policy, key_store }
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    fn require(&self, scheme: KeyExchangeScheme) -> AppResult<()> {
        if self.policy.scheme != scheme {
            return Err(AppError::KeyBad(format!(
                "key exchange scheme is {}",
                self.policy.scheme
            )));
        }
        Ok(())
    }

    /// First leg of the Diffie–Hellman handshake: fresh `(p, g)` and a new
    /// session attached to `user`, replacing any earlier one.
    pub async fn request_parameters(&self, user: &User) -> AppResult<DhParameters> {
        self.require(KeyExchangeScheme::DiffieHellman)?;

        let params = DhParameters::generate_async(self.policy.dh_prime_bits).await?;
        let session = DiffieHellmanSession::from_parameters(&params)?
            .with_exponent_bits(self.policy.dh_exponent_bits)?;
        user.set_diffie_hellman(session);

        tracing::debug!(user = user.name(), bits = self.policy.dh_prime_bits, "dh parameters issued");
        Ok(params)
    }

    /// Second leg: takes the client's `B` (decimal), derives `K`, installs it
    /// as both cipher keys and returns `A`.
    pub async fn complete_diffie_hellman(&self, user: &User, big_b: &str) -> AppResult<BigUint> {
        self.require(KeyExchangeScheme::DiffieHellman)?;

        let big_b: BigUint = big_b
            .trim()
            .parse()
            .map_err(|_| AppError::KeyBad(format!("bigB is not a decimal integer: {big_b}")))?;
        let mut session = user
            .take_diffie_hellman()
            .ok_or_else(|| AppError::KeyBad("no key exchange in progress".into()))?;

        let derived = derive_shared_key(&mut session, big_b).await;
        // keep the spent session so a replayed bigB fails instead of re-keying,
        // unless GET /key attached a fresh one while we were suspended
        if !user.restore_diffie_hellman(session) {
            tracing::debug!(user = user.name(), "newer key exchange started during completion");
        }
        let (big_a, key) = derived.map_err(|e| AppError::KeyBad(e.to_string()))?;

        self.key_store.store_keys(user, key.clone(), key)?;
        Ok(big_a)
    }

    pub async fn generate_keypair(&self) -> AppResult<ServerKeyPair> {
        ServerKeyPair::generate_async(self.policy.key_size)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "rsa key generation failed");
                AppError::Server(e.to_string())
            })
    }

    pub fn validate_peer_key_size(&self, key: &RsaPublicKey) -> AppResult<()> {
        Ok(validate_peer_key_size(key, self.policy.key_size)?)
    }

    /// The peer key becomes the encrypt key, the server private key the
    /// decrypt key.
    pub fn bind_keys(
        &self,
        user: &User,
        peer_key: &RsaPublicKey,
        server: &ServerKeyPair,
        peer_already_validated: bool,
    ) -> AppResult<()> {
        if !peer_already_validated {
            self.validate_peer_key_size(peer_key)?;
        }
        let encrypt_key = encrypt_key_for(peer_key)?;
        let decrypt_key = server.decrypt_key()?;
        self.key_store.store_keys(user, encrypt_key, decrypt_key)
    }

    /// Full RSA exchange. Returns the server public key as PKCS#1 PEM.
    pub async fn exchange_rsa(&self, user: &User, peer: PeerPublicKey) -> AppResult<String> {
        self.require(KeyExchangeScheme::Rsa)?;

        let peer_key = match peer {
            PeerPublicKey::Pem(pem) => parse_public_key_pem(&pem)?,
            PeerPublicKey::Components { e, n } => public_key_from_components(&e, &n)?,
        };
        self.validate_peer_key_size(&peer_key)?;

        let server = self.generate_keypair().await?;
        self.bind_keys(user, &peer_key, &server, true)?;
        Ok(server.public_key_pem()?)
    }
}

async fn derive_shared_key(
    session: &mut DiffieHellmanSession,
    big_b: BigUint,
) -> Result<(BigUint, Vec<u8>), CryptoError> {
    if session.has_shared_secret() {
        return Err(CryptoError::KeyBad("key exchange already completed".into()));
    }
    session.generate_private_exponent().await?;
    let big_a = session.public_value()?;
    session.compute_shared_secret(big_b)?;
    let key = session.shared_secret_key()?;
    Ok((big_a, key))
}
