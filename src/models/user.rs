use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use crypto_core::{DiffieHellmanSession, Digits};
use parking_lot::RwLock;

#[derive(Debug)]
struct KeyState {
    encrypt_key: Option<Digits>,
    decrypt_key: Option<Digits>,
    dh_session: Option<DiffieHellmanSession>,
    updated_at: DateTime<Utc>,
    last_logged_in: DateTime<Utc>,
}

/// A registered chat participant and the key material bound to them.
///
/// Key fields change only through [`User::update_keys`] and
/// [`User::delete_keys`].
#[derive(Debug)]
pub struct User {
    name: String,
    state: RwLock<KeyState>,
}

impl User {
    pub fn new(name: &str) -> AppResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::AuthEmptyName);
        }
        let now = Utc::now();
        Ok(Self {
            name: name.to_string(),
            state: RwLock::new(KeyState {
                encrypt_key: None,
                decrypt_key: None,
                dh_session: None,
                updated_at: now,
                last_logged_in: now,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encrypt_key(&self) -> AppResult<Digits> {
        self.state
            .read()
            .encrypt_key
            .clone()
            .ok_or_else(|| AppError::KeyBad("encrypt key is not set".into()))
    }

    pub fn decrypt_key(&self) -> AppResult<Digits> {
        self.state
            .read()
            .decrypt_key
            .clone()
            .ok_or_else(|| AppError::KeyBad("decrypt key is not set".into()))
    }

    pub fn has_keys(&self) -> bool {
        let state = self.state.read();
        matches!(
            (&state.encrypt_key, &state.decrypt_key),
            (Some(enc), Some(dec)) if !enc.is_empty() && !dec.is_empty()
        )
    }

    pub fn update_keys(&self, encrypt_key: Digits, decrypt_key: Digits) -> AppResult<()> {
        if encrypt_key.is_empty() || decrypt_key.is_empty() {
            return Err(AppError::KeyBad("key is empty".into()));
        }
        let mut state = self.state.write();
        state.encrypt_key = Some(encrypt_key);
        state.decrypt_key = Some(decrypt_key);
        state.updated_at = Utc::now();
        Ok(())
    }

    pub fn delete_keys(&self) {
        let mut state = self.state.write();
        state.encrypt_key = None;
        state.decrypt_key = None;
        state.updated_at = Utc::now();
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().updated_at
    }

    pub fn last_logged_in(&self) -> DateTime<Utc> {
        self.state.read().last_logged_in
    }

    pub fn log_in(&self) {
        self.state.write().last_logged_in = Utc::now();
    }

    /// Attaches a fresh handshake, dropping any previous one.
    pub fn set_diffie_hellman(&self, session: DiffieHellmanSession) {
        self.state.write().dh_session = Some(session);
    }

    /// Detaches the handshake so it can be driven across await points.
    pub fn take_diffie_hellman(&self) -> Option<DiffieHellmanSession> {
        self.state.write().dh_session.take()
    }

    /// Puts a detached handshake back unless a newer one was attached in the
    /// meantime. Returns whether it was restored.
    pub fn restore_diffie_hellman(&self, session: DiffieHellmanSession) -> bool {
        let mut state = self.state.write();
        if state.dh_session.is_some() {
            return false;
        }
        state.dh_session = Some(session);
        true
    }

    pub fn has_diffie_hellman(&self) -> bool {
        self.state.read().dh_session.is_some()
    }
}
