//! Per-user key installation and expiry.
//!
//! Each user name has at most one pending expiration. When it fires the
//! user's keys are wiped and the attached observer, if any, hears about it.

use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::services::user_registry::{UserDeletedListener, UserRegistry};
use crypto_core::Digits;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives the outcome of an expiration: the user whose keys were wiped,
/// or the lookup failure if the user is gone.
pub trait KeyExpiryObserver: Send + Sync {
    fn key_expired(&self, outcome: AppResult<Arc<User>>);
}

impl<F> KeyExpiryObserver for F
where
    F: Fn(AppResult<Arc<User>>) + Send + Sync,
{
    fn key_expired(&self, outcome: AppResult<Arc<User>>) {
        self(outcome)
    }
}

struct ExpirationEntry {
    generation: u64,
    timer: JoinHandle<()>,
    observer: Option<Arc<dyn KeyExpiryObserver>>,
}

pub struct KeyStore {
    registry: Arc<UserRegistry>,
    expire_after: Duration,
    entries: Mutex<HashMap<String, ExpirationEntry>>,
    next_generation: AtomicU64,
    this: Weak<KeyStore>,
}

impl KeyStore {
    /// Builds the store and subscribes it to user deletions so a removed
    /// user never keeps a live timer.
    pub fn new(registry: Arc<UserRegistry>, expire_after: Duration) -> Arc<Self> {
        let store = Arc::new_cyclic(|this| Self {
            registry: registry.clone(),
            expire_after,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            this: this.clone(),
        });
        let listener: Weak<dyn UserDeletedListener> = Arc::downgrade(&store) as _;
        registry.add_listener(listener);
        store
    }

    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    /// Starts the expiration timer for `name`. Fails if one is pending.
    pub fn schedule(
        &self,
        name: &str,
        observer: Option<Arc<dyn KeyExpiryObserver>>,
    ) -> AppResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            tracing::error!(user = name, "key expiration already scheduled");
            return Err(AppError::Server(format!(
                "key expiration for {name} is already scheduled"
            )));
        }
        let entry = self.start_timer(name, observer);
        entries.insert(name.to_string(), entry);
        tracing::debug!(user = name, after = ?self.expire_after, "key expiration scheduled");
        Ok(())
    }

    /// Cancels the pending expiration for `name`. Returns whether one existed.
    pub fn delete(&self, name: &str) -> bool {
        match self.entries.lock().remove(name) {
            Some(entry) => {
                entry.timer.abort();
                tracing::debug!(user = name, "key expiration canceled");
                true
            }
            None => {
                tracing::warn!(user = name, "no key expiration to cancel");
                false
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Replaces the observer without touching the timer.
    pub fn set_callback(&self, name: &str, observer: Arc<dyn KeyExpiryObserver>) -> bool {
        match self.entries.lock().get_mut(name) {
            Some(entry) => {
                entry.observer = Some(observer);
                true
            }
            None => {
                tracing::warn!(user = name, "no key expiration to attach a callback to");
                false
            }
        }
    }

    /// Detaches the observer; the timer keeps running.
    pub fn delete_callback(&self, name: &str) -> bool {
        match self.entries.lock().get_mut(name) {
            Some(entry) => {
                entry.observer = None;
                true
            }
            None => {
                tracing::warn!(user = name, "no key expiration to detach a callback from");
                false
            }
        }
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.entries
            .lock()
            .get(name)
            .map(|e| e.observer.is_some())
            .unwrap_or(false)
    }

    /// Installs a new key pair on `user` and restarts their expiration,
    /// keeping whatever observer was attached to the previous one.
    pub fn store_keys(&self, user: &User, encrypt_key: Digits, decrypt_key: Digits) -> AppResult<()> {
        user.update_keys(encrypt_key, decrypt_key)?;

        let mut entries = self.entries.lock();
        let observer = entries.remove(user.name()).and_then(|old| {
            old.timer.abort();
            old.observer
        });
        let entry = self.start_timer(user.name(), observer);
        entries.insert(user.name().to_string(), entry);

        tracing::info!(user = user.name(), after = ?self.expire_after, "keys issued");
        Ok(())
    }

    fn start_timer(
        &self,
        name: &str,
        observer: Option<Arc<dyn KeyExpiryObserver>>,
    ) -> ExpirationEntry {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let this = self.this.clone();
        let owned = name.to_string();
        let after = self.expire_after;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(store) = this.upgrade() {
                store.fire(&owned, generation);
            }
        });

        ExpirationEntry {
            generation,
            timer,
            observer,
        }
    }

    fn fire(&self, name: &str, generation: u64) {
        let entry = {
            let mut entries = self.entries.lock();
            // superseded by a newer schedule
            if entries.get(name).map(|e| e.generation) != Some(generation) {
                return;
            }
            entries.remove(name)
        };
        let Some(entry) = entry else {
            return;
        };

        let outcome = self.registry.get(name).map(|user| {
            user.delete_keys();
            user
        });
        match &outcome {
            Ok(_) => tracing::info!(user = name, "keys expired"),
            Err(e) => tracing::warn!(user = name, error = %e, "keys expired for unknown user"),
        }

        if let Some(observer) = entry.observer {
            observer.key_expired(outcome);
        }
    }
}

impl UserDeletedListener for KeyStore {
    fn user_deleted(&self, user: &Arc<User>) {
        if self.has(user.name()) {
            self.delete(user.name());
        }
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            entry.timer.abort();
        }
    }
}
