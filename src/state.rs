use crate::{
    config::Config,
    error::AppResult,
    services::{JwtAuthenticator, KeyExchangeService, KeyStore, UserRegistry},
    websocket::{handlers::chat_hub, MessageHub},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<UserRegistry>,
    pub key_store: Arc<KeyStore>,
    pub authenticator: Arc<JwtAuthenticator>,
    pub key_exchange: Arc<KeyExchangeService>,
    /// Live WebSocket connections
    pub hub: Arc<MessageHub>,
}

impl AppState {
    /// Wires the registry, key store, handshakes and hub from one config.
    pub fn new(config: Config) -> AppResult<Self> {
        let registry = Arc::new(UserRegistry::new());
        let key_store = KeyStore::new(registry.clone(), config.keys.expire_after);
        let authenticator = Arc::new(JwtAuthenticator::new(
            registry.clone(),
            &config.jwt_secret,
            config.token_ttl,
        ));
        let key_exchange = Arc::new(KeyExchangeService::new(
            config.keys.clone(),
            key_store.clone(),
        ));
        let hub = chat_hub(authenticator.clone(), key_store.clone())?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            key_store,
            authenticator,
            key_exchange,
            hub,
        })
    }
}
