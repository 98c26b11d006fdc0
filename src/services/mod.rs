pub mod auth;
pub mod key_exchange;
pub mod key_store;
pub mod user_registry;

pub use auth::{Authenticator, JwtAuthenticator};
pub use key_exchange::{KeyExchangeService, PeerPublicKey};
pub use key_store::{KeyExpiryObserver, KeyStore};
pub use user_registry::{UserDeletedListener, UserRegistry};
