//! End-to-end chat scenarios against a fully wired `AppState`, with the
//! WebSocket transport replaced by the per-client channels it would drain.

use cipher_chat_service::config::{Config, KeyExchangeScheme};
use cipher_chat_service::error::AppError;
use cipher_chat_service::models::User;
use cipher_chat_service::state::AppState;
use cipher_chat_service::websocket::Client;
use crypto_core::digit_cipher::{self, normalize_key};
use crypto_core::modular::mod_pow;
use crypto_core::{BigUint, CipherOptions, Digits};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn test_state(scheme: KeyExchangeScheme) -> AppState {
    let mut config = Config::new("flow-secret");
    config.keys.scheme = scheme;
    config.keys.dh_prime_bits = 64;
    config.keys.dh_exponent_bits = 48;
    config.keys.key_size = 512;
    config.keys.expire_after = Duration::from_secs(600);
    AppState::new(config).unwrap()
}

/// Client half of the Diffie–Hellman handshake with a fixed secret `b`.
async fn handshake(state: &AppState, user: &User, b: u64) -> Digits {
    let params = state.key_exchange.request_parameters(user).await.unwrap();
    let b = BigUint::from(b);
    let big_b = mod_pow(&params.g, &b, &params.p);

    let big_a = state
        .key_exchange
        .complete_diffie_hellman(user, &big_b.to_string())
        .await
        .unwrap();
    normalize_key(&mod_pow(&big_a, &b, &params.p).to_bytes_be())
}

fn connect(state: &AppState, user: &User) -> (Client, UnboundedReceiver<String>) {
    let token = state.authenticator.issue_token(user).unwrap();
    let (tx, rx) = unbounded_channel();
    let client = state.hub.accept(Some(&token), tx).unwrap();
    (client, rx)
}

fn next_event(rx: &mut UnboundedReceiver<String>) -> Value {
    serde_json::from_str(&rx.try_recv().expect("pending frame")).unwrap()
}

#[tokio::test]
async fn test_alice_message_reaches_bob_under_his_key() {
    let state = test_state(KeyExchangeScheme::DiffieHellman);
    let alice = state.registry.add("alice").unwrap();
    let bob = state.registry.add("bob").unwrap();

    let alice_key = handshake(&state, &alice, 123_456_789).await;
    let bob_key = handshake(&state, &bob, 987_654_321).await;
    assert_eq!(alice.encrypt_key().unwrap(), alice_key);
    assert_eq!(bob.decrypt_key().unwrap(), bob_key);

    let (alice_client, mut alice_rx) = connect(&state, &alice);
    let (_bob_client, mut bob_rx) = connect(&state, &bob);
    let joined = next_event(&mut alice_rx);
    assert_eq!(joined, json!({"event": "user-joined", "data": {"username": "bob"}}));

    let plaintext = "meet at noon";
    let ciphertext = digit_cipher::encrypt(plaintext, &alice_key, CipherOptions::default()).unwrap();
    let frame = json!({"event": "message-sent", "data": {"message": ciphertext}});
    state.hub.handle_message(&alice_client, &frame.to_string());

    let received = next_event(&mut bob_rx);
    assert_eq!(received["event"], "message-received");
    assert_eq!(received["data"]["username"], "alice");
    let digits: Digits = serde_json::from_value(received["data"]["message"].clone()).unwrap();
    assert_eq!(digit_cipher::decrypt(&digits, &bob_key, false).unwrap(), plaintext);

    // the sender gets her own copy back
    let echo = next_event(&mut alice_rx);
    let digits: Digits = serde_json::from_value(echo["data"]["message"].clone()).unwrap();
    assert_eq!(digit_cipher::decrypt(&digits, &alice_key, false).unwrap(), plaintext);
}

#[tokio::test]
async fn test_second_connection_for_same_user_is_rejected() {
    let state = test_state(KeyExchangeScheme::DiffieHellman);
    let alice = state.registry.add("alice").unwrap();

    let (first, mut first_rx) = connect(&state, &alice);
    let token = state.authenticator.issue_token(&alice).unwrap();
    let (tx, _rx) = unbounded_channel();
    assert_eq!(
        state.hub.accept(Some(&token), tx).unwrap_err(),
        AppError::AuthDuplicateName
    );

    assert!(first.is_open());
    assert!(state.hub.is_connected("alice"));
    assert!(first_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_expiry_timer() {
    let state = test_state(KeyExchangeScheme::DiffieHellman);
    let alice = state.registry.add("alice").unwrap();
    let bob = state.registry.add("bob").unwrap();
    handshake(&state, &alice, 42_424_242).await;

    let (alice_client, _alice_rx) = connect(&state, &alice);
    let (_bob_client, mut bob_rx) = connect(&state, &bob);

    state.hub.disconnect(alice_client.id()).unwrap();
    assert!(!state.hub.is_connected("alice"));
    assert_eq!(
        next_event(&mut bob_rx),
        json!({"event": "user-left", "data": {"username": "alice"}})
    );
    assert!(state.key_store.has("alice"));
    assert!(!state.key_store.has_callback("alice"));

    tokio::time::sleep(Duration::from_secs(601)).await;
    assert!(!alice.has_keys());
    assert!(!state.key_store.has("alice"));
}

#[tokio::test(start_paused = true)]
async fn test_connected_user_is_told_when_keys_expire() {
    let state = test_state(KeyExchangeScheme::DiffieHellman);
    let alice = state.registry.add("alice").unwrap();
    handshake(&state, &alice, 7_777_777).await;
    let (_client, mut rx) = connect(&state, &alice);

    tokio::time::sleep(Duration::from_secs(601)).await;
    assert_eq!(next_event(&mut rx), json!({"event": "key-outdated", "data": {}}));

    // sending with an expired key is a key error, not a dropped connection
    let alice_client = state.hub.client("alice").unwrap();
    state
        .hub
        .handle_message(&alice_client, r#"{"event":"message-sent","data":{"message":[1,2,3]}}"#);
    let reply = next_event(&mut rx);
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["data"]["code"], "KEY_BAD");
}

#[tokio::test]
async fn test_rsa_keys_drive_the_cipher() {
    let state = test_state(KeyExchangeScheme::Rsa);
    let erin = state.registry.add("erin").unwrap();
    let peer = crypto_core::ServerKeyPair::generate(512).unwrap();

    let pem = state
        .key_exchange
        .exchange_rsa(
            &erin,
            cipher_chat_service::services::PeerPublicKey::Pem(peer.public_key_pem().unwrap()),
        )
        .await
        .unwrap();
    let server_public = crypto_core::rsa_exchange::parse_public_key_pem(&pem).unwrap();
    assert!(crypto_core::rsa_exchange::validate_peer_key_size(&server_public, 512).is_ok());

    let encrypt_key = erin.encrypt_key().unwrap();
    assert!(encrypt_key.iter().all(|d| *d <= 9));
    let ct = digit_cipher::encrypt("rsa works", &encrypt_key, CipherOptions::default()).unwrap();
    assert_eq!(digit_cipher::decrypt(&ct, &encrypt_key, false).unwrap(), "rsa works");
}
