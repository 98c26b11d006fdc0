//! Chat wiring for the hub: message relay with per-recipient re-encryption,
//! presence events, and key-expiry notifications.

use super::message_types::{
    events, ChatLine, MessageReceivedPayload, MessageSentPayload, UserPresence,
};
use super::{Client, EmitArgs, Emitter, MessageHub, Subscriber};
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::services::auth::Authenticator;
use crate::services::key_store::{KeyExpiryObserver, KeyStore};
use crypto_core::digit_cipher;
use crypto_core::CipherOptions;
use serde_json::json;
use std::sync::Arc;

/// Builds the hub with every chat subscriber and emitter registered.
pub fn chat_hub(
    authenticator: Arc<dyn Authenticator>,
    key_store: Arc<KeyStore>,
) -> AppResult<Arc<MessageHub>> {
    let on_created = key_store.clone();
    let on_disposed = key_store;

    MessageHub::builder()
        .subscriber(
            events::MESSAGE_SENT,
            Subscriber::MessageSent(Box::new(message_sent)),
        )
        .emitter(
            events::MESSAGE_RECEIVED,
            Emitter::MessageReceived(Box::new(message_received)),
        )
        .emitter(events::ERROR, Emitter::Error(Box::new(report_error)))
        .emitter(
            events::CLIENT_CREATED,
            Emitter::ClientCreated(Box::new(
                move |client: &Client, hub: &Arc<MessageHub>, _: ()| {
                    watch_key_expiry(&on_created, client, hub)
                },
            )),
        )
        .emitter(
            events::CLIENT_DISPOSED,
            Emitter::ClientDisposed(Box::new(
                move |client: &Client, _: &Arc<MessageHub>, _: ()| {
                    if on_disposed.has(client.name()) {
                        on_disposed.delete_callback(client.name());
                    }
                    Ok(())
                },
            )),
        )
        .emitter(
            events::USER_JOINED,
            Emitter::UserJoined(Box::new(
                |client: &Client, _: &Arc<MessageHub>, presence: UserPresence| {
                    client.emit(events::USER_JOINED, &presence)
                },
            )),
        )
        .emitter(
            events::USER_LEFT,
            Emitter::UserLeft(Box::new(
                |client: &Client, _: &Arc<MessageHub>, presence: UserPresence| {
                    client.emit(events::USER_LEFT, &presence)
                },
            )),
        )
        .build(authenticator)
}

/// Decrypts with the sender's key and relays the plaintext to everyone.
fn message_sent(client: &Client, hub: &Arc<MessageHub>, payload: MessageSentPayload) -> AppResult<()> {
    let digits = payload.message.into_digits()?;
    let key = client.user().decrypt_key()?;
    let text = digit_cipher::decrypt(&digits, &key, false)?;

    hub.broadcast(
        events::MESSAGE_RECEIVED,
        &[],
        EmitArgs::MessageReceived(ChatLine {
            username: client.name().to_string(),
            text,
        }),
    )
}

/// Re-encrypts under the recipient's own key.
fn message_received(client: &Client, _: &Arc<MessageHub>, line: ChatLine) -> AppResult<()> {
    let key = client.user().encrypt_key()?;
    let message = digit_cipher::encrypt(&line.text, &key, CipherOptions::default())?;
    client.emit(
        events::MESSAGE_RECEIVED,
        &MessageReceivedPayload {
            username: line.username,
            message,
        },
    )
}

fn report_error(client: &Client, _: &Arc<MessageHub>, err: AppError) -> AppResult<()> {
    client.emit(events::ERROR, &err.payload())
}

/// Attaches a fresh observer to the user's pending expiration, scheduling one
/// if none exists.
fn watch_key_expiry(key_store: &KeyStore, client: &Client, hub: &Arc<MessageHub>) -> AppResult<()> {
    let observer = key_outdated_observer(client, hub);
    if key_store.has(client.name()) {
        key_store.set_callback(client.name(), observer);
        Ok(())
    } else {
        key_store.schedule(client.name(), Some(observer))
    }
}

fn key_outdated_observer(client: &Client, hub: &Arc<MessageHub>) -> Arc<dyn KeyExpiryObserver> {
    let client = client.clone();
    let hub = Arc::downgrade(hub);
    Arc::new(move |outcome: AppResult<Arc<User>>| {
        let sent = outcome.and_then(|_| client.emit(events::KEY_OUTDATED, &json!({})));
        if let Err(e) = sent {
            match hub.upgrade() {
                Some(hub) => hub.emit_error(&client, e),
                None => tracing::warn!(user = client.name(), error = %e, "key-outdated dropped"),
            }
        }
    })
}
