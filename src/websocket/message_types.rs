use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crypto_core::Digits;
use serde::{Deserialize, Serialize};

/// Event names understood by the hub.
pub mod events {
    pub const ERROR: &str = "error";
    pub const CLIENT_CREATED: &str = "client-created";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const CLIENT_DISPOSED: &str = "client-disposed";

    pub const MESSAGE_SENT: &str = "message-sent";
    pub const MESSAGE_RECEIVED: &str = "message-received";
    pub const KEY_OUTDATED: &str = "key-outdated";

    /// Emitters every hub must carry.
    pub const LIFECYCLE: [&str; 5] = [ERROR, CLIENT_CREATED, USER_JOINED, USER_LEFT, CLIENT_DISPOSED];
}

/// Inbound frame: `{event, data}`
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Outbound frame: `{event, data}`
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a, T: Serialize> {
    pub event: &'a str,
    pub data: &'a T,
}

/// Ciphertext as sent by clients: a digit array or base64 of the digit bytes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CipherText {
    Digits(Vec<u8>),
    Base64(String),
}

impl CipherText {
    pub fn into_digits(self) -> AppResult<Digits> {
        let digits = match self {
            CipherText::Digits(d) => d,
            CipherText::Base64(s) => STANDARD
                .decode(s.trim())
                .map_err(|e| AppError::MsgBad(format!("message is not base64: {e}")))?,
        };
        if digits.iter().any(|d| *d > 9) {
            return Err(AppError::MsgBad("message is not a digit sequence".into()));
        }
        Ok(digits)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSentPayload {
    pub message: CipherText,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReceivedPayload {
    pub username: String,
    pub message: Digits,
}

/// `user-joined` / `user-left` data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPresence {
    pub username: String,
}

/// Decrypted chat line on its way to each recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub username: String,
    pub text: String,
}
