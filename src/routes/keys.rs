/// Key endpoints: advertise the key policy and drive whichever handshake
/// the server is configured for.
use crate::config::{KeyExchangeScheme, KeyPolicy};
use crate::error::{AppError, AppResult};
use crate::middleware::guards::AuthenticatedUser;
use crate::services::PeerPublicKey;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use crypto_core::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    #[serde(rename = "type")]
    pub scheme: String,
    pub size: usize,
    /// Key lifetime in milliseconds
    pub expire_time: u64,
    pub encoding: String,
    pub exponent_bits: usize,
}

impl From<&KeyPolicy> for KeyInfo {
    fn from(policy: &KeyPolicy) -> Self {
        let size = match policy.scheme {
            KeyExchangeScheme::DiffieHellman => policy.dh_prime_bits,
            KeyExchangeScheme::Rsa => policy.key_size,
        };
        Self {
            scheme: policy.scheme.to_string(),
            size,
            expire_time: policy.expire_after.as_millis() as u64,
            encoding: policy.encoding().to_string(),
            exponent_bits: policy.dh_exponent_bits,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DhParametersResponse {
    /// Decimal
    pub p: String,
    pub g: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhCompleteResponse {
    pub big_a: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RsaExchangeResponse {
    #[serde(rename = "public-key")]
    pub public_key: String,
}

/// **Endpoint**: `GET /key/info`
#[get("/key/info")]
pub async fn key_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(KeyInfo::from(state.key_exchange.policy()))
}

/// Starts a Diffie–Hellman handshake for the caller.
///
/// **Endpoint**: `GET /key`
#[get("/key")]
pub async fn request_key(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> AppResult<HttpResponse> {
    let params = state.key_exchange.request_parameters(&user).await?;
    let g = params
        .g
        .to_u64()
        .ok_or_else(|| AppError::Server("generator does not fit in u64".into()))?;

    Ok(HttpResponse::Ok().json(DhParametersResponse {
        p: params.p.to_string(),
        g,
    }))
}

/// Finishes the handshake for the configured scheme and installs the
/// caller's cipher keys.
///
/// **Endpoint**: `POST /key`
#[post("/key")]
pub async fn submit_key(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    match state.key_exchange.policy().scheme {
        KeyExchangeScheme::DiffieHellman => {
            let big_b = body
                .get("bigB")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| AppError::KeyBad("bigB must be a decimal string".into()))?;
            let big_a = state.key_exchange.complete_diffie_hellman(&user, big_b).await?;
            tracing::info!(user = user.name(), "diffie-hellman key issued");

            Ok(HttpResponse::Ok().json(DhCompleteResponse {
                big_a: big_a.to_string(),
            }))
        }
        KeyExchangeScheme::Rsa => {
            let peer = parse_peer_key(&body)?;
            let public_key = state.key_exchange.exchange_rsa(&user, peer).await?;
            tracing::info!(user = user.name(), "rsa key issued");

            Ok(HttpResponse::Ok().json(RsaExchangeResponse { public_key }))
        }
    }
}

/// Accepts `{"public-key": "<PEM>"}` or `{"public-key": {"e": .., "n": [..]}}`.
pub fn parse_peer_key(body: &Value) -> AppResult<PeerPublicKey> {
    match body.get("public-key") {
        Some(Value::String(pem)) if !pem.trim().is_empty() => Ok(PeerPublicKey::Pem(pem.clone())),
        Some(Value::Object(components)) => {
            let e = match components.get("e") {
                Some(Value::Number(n)) => n.as_u64().map(BigUint::from),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| AppError::KeyBad("e must be a non-negative integer".into()))?;

            let n = components
                .get("n")
                .and_then(Value::as_array)
                .ok_or_else(|| AppError::KeyBad("n must be a byte array".into()))?
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| AppError::KeyBad("n must contain bytes 0..=255".into()))?;

            Ok(PeerPublicKey::Components { e, n })
        }
        _ => Err(AppError::KeyBad("public-key is missing".into())),
    }
}
