use crate::error::AppError;
use dotenvy::dotenv;
use serde::Serialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How clients obtain their cipher keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyExchangeScheme {
    #[serde(rename = "diffie-hellman")]
    DiffieHellman,
    #[serde(rename = "rsa")]
    Rsa,
}

impl KeyExchangeScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyExchangeScheme::DiffieHellman => "diffie-hellman",
            KeyExchangeScheme::Rsa => "rsa",
        }
    }
}

impl fmt::Display for KeyExchangeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyExchangeScheme {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diffie-hellman" | "dh" => Ok(KeyExchangeScheme::DiffieHellman),
            "rsa" => Ok(KeyExchangeScheme::Rsa),
            other => Err(AppError::Config(format!(
                "KEY_EXCHANGE_SCHEME must be diffie-hellman or rsa, got {other}"
            ))),
        }
    }
}

/// Everything the key endpoints and the expiry scheduler need to agree on.
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    pub scheme: KeyExchangeScheme,
    /// RSA modulus size, for both the peer key and the generated server key
    pub key_size: usize,
    pub dh_prime_bits: usize,
    pub dh_exponent_bits: usize,
    pub expire_after: Duration,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            scheme: KeyExchangeScheme::DiffieHellman,
            key_size: 4096,
            dh_prime_bits: 512,
            dh_exponent_bits: crypto_core::diffie_hellman::DEFAULT_EXPONENT_BITS,
            expire_after: Duration::from_secs(600),
        }
    }
}

impl KeyPolicy {
    /// Encoding label reported by `GET /key/info`.
    pub fn encoding(&self) -> &'static str {
        match self.scheme {
            KeyExchangeScheme::DiffieHellman => "decimal",
            KeyExchangeScheme::Rsa => "pkcs1-pem",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub chat_path: String,
    pub keys: KeyPolicy,
}

impl Config {
    /// Defaults for everything but the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 3000,
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::from_secs(86_400),
            chat_path: "/chat".to_string(),
            keys: KeyPolicy::default(),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;
        let mut cfg = Self::new(jwt_secret);

        cfg.port = parse_var(&lookup, "PORT", cfg.port)?;
        cfg.token_ttl = Duration::from_secs(parse_var(
            &lookup,
            "TOKEN_TTL_SECONDS",
            cfg.token_ttl.as_secs(),
        )?);

        if let Some(path) = lookup("CHAT_PATH") {
            if !path.starts_with('/') {
                return Err(AppError::Config(format!(
                    "CHAT_PATH must start with '/', got {path}"
                )));
            }
            cfg.chat_path = path;
        }

        if let Some(scheme) = lookup("KEY_EXCHANGE_SCHEME") {
            cfg.keys.scheme = scheme.parse()?;
        }
        cfg.keys.key_size = parse_var(&lookup, "KEY_SIZE", cfg.keys.key_size)?;
        cfg.keys.dh_prime_bits = parse_var(&lookup, "DH_PRIME_BITS", cfg.keys.dh_prime_bits)?;
        cfg.keys.dh_exponent_bits =
            parse_var(&lookup, "DH_EXPONENT_BITS", cfg.keys.dh_exponent_bits)?;
        cfg.keys.expire_after = Duration::from_secs(parse_var(
            &lookup,
            "KEY_EXPIRE_SECONDS",
            cfg.keys.expire_after.as_secs(),
        )?);

        if cfg.keys.dh_exponent_bits == 0 {
            return Err(AppError::Config("DH_EXPONENT_BITS must be positive".into()));
        }
        if cfg.keys.expire_after.is_zero() {
            return Err(AppError::Config("KEY_EXPIRE_SECONDS must be positive".into()));
        }

        Ok(cfg)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name}={raw}: {e}"))),
    }
}
