use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use crypto_core::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        error_handling::status_of(self)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("not authenticated")]
    AuthNo,

    #[error("user name is empty")]
    AuthEmptyName,

    #[error("user name is already taken")]
    AuthDuplicateName,

    #[error("bad key: {0}")]
    KeyBad(String),

    #[error("key size mismatch: expected {expected} bits, got {actual}")]
    KeySize { expected: usize, actual: usize },

    #[error("bad message: {0}")]
    MsgBad(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal server error: {0}")]
    Server(String),
}

impl From<CryptoError> for AppError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidArgument(msg) => AppError::InvalidArgument(msg),
            CryptoError::KeyBad(msg) => AppError::KeyBad(msg),
            CryptoError::KeySize { expected, actual } => AppError::KeySize { expected, actual },
            CryptoError::MsgBad(msg) => AppError::MsgBad(msg),
            CryptoError::Server(msg) => AppError::Server(msg),
        }
    }
}

/// `{code, message}` as sent over HTTP and in `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthNo => "AUTH_NO",
            AppError::AuthEmptyName => "AUTH_EMPTY_NAME",
            AppError::AuthDuplicateName => "AUTH_DUPLICATE_NAME",
            AppError::KeyBad(_) => "KEY_BAD",
            AppError::KeySize { .. } => "KEY_SIZE",
            AppError::MsgBad(_) => "MSG_BAD",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::Server(_) | AppError::Config(_) | AppError::StartServer(_) => "SERVER",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::AuthNo => 401,
            AppError::AuthEmptyName
            | AppError::AuthDuplicateName
            | AppError::KeyBad(_)
            | AppError::KeySize { .. }
            | AppError::MsgBad(_)
            | AppError::InvalidArgument(_) => 400,
            AppError::Server(_) | AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500
    }

    /// Internal details never leave the process.
    pub fn payload(&self) -> ErrorPayload {
        let message = if self.is_internal() {
            String::new()
        } else {
            self.to_string()
        };
        ErrorPayload {
            code: self.code().to_string(),
            message,
        }
    }
}
