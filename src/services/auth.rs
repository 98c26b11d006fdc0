use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::services::user_registry::UserRegistry;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Maps a presented credential to a registered user.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: Option<&str>) -> AppResult<Arc<User>>;
}

/// Bearer token claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// User name
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 tokens whose subject must still be in the registry.
pub struct JwtAuthenticator {
    registry: Arc<UserRegistry>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl JwtAuthenticator {
    pub fn new(registry: Arc<UserRegistry>, secret: &str, ttl: Duration) -> Self {
        Self {
            registry,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: user.name().to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Server(format!("failed to sign token: {e}")))
    }

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AppError::AuthNo
            })
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> AppResult<Arc<User>> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::AuthNo)?;
        let claims = self.validate_token(token)?;
        self.registry.get(&claims.id)
    }
}

/// Pulls the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<UserRegistry>, JwtAuthenticator) {
        let registry = Arc::new(UserRegistry::new());
        let auth = JwtAuthenticator::new(registry.clone(), "test-secret", Duration::from_secs(60));
        (registry, auth)
    }

    #[test]
    fn test_issue_and_authenticate() {
        let (registry, auth) = setup();
        let alice = registry.add("alice").unwrap();
        let token = auth.issue_token(&alice).unwrap();
        let user = auth.authenticate(Some(&token)).unwrap();
        assert!(Arc::ptr_eq(&user, &alice));
    }

    #[test]
    fn test_missing_or_garbage_credential() {
        let (_registry, auth) = setup();
        assert_eq!(auth.authenticate(None).unwrap_err(), AppError::AuthNo);
        assert_eq!(auth.authenticate(Some("  ")).unwrap_err(), AppError::AuthNo);
        assert_eq!(auth.authenticate(Some("a.b.c")).unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (registry, auth) = setup();
        let alice = registry.add("alice").unwrap();
        let other = JwtAuthenticator::new(registry.clone(), "other", Duration::from_secs(60));
        let token = other.issue_token(&alice).unwrap();
        assert_eq!(auth.authenticate(Some(&token)).unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_expired_token_rejected() {
        let (registry, auth) = setup();
        registry.add("alice").unwrap();
        let now = Utc::now().timestamp();
        let token = auth
            .sign(&Claims {
                id: "alice".into(),
                iat: now - 120,
                exp: now - 60,
            })
            .unwrap();
        assert_eq!(auth.authenticate(Some(&token)).unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_deleted_user_rejected() {
        let (registry, auth) = setup();
        let alice = registry.add("alice").unwrap();
        let token = auth.issue_token(&alice).unwrap();
        registry.delete("alice").unwrap();
        assert_eq!(auth.authenticate(Some(&token)).unwrap_err(), AppError::AuthNo);
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
