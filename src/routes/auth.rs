/// Identity endpoints: register a user name and receive a bearer token,
/// or drop the registration again.
use crate::error::AppResult;
use crate::middleware::guards::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{delete, get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[get("/status")]
pub async fn status() -> HttpResponse {
    HttpResponse::Ok().json(json!({}))
}

/// **Endpoint**: `POST /auth`
#[post("/auth")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    let user = state.registry.add(&body.username)?;
    let token = state.authenticator.issue_token(&user)?;
    tracing::debug!(user = user.name(), "token issued");

    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

/// Removes the caller from the registry. Any pending key expiration goes
/// with it.
///
/// **Endpoint**: `DELETE /auth`
#[delete("/auth")]
pub async fn deregister(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> AppResult<HttpResponse> {
    state.registry.delete(user.name())?;

    Ok(HttpResponse::Ok().json(json!({})))
}
