use crate::{
    app::AppState,
    domain::errors::ApiError,
    utils::jwt::{decode_auth_token, generate_auth_token},
};
use axum::{
    extract::State,
    headers::{authorization::Bearer, Authorization},
    http::Request,
    middleware::Next,
    response::Response,
    Json, TypedHeader,
};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    client_id: String,
    api_key: Secret<String>,
}

#[derive(Serialize)]
pub struct AuthenticateResponse {
    token: String,
}

impl From<String> for AuthenticateResponse {
    fn from(token: String) -> Self {
        Self { token }
    }
}

/// Exchanges the adapter's api key for a bearer token.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    tracing::info!("authenticating client >>> {}", payload.client_id);

    if payload.api_key.expose_secret() != state.config.bot.api_key.expose_secret() {
        tracing::warn!("client {} sent a wrong api key", payload.client_id);
        return Err(ApiError::AuthenticationError);
    }

    let token = generate_auth_token(&payload.client_id, &state.config.jwt)?;
    Ok(Json(token.into()))
}

pub async fn check_auth<B>(
    State(state): State<Arc<AppState>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    let TypedHeader(auth) = auth.ok_or(ApiError::AuthenticationError)?;
    let claims = decode_auth_token(auth.token(), &state.config.jwt)?;
    tracing::debug!("request from client >>> {}", claims.sub);

    Ok(next.run(request).await)
}
