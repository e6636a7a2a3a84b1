pub mod service;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::shared::state::AppState;
use crate::store::StoreError;

pub use service::{login_uid, normalize_email, provisioned_uid, AuthService, CurrentUser, SignInResult};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or invalid session token")]
    Unauthorized,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::Unauthorized)?;
        state.auth.resolve(token).await.ok_or(AuthError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Optional; must be the id provisioned for `email`.
    pub uid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<SignInResult>, AuthError> {
    let result = state.auth.sign_up(&req.email, &req.password, req.uid).await?;
    Ok(Json(result))
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInResult>, AuthError> {
    let result = state.auth.sign_in(&req.email, &req.password).await?;
    Ok(Json(result))
}

pub async fn sign_in_anonymously(State(state): State<Arc<AppState>>) -> Json<SignInResult> {
    Json(state.auth.sign_in_anonymously().await)
}

pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthError> {
    let token = bearer_token(&headers).ok_or(AuthError::Unauthorized)?;
    let user = state.auth.resolve(token).await.ok_or(AuthError::Unauthorized)?;
    state.auth.sign_out(token).await;
    state.import_sessions.clear(&user.uid).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn me(user: CurrentUser) -> Json<CurrentUser> {
    Json(user)
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/anonymous", post(sign_in_anonymously))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/me", get(me))
}
