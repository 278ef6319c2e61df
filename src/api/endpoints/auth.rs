use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::AppState;
use crate::auth;
use crate::db;
use crate::models::UserRef;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserRef,
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.as_deref().map(str::trim).unwrap_or_default();
    let password = req.password.unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".into(),
        ));
    }

    let Some(credentials) = db::find_credentials(&state.pool, username).await? else {
        tracing::info!(login = username, "login rejected: unknown user");
        return Err(ApiError::InvalidCredentials);
    };

    let hash = credentials.password_hash;
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|err| ApiError::Internal(format!("password check panicked: {err}")))?;

    if !verified {
        tracing::info!(login = username, "login rejected: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    tracing::info!(user_id = %credentials.user.id, "login succeeded");
    Ok(Json(LoginResponse {
        success: true,
        user: credentials.user,
    }))
}
