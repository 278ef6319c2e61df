//! Shared-secret guard for the scheduled reminder trigger.
//!
//! Expects `Authorization: Bearer <CRON_SECRET>`. With no secret configured
//! every request is rejected.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::api::endpoints::reminder::error_envelope;
use crate::api::AppState;

pub async fn require_cron_secret(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match (state.cron_secret.as_deref(), presented) {
        (Some(expected), Some(token)) => token.as_bytes().ct_eq(expected.as_bytes()).into(),
        _ => false,
    };

    if !authorized {
        tracing::warn!("rejected scheduled reminder call with missing or wrong secret");
        return error_envelope(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    next.run(req).await
}
