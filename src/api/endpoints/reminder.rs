use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::api::AppState;
use crate::reminder::{ReminderOutcome, ReminderReport};

#[derive(Debug, Serialize)]
pub struct ReminderEnvelope {
    pub success: bool,
    pub data: ReminderReport,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReminderErrorEnvelope {
    pub success: bool,
    pub error: &'static str,
    pub timestamp: String,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn error_envelope(status: StatusCode, error: &'static str) -> Response {
    let body = ReminderErrorEnvelope {
        success: false,
        error,
        timestamp: timestamp(),
    };
    (status, Json(body)).into_response()
}

fn respond(outcome: ReminderOutcome) -> Response {
    match outcome {
        ReminderOutcome::InternalError => {
            error_envelope(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        ReminderOutcome::Sent
        | ReminderOutcome::AlreadyHasProcedures
        | ReminderOutcome::AlreadyNotifiedToday
        | ReminderOutcome::DispatchFailed => Json(ReminderEnvelope {
            success: true,
            data: outcome.report(),
            timestamp: timestamp(),
        })
        .into_response(),
    }
}

/// `GET /api/cron/reminder`: scheduled trigger, behind the cron secret.
pub async fn scheduled(State(state): State<AppState>) -> Response {
    tracing::info!(at = %timestamp(), "scheduled reminder trigger");
    respond(state.reminder.decide_and_send(Utc::now()).await)
}

/// `GET|POST /api/reminder`: manual trigger.
pub async fn manual(State(state): State<AppState>) -> Response {
    tracing::info!("manual reminder trigger");
    respond(state.reminder.decide_and_send(Utc::now()).await)
}
