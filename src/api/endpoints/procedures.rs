use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::AppState;
use crate::db;
use crate::models::{NewProcedure, ProcedureRecord, ProcedureStats, ProcedureUpdate};

const DEFAULT_TOP_LIMIT: i64 = 3;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub limit: Option<i64>,
}

/// Trims a note and drops it when empty.
fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

async fn require_active_type(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    match db::find_type(&state.pool, id).await? {
        Some(t) if t.active => Ok(()),
        _ => Err(ApiError::BadRequest("procedure type not found".into())),
    }
}

/// `GET /api/procedures`
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ProcedureRecord>>, ApiError> {
    Ok(Json(db::list_procedures(&state.pool).await?))
}

/// `POST /api/procedures`
pub async fn create(
    State(state): State<AppState>,
    ApiJson(mut new): ApiJson<NewProcedure>,
) -> Result<(StatusCode, Json<ProcedureRecord>), ApiError> {
    new.note = clean_note(new.note);
    require_active_type(&state, new.procedure_type_id).await?;
    if !db::user_exists(&state.pool, new.user_id).await? {
        return Err(ApiError::BadRequest("user not found".into()));
    }

    let record = db::insert_procedure(&state.pool, &new).await?;
    tracing::info!(
        procedure_id = %record.id,
        performed_on = %record.performed_on,
        "procedure logged"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /api/procedures/:id`
pub async fn update(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(mut update): ApiJson<ProcedureUpdate>,
) -> Result<Json<ProcedureRecord>, ApiError> {
    if db::find_procedure(&state.pool, id).await?.is_none() {
        return Err(ApiError::NotFound("procedure not found".into()));
    }
    require_active_type(&state, update.procedure_type_id).await?;
    update.note = clean_note(update.note);

    let record = db::update_procedure(&state.pool, id, &update)
        .await?
        .ok_or_else(|| ApiError::NotFound("procedure not found".into()))?;
    tracing::info!(procedure_id = %id, "procedure updated");
    Ok(Json(record))
}

/// `DELETE /api/procedures/:id`
pub async fn remove(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !db::delete_procedure(&state.pool, id).await? {
        return Err(ApiError::NotFound("procedure not found".into()));
    }
    tracing::info!(procedure_id = %id, "procedure deleted");
    Ok(Json(MessageResponse {
        message: "procedure deleted",
    }))
}

/// `GET /api/procedures/stats?limit=N`
pub async fn stats(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StatsQuery>,
) -> Result<Json<ProcedureStats>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    if limit < 1 {
        return Err(ApiError::BadRequest("limit must be positive".into()));
    }
    Ok(Json(db::procedure_stats(&state.pool, limit).await?))
}
