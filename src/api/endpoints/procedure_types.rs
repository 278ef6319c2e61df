use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::AppState;
use crate::db;
use crate::models::ProcedureType;

#[derive(Debug, Deserialize)]
pub struct NewProcedureType {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewProcedureType {
    /// Trimmed name and description, or an error when the name is blank.
    fn normalized(&self) -> Result<(&str, Option<&str>), ApiError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("name is required".into()));
        }
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        Ok((name, description))
    }
}

/// `GET /api/procedure-types`: active types by name.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ProcedureType>>, ApiError> {
    Ok(Json(db::list_active_types(&state.pool).await?))
}

/// `POST /api/procedure-types`
pub async fn create(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewProcedureType>,
) -> Result<(StatusCode, Json<ProcedureType>), ApiError> {
    let (name, description) = req.normalized()?;

    if db::type_name_exists(&state.pool, name).await? {
        return Err(ApiError::Conflict(format!(
            "a procedure type named {name:?} already exists"
        )));
    }

    let created = db::insert_type(&state.pool, name, description).await?;
    tracing::info!(type_id = %created.id, name = %created.name, "procedure type created");
    Ok((StatusCode::CREATED, Json(created)))
}
