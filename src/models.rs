use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureTypeRef {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// A logged procedure joined with its type and the user who recorded it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureRecord {
    pub id: Uuid,
    pub procedure_type_id: Uuid,
    pub user_id: Uuid,
    pub performed_on: NaiveDate,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub procedure_type: ProcedureTypeRef,
    pub user: UserRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProcedure {
    pub procedure_type_id: Uuid,
    pub user_id: Uuid,
    pub performed_on: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureUpdate {
    pub procedure_type_id: Uuid,
    #[serde(rename = "date")]
    pub performed_on: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub type_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcedureStats {
    pub total: i64,
    pub top: Vec<TypeCount>,
}

/// Credentials row. Only the store and auth layers see the hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: UserRef,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderMarker {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub sent_on: NaiveDate,
}
