use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    NewProcedure, ProcedureRecord, ProcedureStats, ProcedureType, ProcedureTypeRef,
    ProcedureUpdate, ReminderMarker, TypeCount, UserCredentials, UserRef,
};
use crate::reminder::{DayWindow, ReminderStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} already exists")]
    Conflict(String),
}

fn conflict_or(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let types = [
        ("Consultation", Some("Outpatient consultation")),
        ("Dressing change", Some("Wound care and dressing replacement")),
        ("Suture", Some("Wound closure")),
        ("Suture removal", None),
        ("Injection", Some("Intramuscular or subcutaneous administration")),
    ];

    let mut inserted = 0usize;
    for (name, description) in types {
        let result = sqlx::query(
            r#"
            INSERT INTO procedure_control.procedure_types (id, name, description, active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

const PROCEDURE_SELECT: &str = "SELECT p.id, p.procedure_type_id, p.user_id, \
     p.performed_on, p.note, p.created_at, p.updated_at, \
     t.name AS type_name, t.description AS type_description, \
     u.name AS user_name, u.email AS user_email \
     FROM procedure_control.procedures p \
     JOIN procedure_control.procedure_types t ON t.id = p.procedure_type_id \
     JOIN procedure_control.users u ON u.id = p.user_id";

fn procedure_from_row(row: &PgRow) -> Result<ProcedureRecord, sqlx::Error> {
    let procedure_type_id: Uuid = row.try_get("procedure_type_id")?;
    let user_id: Uuid = row.try_get("user_id")?;
    Ok(ProcedureRecord {
        id: row.try_get("id")?,
        procedure_type_id,
        user_id,
        performed_on: row.try_get("performed_on")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        procedure_type: ProcedureTypeRef {
            id: procedure_type_id,
            name: row.try_get("type_name")?,
            description: row.try_get("type_description")?,
        },
        user: UserRef {
            id: user_id,
            name: row.try_get("user_name")?,
            email: row.try_get("user_email")?,
        },
    })
}

pub async fn list_procedures(pool: &PgPool) -> Result<Vec<ProcedureRecord>, StoreError> {
    let query = format!("{PROCEDURE_SELECT} ORDER BY p.performed_on DESC, p.created_at DESC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut procedures = Vec::with_capacity(rows.len());
    for row in rows {
        procedures.push(procedure_from_row(&row)?);
    }
    Ok(procedures)
}

pub async fn find_procedure(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<ProcedureRecord>, StoreError> {
    let query = format!("{PROCEDURE_SELECT} WHERE p.id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(procedure_from_row).transpose()?)
}

pub async fn insert_procedure(
    pool: &PgPool,
    new: &NewProcedure,
) -> Result<ProcedureRecord, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO procedure_control.procedures
        (id, procedure_type_id, user_id, performed_on, note)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(new.procedure_type_id)
    .bind(new.user_id)
    .bind(new.performed_on)
    .bind(&new.note)
    .execute(pool)
    .await?;

    find_procedure(pool, id)
        .await?
        .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
}

/// Returns `None` when no procedure has `id`.
pub async fn update_procedure(
    pool: &PgPool,
    id: Uuid,
    update: &ProcedureUpdate,
) -> Result<Option<ProcedureRecord>, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE procedure_control.procedures
        SET procedure_type_id = $2, performed_on = $3, note = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(update.procedure_type_id)
    .bind(update.performed_on)
    .bind(&update.note)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    find_procedure(pool, id).await
}

pub async fn delete_procedure(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM procedure_control.procedures WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn procedure_stats(pool: &PgPool, limit: i64) -> Result<ProcedureStats, StoreError> {
    let total: i64 = sqlx::query("SELECT count(*) AS total FROM procedure_control.procedures")
        .fetch_one(pool)
        .await?
        .try_get("total")?;

    let rows = sqlx::query(
        r#"
        SELECT COALESCE(t.name, 'Unknown') AS type_name, count(*) AS total
        FROM procedure_control.procedures p
        LEFT JOIN procedure_control.procedure_types t ON t.id = p.procedure_type_id
        GROUP BY p.procedure_type_id, t.name
        ORDER BY total DESC, type_name ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut top = Vec::with_capacity(rows.len());
    for row in rows {
        top.push(TypeCount {
            type_name: row.try_get("type_name")?,
            count: row.try_get("total")?,
        });
    }

    Ok(ProcedureStats { total, top })
}

fn procedure_type_from_row(row: &PgRow) -> Result<ProcedureType, sqlx::Error> {
    Ok(ProcedureType {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
    })
}

pub async fn list_active_types(pool: &PgPool) -> Result<Vec<ProcedureType>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, description, active
        FROM procedure_control.procedure_types
        WHERE active
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut types = Vec::with_capacity(rows.len());
    for row in rows {
        types.push(procedure_type_from_row(&row)?);
    }
    Ok(types)
}

pub async fn find_type(pool: &PgPool, id: Uuid) -> Result<Option<ProcedureType>, StoreError> {
    let row = sqlx::query(
        "SELECT id, name, description, active FROM procedure_control.procedure_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(procedure_type_from_row).transpose()?)
}

pub async fn type_name_exists(pool: &PgPool, name: &str) -> Result<bool, StoreError> {
    let row = sqlx::query(
        "SELECT 1 AS found FROM procedure_control.procedure_types WHERE lower(name) = lower($1)",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Inserts a type. A case-insensitive name clash yields [`StoreError::Conflict`].
pub async fn insert_type(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
) -> Result<ProcedureType, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO procedure_control.procedure_types (id, name, description, active)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id, name, description, active
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .map_err(|err| conflict_or(err, "procedure type"))?;

    Ok(procedure_type_from_row(&row)?)
}

pub async fn user_exists(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 AS found FROM procedure_control.users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Active user whose email (case-insensitive) or display name equals `login`.
pub async fn find_credentials(
    pool: &PgPool,
    login: &str,
) -> Result<Option<UserCredentials>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, password_hash
        FROM procedure_control.users
        WHERE (email = lower($1) OR name = $1) AND active
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(login)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(UserCredentials {
        user: UserRef {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        },
        password_hash: row.try_get("password_hash")?,
    }))
}

pub async fn insert_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<UserRef, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO procedure_control.users (id, name, email, password_hash, active)
        VALUES ($1, $2, lower($3), $4, TRUE)
        RETURNING id, name, email
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await
    .map_err(|err| conflict_or(err, "user"))?;

    Ok(UserRef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}

/// Postgres-backed reminder log. The `sent_on` unique constraint keeps one
/// marker per UTC day even across processes.
#[derive(Clone)]
pub struct PgReminderStore {
    pool: PgPool,
}

impl PgReminderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn marker_from_row(row: &PgRow) -> Result<ReminderMarker, sqlx::Error> {
    Ok(ReminderMarker {
        id: row.try_get("id")?,
        sent_at: row.try_get("sent_at")?,
        sent_on: row.try_get("sent_on")?,
    })
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn count_created_in_range(&self, window: DayWindow) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query(
            r#"
            SELECT count(*) AS total
            FROM procedure_control.procedures
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;
        Ok(count)
    }

    async fn find_marker_in_range(
        &self,
        window: DayWindow,
    ) -> Result<Option<ReminderMarker>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, sent_at, sent_on
            FROM procedure_control.reminder_emails
            WHERE sent_at >= $1 AND sent_at < $2
            ORDER BY sent_at ASC
            LIMIT 1
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(marker_from_row).transpose()?)
    }

    async fn insert_marker(
        &self,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<ReminderMarker>, StoreError> {
        let sent_on: NaiveDate = sent_at.date_naive();
        let row = sqlx::query(
            r#"
            INSERT INTO procedure_control.reminder_emails (id, sent_at, sent_on)
            VALUES ($1, $2, $3)
            ON CONFLICT (sent_on) DO NOTHING
            RETURNING id, sent_at, sent_on
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sent_at)
        .bind(sent_on)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(marker_from_row).transpose()?)
    }

    async fn release_marker(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM procedure_control.reminder_emails WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_select_joins_type_and_user() {
        assert!(PROCEDURE_SELECT.contains("JOIN procedure_control.procedure_types t"));
        assert!(PROCEDURE_SELECT.contains("JOIN procedure_control.users u"));
        assert!(PROCEDURE_SELECT.ends_with("ON u.id = p.user_id"));
    }

    #[test]
    fn non_unique_errors_pass_through() {
        let err = conflict_or(sqlx::Error::RowNotFound, "user");
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
