//! JSON HTTP API.
//!
//! Procedures, procedure types and login are plain CRUD over the Postgres
//! pool. The reminder routes drive the shared [`ReminderWorkflow`]; the
//! scheduled one is guarded by the cron secret.

pub mod endpoints;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod router;

use std::sync::Arc;

use sqlx::PgPool;

use crate::reminder::ReminderWorkflow;

pub use router::api_router;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub reminder: Arc<ReminderWorkflow>,
    pub cron_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(pool: PgPool, reminder: Arc<ReminderWorkflow>, cron_secret: Option<String>) -> Self {
        Self {
            pool,
            reminder,
            cron_secret: cron_secret.map(Arc::from),
        }
    }
}
