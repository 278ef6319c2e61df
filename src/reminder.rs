//! Once-per-day "no procedure logged today" reminder.
//!
//! [`ReminderWorkflow::decide_and_send`] resolves the current UTC day to
//! exactly one [`ReminderOutcome`]. The day's marker is written as a claim
//! before the email goes out and released again if dispatch fails, so the
//! unique `sent_on` column decides the winner between separate processes.
//! Inside one process a single-flight guard serializes triggers as well.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::mailer::{EmailMessage, Mailer};
use crate::models::ReminderMarker;

pub const REMINDER_SUBJECT: &str = "Reminder: no procedure logged today";

/// Half-open UTC calendar day `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn containing(now: DateTime<Utc>) -> Self {
        let day = now.date_naive();
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + chrono::Duration::days(1),
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Persistence operations the workflow needs and nothing more.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Number of procedures whose creation timestamp falls inside `window`.
    async fn count_created_in_range(&self, window: DayWindow) -> Result<i64, StoreError>;

    async fn find_marker_in_range(
        &self,
        window: DayWindow,
    ) -> Result<Option<ReminderMarker>, StoreError>;

    /// Claims the day of `sent_at`. Returns `None` when the day already has
    /// a marker.
    async fn insert_marker(
        &self,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<ReminderMarker>, StoreError>;

    /// Drops a claim whose email never went out.
    async fn release_marker(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    AlreadyHasProcedures,
    AlreadyNotifiedToday,
    Dispatched,
    DispatchFailed,
    InternalError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::AlreadyHasProcedures => "ALREADY_HAS_PROCEDURES",
            ReasonCode::AlreadyNotifiedToday => "ALREADY_NOTIFIED_TODAY",
            ReasonCode::Dispatched => "DISPATCHED",
            ReasonCode::DispatchFailed => "DISPATCH_FAILED",
            ReasonCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Sent,
    AlreadyHasProcedures,
    AlreadyNotifiedToday,
    DispatchFailed,
    InternalError,
}

impl ReminderOutcome {
    pub fn sent(&self) -> bool {
        matches!(self, ReminderOutcome::Sent)
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            ReminderOutcome::Sent => ReasonCode::Dispatched,
            ReminderOutcome::AlreadyHasProcedures => ReasonCode::AlreadyHasProcedures,
            ReminderOutcome::AlreadyNotifiedToday => ReasonCode::AlreadyNotifiedToday,
            ReminderOutcome::DispatchFailed => ReasonCode::DispatchFailed,
            ReminderOutcome::InternalError => ReasonCode::InternalError,
        }
    }

    pub fn report(&self) -> ReminderReport {
        ReminderReport {
            sent: self.sent(),
            reason: self.reason(),
        }
    }
}

/// Wire form of an outcome: `{"sent": bool, "reason": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub sent: bool,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone)]
pub struct ReminderSettings {
    pub recipient: String,
    pub app_url: String,
    pub dispatch_timeout: Duration,
}

pub struct ReminderWorkflow {
    store: Arc<dyn ReminderStore>,
    mailer: Arc<dyn Mailer>,
    settings: ReminderSettings,
    single_flight: Option<Mutex<()>>,
}

impl ReminderWorkflow {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        mailer: Arc<dyn Mailer>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            store,
            mailer,
            settings,
            single_flight: Some(Mutex::new(())),
        }
    }

    /// Same workflow with the in-process guard removed. Concurrent calls then
    /// rely on the store refusing a second claim for the same day.
    pub fn without_single_flight(mut self) -> Self {
        self.single_flight = None;
        self
    }

    pub async fn decide_and_send(&self, now: DateTime<Utc>) -> ReminderOutcome {
        let window = DayWindow::containing(now);
        let _guard = match &self.single_flight {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        match self.run(window, now).await {
            Ok(outcome) => {
                tracing::info!(
                    day = %window.day(),
                    sent = outcome.sent(),
                    reason = outcome.reason().as_str(),
                    "reminder decision"
                );
                outcome
            }
            Err(err) => {
                tracing::error!(day = %window.day(), error = %err, "reminder workflow failed");
                ReminderOutcome::InternalError
            }
        }
    }

    async fn run(
        &self,
        window: DayWindow,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome, StoreError> {
        let logged_today = self.store.count_created_in_range(window).await?;
        if logged_today > 0 {
            return Ok(ReminderOutcome::AlreadyHasProcedures);
        }

        if self.store.find_marker_in_range(window).await?.is_some() {
            return Ok(ReminderOutcome::AlreadyNotifiedToday);
        }

        let message = EmailMessage {
            to: self.settings.recipient.clone(),
            subject: REMINDER_SUBJECT.to_string(),
            html: render_reminder_html(window.day(), now, &self.settings.app_url),
        };

        let Some(claim) = self.store.insert_marker(now).await? else {
            tracing::info!(day = %window.day(), "reminder already claimed by another process");
            return Ok(ReminderOutcome::AlreadyNotifiedToday);
        };

        let timeout = self.settings.dispatch_timeout;
        let failure = match tokio::time::timeout(timeout, self.mailer.send(&message)).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("timed out after {timeout:?}")),
        };

        if let Some(reason) = failure {
            tracing::warn!(day = %window.day(), error = %reason, "reminder dispatch failed");
            self.store.release_marker(claim.id).await?;
            return Ok(ReminderOutcome::DispatchFailed);
        }

        Ok(ReminderOutcome::Sent)
    }
}

pub fn render_reminder_html(today: NaiveDate, now: DateTime<Utc>, app_url: &str) -> String {
    let mut html = String::new();

    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html lang=\"en\">");
    let _ = writeln!(html, "<head>");
    let _ = writeln!(html, "<meta charset=\"UTF-8\">");
    let _ = writeln!(html, "<title>Reminder - Procedure Control</title>");
    let _ = writeln!(
        html,
        "<style>body{{font-family:Arial,sans-serif;color:#333;max-width:600px;\
         margin:0 auto;padding:20px;background:#f4f4f4}}"
    );
    let _ = writeln!(
        html,
        ".container{{background:#fff;padding:30px;border-radius:10px}}"
    );
    let _ = writeln!(
        html,
        ".alert{{background:#fff3cd;border:1px solid #ffeaa7;color:#856404;\
         padding:15px;border-radius:5px}}"
    );
    let _ = writeln!(
        html,
        ".button{{display:inline-block;background:#007bff;color:#fff;\
         padding:12px 24px;text-decoration:none;border-radius:5px}}"
    );
    let _ = writeln!(
        html,
        ".footer{{text-align:center;border-top:1px solid #eee;padding-top:20px;\
         color:#666;font-size:14px}}</style>"
    );
    let _ = writeln!(html, "</head>");
    let _ = writeln!(html, "<body><div class=\"container\">");
    let _ = writeln!(html, "<h1>Procedure reminder</h1>");
    let _ = writeln!(
        html,
        "<p>This is an automatic reminder from <strong>Procedure Control</strong>.</p>"
    );
    let _ = writeln!(
        html,
        "<div class=\"alert\"><strong>Attention:</strong> \
         no procedures were logged today ({}).</div>",
        today.format("%d/%m/%Y")
    );
    let _ = writeln!(
        html,
        "<p>Remember to log your daily procedures to keep the record up to date.</p>"
    );
    let _ = writeln!(
        html,
        "<p style=\"text-align:center\">\
         <a href=\"{app_url}\" class=\"button\">Open Procedure Control</a></p>"
    );
    let _ = writeln!(html, "<div class=\"footer\">");
    let _ = writeln!(html, "<p>This email was sent automatically.</p>");
    let _ = writeln!(
        html,
        "<p>Sent at: {}</p>",
        now.format("%d/%m/%Y %H:%M:%S UTC")
    );
    let _ = writeln!(html, "</div></div></body></html>");

    html
}
