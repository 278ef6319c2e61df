use axum::middleware::from_fn_with_state;
use axum::routing::{get, put};
use axum::Router;

use crate::api::endpoints::{auth, health, procedure_types, procedures, reminder};
use crate::api::middleware::require_cron_secret;
use crate::api::AppState;

/// All routes, nested under `/api`.
pub fn api_router(state: AppState) -> Router {
    let scheduled = Router::new()
        .route("/cron/reminder", get(reminder::scheduled))
        .route_layer(from_fn_with_state(state.clone(), require_cron_secret));

    let api = Router::new()
        .route("/health", get(health::check))
        .route("/auth/login", axum::routing::post(auth::login))
        .route("/procedures", get(procedures::list).post(procedures::create))
        .route("/procedures/stats", get(procedures::stats))
        .route(
            "/procedures/:id",
            put(procedures::update).delete(procedures::remove),
        )
        .route(
            "/procedure-types",
            get(procedure_types::list).post(procedure_types::create),
        )
        .route("/reminder", get(reminder::manual).post(reminder::manual))
        .merge(scheduled);

    Router::new().nest("/api", api).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::db::StoreError;
    use crate::mailer::{EmailMessage, MailError, Mailer};
    use crate::models::ReminderMarker;
    use crate::reminder::{DayWindow, ReminderSettings, ReminderStore, ReminderWorkflow};

    struct FixedStore {
        procedures_today: i64,
        broken: bool,
        day_claimed: bool,
    }

    #[async_trait]
    impl ReminderStore for FixedStore {
        async fn count_created_in_range(&self, _window: DayWindow) -> Result<i64, StoreError> {
            if self.broken {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(self.procedures_today)
        }

        async fn find_marker_in_range(
            &self,
            _window: DayWindow,
        ) -> Result<Option<ReminderMarker>, StoreError> {
            Ok(None)
        }

        async fn insert_marker(
            &self,
            sent_at: DateTime<Utc>,
        ) -> Result<Option<ReminderMarker>, StoreError> {
            if self.day_claimed {
                return Ok(None);
            }
            Ok(Some(ReminderMarker {
                id: uuid::Uuid::new_v4(),
                sent_at,
                sent_on: sent_at.date_naive(),
            }))
        }

        async fn release_marker(&self, _id: uuid::Uuid) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingMailer {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_state(store: FixedStore, cron_secret: Option<&str>) -> (AppState, Arc<CountingMailer>) {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/procedure_control_test")
            .unwrap();
        let mailer = Arc::new(CountingMailer::default());
        let workflow = ReminderWorkflow::new(
            Arc::new(store),
            mailer.clone(),
            ReminderSettings {
                recipient: "clinic@example.com".into(),
                app_url: "https://procedures.example.com".into(),
                dispatch_timeout: Duration::from_secs(5),
            },
        );
        let state = AppState::new(pool, Arc::new(workflow), cron_secret.map(String::from));
        (state, mailer)
    }

    fn quiet_day() -> FixedStore {
        FixedStore {
            procedures_today: 0,
            broken: false,
            day_claimed: false,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn cron_without_secret_header_is_401() {
        let (state, mailer) = test_state(quiet_day(), Some("s3cret"));
        let response = api_router(state)
            .oneshot(Request::get("/api/cron/reminder").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unauthorized");
        assert!(json["timestamp"].is_string());
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cron_with_wrong_secret_is_401() {
        let (state, _) = test_state(quiet_day(), Some("s3cret"));
        let response = api_router(state)
            .oneshot(
                Request::get("/api/cron/reminder")
                    .header("Authorization", "Bearer guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cron_is_closed_when_no_secret_is_configured() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::get("/api/cron/reminder")
                    .header("Authorization", "Bearer ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cron_with_secret_runs_the_workflow() {
        let (state, mailer) = test_state(quiet_day(), Some("s3cret"));
        let response = api_router(state)
            .oneshot(
                Request::get("/api/cron/reminder")
                    .header("Authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["sent"], true);
        assert_eq!(json["data"]["reason"], "DISPATCHED");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manual_trigger_reports_skip_reason() {
        let (state, mailer) = test_state(
            FixedStore {
                procedures_today: 2,
                ..quiet_day()
            },
            None,
        );
        let response = api_router(state)
            .oneshot(Request::post("/api/reminder").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["sent"], false);
        assert_eq!(json["data"]["reason"], "ALREADY_HAS_PROCEDURES");
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn internal_error_maps_to_500() {
        let (state, mailer) = test_state(
            FixedStore {
                broken: true,
                ..quiet_day()
            },
            None,
        );
        let response = api_router(state)
            .oneshot(Request::get("/api/reminder").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn login_requires_username_and_password() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::post("/api/auth/login")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"username":"ana"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn blank_procedure_type_name_is_rejected() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::post("/api/procedure-types")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"name":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_procedure_id_is_rejected() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::delete("/api/procedures/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert!(json["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn malformed_procedure_date_gets_the_error_envelope() {
        let (state, _) = test_state(quiet_day(), None);
        let id = uuid::Uuid::new_v4();
        let body = format!(r#"{{"procedureTypeId":"{id}","date":"14/03/2026"}}"#);
        let response = api_router(state)
            .oneshot(
                Request::put(format!("/api/procedures/{id}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn unparseable_login_body_gets_the_error_envelope() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::post("/api/auth/login")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn non_numeric_stats_limit_gets_the_error_envelope() {
        let (state, _) = test_state(quiet_day(), None);
        let response = api_router(state)
            .oneshot(
                Request::get("/api/procedures/stats?limit=many")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn lost_day_claim_reports_already_notified() {
        let (state, mailer) = test_state(
            FixedStore {
                day_claimed: true,
                ..quiet_day()
            },
            Some("s3cret"),
        );
        let response = api_router(state)
            .oneshot(
                Request::get("/api/cron/reminder")
                    .header("Authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["sent"], false);
        assert_eq!(json["data"]["reason"], "ALREADY_NOTIFIED_TODAY");
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 0);
    }
}
