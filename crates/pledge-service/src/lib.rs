#![deny(unsafe_code)]

mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use pledge_adapters::{simulated_registry, LogVerificationMailer, DEFAULT_EMAIL_DOMAIN};
use pledge_core::{PledgeEngine, PledgeEngineConfig, PledgeError};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine: PledgeEngineConfig,
    /// Domain used for simulated email recipients.
    pub email_domain: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: PledgeEngineConfig::default(),
            email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<PledgeEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, PledgeError> {
        let engine = PledgeEngine::bootstrap(
            config.engine,
            simulated_registry(&config.email_domain),
            Arc::new(LogVerificationMailer),
        )
        .await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/placeholders", get(handlers::placeholders))
        // Accounts
        .route("/v1/registrations", post(handlers::submit_registration))
        .route("/v1/registrations/resend", post(handlers::resend_verification))
        .route("/v1/registrations/verify/:token", get(handlers::verify_registration))
        .route("/v1/auth/login", post(handlers::login))
        .route("/v1/users/:user_id", axum::routing::delete(handlers::delete_account))
        // Events
        .route(
            "/v1/users/:user_id/events",
            get(handlers::list_events).post(handlers::create_event),
        )
        .route(
            "/v1/users/:user_id/events/:event_id",
            get(handlers::get_event).patch(handlers::update_event),
        )
        .route("/v1/users/:user_id/selected-event", get(handlers::selected_event))
        .route("/v1/events/:event_id/summary", get(handlers::event_summary))
        .route("/v1/events/:event_id/pledges", get(handlers::list_event_pledges))
        .route("/v1/events/:event_id/reminders/auto", post(handlers::auto_reminders))
        .route("/v1/events/:event_id/reminders/overview", get(handlers::reminder_overview))
        .route("/v1/reminders/custom", post(handlers::custom_reminders))
        // Pledges
        .route("/v1/pledges", post(handlers::create_pledge))
        .route(
            "/v1/pledges/:pledge_id",
            get(handlers::get_pledge)
                .patch(handlers::update_pledge)
                .delete(handlers::delete_pledge),
        )
        .route("/v1/pledges/:pledge_id/status", put(handlers::set_pledge_status))
        .route("/v1/pledges/:pledge_id/whatsapp", put(handlers::set_pledge_whatsapp))
        .route("/v1/pledges/:pledge_id/transactions", get(handlers::pledge_transactions))
        .route(
            "/v1/pledges/:pledge_id/messages",
            get(handlers::pledge_messages).post(handlers::message_pledge),
        )
        // Transactions
        .route(
            "/v1/transactions",
            get(handlers::list_transactions).post(handlers::record_transaction),
        )
        .route("/v1/transactions/:transaction_id", get(handlers::get_transaction))
        // Messages
        .route(
            "/v1/messages",
            get(handlers::list_messages).post(handlers::queue_message),
        )
        .route("/v1/messages/:message_id", get(handlers::get_message))
        .route("/v1/messages/:message_id/status", put(handlers::set_message_status))
        .route("/v1/messages/:message_id/send", post(handlers::send_message))
        .route("/v1/message-queue", get(handlers::queue_status))
        .route("/v1/message-queue/process", post(handlers::process_queue))
        // Templates
        .route(
            "/v1/templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route(
            "/v1/templates/:template_id",
            get(handlers::get_template)
                .put(handlers::update_template)
                .delete(handlers::delete_template),
        )
        .route("/v1/templates/:template_id/toggle", post(handlers::toggle_template))
        .route("/v1/stats", get(handlers::dashboard_stats))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] PledgeError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Http { status, .. } => *status,
            ApiError::Core(err) => match err {
                PledgeError::NotFound { .. } | PledgeError::ChannelNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                PledgeError::Conflict(_) => StatusCode::CONFLICT,
                PledgeError::Validation { .. } => StatusCode::BAD_REQUEST,
                PledgeError::Expired(_) => StatusCode::GONE,
                PledgeError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                PledgeError::Unverified(_) => StatusCode::FORBIDDEN,
                PledgeError::ChannelFailure { .. }
                | PledgeError::Storage(_)
                | PledgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let ApiError::Core(PledgeError::Validation { field, .. }) = &self {
            body["field"] = serde_json::Value::from(*field);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pledge_core::RegistrationConfig;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> (ServiceState, Router) {
        let mut config = ServiceConfig::default();
        config.engine.registration = RegistrationConfig {
            password_rounds: 3,
            ..RegistrationConfig::default()
        };
        config.engine.dispatch.send_delay = Duration::from_millis(1);
        let state = ServiceState::bootstrap(config).await.unwrap();
        let router = build_router(state.clone());
        (state, router)
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Registers, verifies and returns `(user_id, event_id)`.
    async fn signed_up(state: &ServiceState, router: &Router) -> (i64, i64) {
        let (status, _) = call(
            router,
            "POST",
            "/v1/registrations",
            Some(json!({
                "full_name": "Amani Mushi",
                "email": "amani@example.com",
                "password": "kilimanjaro",
                "mobile_number": "0712345678",
                "event_name": "Harusi ya Amani",
                "privacy_agreement_accepted": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let token = pending_token(state, "amani@example.com").await;
        let uri = format!("/v1/registrations/verify/{token}");
        let (status, body) = call(router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["event"]["id"].as_i64().unwrap(),
        )
    }

    async fn pending_token(state: &ServiceState, email: &str) -> String {
        use pledge_core::store::RegistrationStore;
        state
            .engine
            .store()
            .find_pending_registration_by_email(email)
            .await
            .unwrap()
            .unwrap()
            .verification_token
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let (_, router) = app().await;
        let (status, body) = call(&router, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage_backend"], "memory");
    }

    #[tokio::test]
    async fn registration_login_and_event_scoping() {
        let (state, router) = app().await;
        let (user_id, event_id) = signed_up(&state, &router).await;

        let (status, body) = call(
            &router,
            "POST",
            "/v1/auth/login",
            Some(json!({ "email": "amani@example.com", "password": "kilimanjaro" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"].as_i64(), Some(user_id));
        assert!(body.get("password_hash").is_none());

        let (status, _) = call(
            &router,
            "POST",
            "/v1/auth/login",
            Some(json!({ "email": "amani@example.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &router,
            "GET",
            &format!("/v1/users/{user_id}/selected-event"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"].as_i64(), Some(event_id));

        let (status, _) = call(&router, "GET", "/v1/users/999/events/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn payments_drive_pledge_status() {
        let (state, router) = app().await;
        let (_, event_id) = signed_up(&state, &router).await;

        let (status, pledge) = call(
            &router,
            "POST",
            "/v1/pledges",
            Some(json!({
                "event_id": event_id,
                "name": "Baraka Mollel",
                "mobile_number": "0754123456",
                "pledge_amount": 100_000
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(pledge["status"], "new");
        let pledge_id = pledge["id"].as_i64().unwrap();

        let (status, body) = call(
            &router,
            "POST",
            "/v1/transactions",
            Some(json!({ "pledge_id": pledge_id, "amount": 40_000, "method": "cash" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pledge"]["status"], "partial");
        assert_eq!(body["pledge"]["balance"], 60_000);
        assert_eq!(body["pledge"]["balance_display"], "TSH 600");
        assert!(body["transaction"]["transaction_id"]
            .as_str()
            .unwrap()
            .starts_with("CASH-"));

        let (status, _) = call(
            &router,
            "POST",
            "/v1/transactions",
            Some(json!({ "pledge_id": pledge_id, "amount": 60_000, "method": "mpesa" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            "POST",
            "/v1/transactions",
            Some(json!({
                "pledge_id": pledge_id,
                "amount": 60_000,
                "method": "mpesa",
                "transaction_id": "QK71ABCD"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pledge"]["status"], "completed");

        let (status, _) = call(
            &router,
            "POST",
            "/v1/transactions",
            Some(json!({
                "pledge_id": pledge_id,
                "amount": 1,
                "method": "mpesa",
                "transaction_id": "QK71ABCD"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/v1/events/{event_id}/summary");
        let (_, summary) = call(&router, "GET", &uri, None).await;
        assert_eq!(summary["total_paid"], 100_000);
        assert_eq!(summary["recent_transactions"].as_array().unwrap().len(), 2);

        let uri = format!("/v1/events/{event_id}/pledges?status=completed");
        let (_, page) = call(&router, "GET", &uri, None).await;
        assert_eq!(page["total"], 1);
    }

    #[tokio::test]
    async fn messages_are_sent_and_tracked() {
        let (state, router) = app().await;
        let (_, event_id) = signed_up(&state, &router).await;
        let (_, pledge) = call(
            &router,
            "POST",
            "/v1/pledges",
            Some(json!({
                "event_id": event_id,
                "name": "Neema",
                "mobile_number": "0712000111",
                "pledge_amount": 20_000,
                "whatsapp": true
            })),
        )
        .await;
        let pledge_id = pledge["id"].as_i64().unwrap();

        let (status, body) = call(
            &router,
            "POST",
            &format!("/v1/pledges/{pledge_id}/messages"),
            Some(json!({ "body": "Asante sana" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sent"], true);
        assert_eq!(body["message"]["method"], "whatsapp");
        assert_eq!(body["message"]["status"], "sent");

        let (status, body) = call(
            &router,
            "POST",
            "/v1/messages",
            Some(json!({ "pledge_id": pledge_id, "body": "Kumbusho", "method": "voice_call" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let message_id = body["id"].as_i64().unwrap();

        let uri = format!("/v1/messages/{message_id}/send");
        let (_, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(body["sent"], false);
        assert_eq!(body["message"]["status"], "failed");

        let (_, stats) = call(&router, "GET", "/v1/message-queue", None).await;
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["counts"]["failed"], 1);
    }

    #[tokio::test]
    async fn templates_render_previews() {
        let (state, router) = app().await;
        let (_, event_id) = signed_up(&state, &router).await;
        let (status, template) = call(
            &router,
            "POST",
            "/v1/templates",
            Some(json!({
                "event_id": event_id,
                "kind": "reminder",
                "body": "Habari {name}, salio ni {balance}"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(template["name"], "Reminder");
        let template_id = template["id"].as_i64().unwrap();

        let uri = format!("/v1/templates/{template_id}");
        let (_, preview) = call(&router, "GET", &uri, None).await;
        assert_eq!(preview["preview"], "Habari John Doe, salio ni TSH 50,000.00");

        let uri = format!("/v1/templates/{template_id}/toggle");
        let (_, toggled) = call(&router, "POST", &uri, None).await;
        assert_eq!(toggled["is_active"], false);

        let (status, body) = call(
            &router,
            "POST",
            "/v1/templates",
            Some(json!({ "kind": "reminder", "body": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "body");
    }
}
