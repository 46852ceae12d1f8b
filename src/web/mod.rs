pub mod assessments;
pub mod auth;
pub mod calendar;
pub mod error;
pub mod rubrics;
pub mod session;

use crate::state::SharedState;
use axum::{routing::get, Router};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/rubrics", rubrics::router(state.clone()))
        .nest("/assessments", assessments::router(state.clone()))
        .nest("/calendar", calendar::router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::middleware::RateLimiter;
    use crate::services::reminders::LogNotifier;
    use crate::state::AppState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/schoolhub_test")
            .unwrap();
        let config = Config {
            database_url: "postgres://localhost/schoolhub_test".into(),
            bind_addr: "127.0.0.1:0".into(),
            session_key: vec![9u8; 32],
            db_max_connections: 1,
            admin_private_override: false,
            default_max_score: 100.0,
            reminder_cron: "0 * * * * *".into(),
            secure_cookies: false,
            seed_admin: None,
        };
        Arc::new(AppState {
            pool,
            config: Arc::new(config),
            notifier: Arc::new(LogNotifier),
            login_limiter: RateLimiter::new(5, Duration::from_secs(60)),
        })
    }

    async fn status_of(method: &str, uri: &str, auth: Option<&str>) -> StatusCode {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        routes(test_state())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_is_open() {
        assert_eq!(status_of("GET", "/health", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_need_a_session() {
        assert_eq!(status_of("GET", "/rubrics", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("GET", "/calendar/events", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("GET", "/calendar/reminders", None).await, StatusCode::UNAUTHORIZED);
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            status_of("GET", &format!("/assessments/{id}"), None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn forged_tokens_are_rejected() {
        assert_eq!(
            status_of("GET", "/rubrics", Some("not-a-real.token")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        assert_eq!(status_of("GET", "/nope", None).await, StatusCode::NOT_FOUND);
    }
}
