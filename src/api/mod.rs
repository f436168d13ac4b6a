//! Application state and HTTP router composition.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{RateLimiter, TokenIssuer, auth_routes};
use crate::chat::{ChatService, chat_routes};
use crate::store::Database;
use crate::tasks::task_routes;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub tokens: TokenIssuer,
    /// Limits signup, login and logout per client IP.
    pub rate_limiter: Arc<RateLimiter>,
    pub chat: Arc<ChatService>,
}

/// GET /
async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the TaskFlow API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the full application router.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health))
        .merge(auth_routes(state.clone()))
        .merge(task_routes(state.clone()))
        .merge(chat_routes(state))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use crate::config::ChatConfig;
    use crate::error::LlmError;
    use crate::llm::{LlmProvider, ToolCompletionRequest, ToolCompletionResponse};
    use crate::store::LibSqlBackend;
    use crate::tools::ToolRegistry;

    struct NoLlm;

    #[async_trait::async_trait]
    impl LlmProvider for NoLlm {
        fn model_name(&self) -> &str {
            "none"
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "none".into(),
                reason: "offline".into(),
            })
        }
    }

    async fn app() -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let chat = ChatService::new(
            Arc::clone(&db),
            Arc::new(NoLlm),
            Arc::new(ToolRegistry::new()),
            ChatConfig::default(),
        );
        let state = AppState {
            db,
            tokens: TokenIssuer::new(SecretString::from("test-secret"), Duration::from_secs(60)),
            rate_limiter: Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            chat: Arc::new(chat),
        };
        build_router(state, &["http://localhost:3000".to_string()])
    }

    #[tokio::test]
    async fn health_and_root_are_public() {
        let app = app().await;
        let resp = app
            .clone()
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tasks_require_bearer_token() {
        let resp = app()
            .await
            .oneshot(Request::get("/api/v1/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let resp = app()
            .await
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/tasks")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }
}
