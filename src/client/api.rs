//! Typed REST client for the TaskFlow server.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::session::{AuthSession, LogoutReason};
use crate::auth::model::{LoginRequest, MessageResponse, SignupRequest, TokenResponse, User};
use crate::chat::model::{ChatRequest, ChatResponse, Conversation, ConversationDetail};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::tasks::model::{NewTask, StatusUpdate, Task, TaskFilters, TaskPatch, TaskStatus};

/// Task endpoints, as used by the task cache.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self, filters: &TaskFilters) -> Result<Vec<Task>, ClientError>;

    async fn create_task(&self, task: &NewTask) -> Result<Task, ClientError>;

    /// PUT: apply the fields present in `patch`.
    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Task, ClientError>;

    /// PATCH: change only the status.
    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<Task, ClientError>;

    async fn delete_task(&self, id: i64) -> Result<(), ClientError>;
}

/// Chat and conversation endpoints, as used by the chat controller.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn get_conversation(&self, id: i64) -> Result<ConversationDetail, ClientError>;

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError>;

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;
}

/// HTTP client that attaches the session's bearer token to every call.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<AuthSession>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let header = self
            .session
            .authorization()
            .await
            .ok_or(ClientError::Unauthorized)?;
        Ok(self.request(method, path).header(AUTHORIZATION, header))
    }

    /// Send and map error statuses. A 401 ends the session.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.session.end(LogoutReason::Expired).await;
            return Err(ClientError::Unauthorized);
        }
        Err(api_error(response).await)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(builder).await?.json().await?)
    }

    /// Send a call that carries no token. A 401 here is a rejected
    /// credential, not an expired session, so the session is left alone.
    async fn send_public<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let builder = self.authorized(Method::GET, path).await?;
        self.send_json(builder).await
    }

    async fn with_body<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let builder = self.authorized(method, path).await?.json(body);
        self.send_json(builder).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let builder = self.authorized(Method::DELETE, path).await?;
        self.send(builder).await?;
        Ok(())
    }

    // ── Auth ────────────────────────────────────────────────────────

    /// Create an account and store the returned token.
    pub async fn signup(&self, request: &SignupRequest) -> Result<(), ClientError> {
        let builder = self
            .request(Method::POST, "/api/v1/auth/signup")
            .json(request);
        let token: TokenResponse = self.send_public(builder).await?;
        self.session.set_token(token.access_token).await
    }

    /// Log in and store the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let builder = self
            .request(Method::POST, "/api/v1/auth/login")
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            });
        let token: TokenResponse = self.send_public(builder).await?;
        self.session.set_token(token.access_token).await
    }

    /// Tell the server and drop the local token, even if the call fails.
    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let builder = self.request(Method::POST, "/api/v1/auth/logout");
        let result = self.send_public(builder).await;
        self.session.end(LogoutReason::UserRequested).await;
        result
    }

    pub async fn me(&self) -> Result<User, ClientError> {
        self.get("/api/v1/auth/me").await
    }
}

#[async_trait]
impl TaskApi for ApiClient {
    async fn list_tasks(&self, filters: &TaskFilters) -> Result<Vec<Task>, ClientError> {
        let builder = self
            .authorized(Method::GET, "/api/v1/tasks")
            .await?
            .query(filters);
        self.send_json(builder).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ClientError> {
        self.with_body(Method::POST, "/api/v1/tasks", task).await
    }

    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Task, ClientError> {
        self.with_body(Method::PUT, &format!("/api/v1/tasks/{id}"), patch)
            .await
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<Task, ClientError> {
        self.with_body(
            Method::PATCH,
            &format!("/api/v1/tasks/{id}"),
            &StatusUpdate { status },
        )
        .await
    }

    async fn delete_task(&self, id: i64) -> Result<(), ClientError> {
        self.delete(&format!("/api/v1/tasks/{id}")).await
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.get("/api/v1/conversations").await
    }

    async fn get_conversation(&self, id: i64) -> Result<ConversationDetail, ClientError> {
        self.get(&format!("/api/v1/conversations/{id}")).await
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        self.delete(&format!("/api/v1/conversations/{id}")).await
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        self.with_body(
            Method::POST,
            &format!("/api/{}/chat", request.user_id),
            request,
        )
        .await
    }
}

/// Build an error from a non-success response, preferring the `detail` field.
async fn api_error(response: Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                body
            }
        });
    ClientError::Api {
        status: status.as_u16(),
        detail,
    }
}
