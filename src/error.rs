//! Error types for TaskFlow.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Top-level error type for the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Password must be at least 8 characters long.")]
    WeakPassword,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Rate limit exceeded. Try again in {window_secs} seconds.")]
    RateLimited { window_secs: u64 },

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} quota exceeded")]
    QuotaExceeded { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Errors surfaced by the REST client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server rejected the bearer token (or none was stored).
    #[error("Authentication token has expired or is invalid. Please log in again.")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("Request failed with status {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Error returned by HTTP handlers, rendered as `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, .. } => Self::NotFound(format!("{entity} not found")),
            DatabaseError::Constraint(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::InvalidCredentials => {
                Self::Unauthorized(e.to_string())
            }
            AuthError::WeakPassword | AuthError::InvalidEmail => Self::BadRequest(e.to_string()),
            AuthError::EmailTaken => Self::Conflict(e.to_string()),
            AuthError::RateLimited { .. } => Self::TooManyRequests(e.to_string()),
            AuthError::Hashing(_) | AuthError::Encoding(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<crate::tasks::model::TaskValidationError> for ApiError {
    fn from(e: crate::tasks::model::TaskValidationError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// Result type alias for the server.
pub type Result<T> = std::result::Result<T, Error>;
