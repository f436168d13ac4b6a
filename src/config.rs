//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{ANTHROPIC_BASE_URL, LlmConfig};

/// Default system prompt for the task assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are TaskFlow, a helpful assistant that manages the \
user's to-do list. Use the provided tools to add, list, search, update, complete and delete \
tasks. The user is already identified, never ask for a user id. Task statuses are 'pending', \
'in-progress' and 'completed'; priorities are 1 (high), 2 (medium) and 3 (low). After using a \
tool, summarise the outcome in one or two friendly sentences.";

/// Default model for the chat assistant.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HMAC secret for bearer tokens.
    pub jwt_secret: SecretString,
    /// Lifetime of issued access tokens.
    pub token_ttl: Duration,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Auth endpoint rate limit (requests per window per client).
    pub auth_rate_limit: usize,
    /// Auth endpoint rate limit window.
    pub auth_rate_window: Duration,
    /// Model provider settings.
    pub llm: LlmConfig,
    /// Chat assistant settings.
    pub chat: ChatConfig,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Build from `TASKFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("TASKFLOW_JWT_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("TASKFLOW_JWT_SECRET".to_string()))?;

        let allowed_origins = std::env::var("TASKFLOW_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: std::env::var("TASKFLOW_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| ANTHROPIC_BASE_URL.to_string()),
            max_tokens: env_parse("TASKFLOW_MAX_TOKENS", 1024)?,
        };

        let mut chat = ChatConfig::default();
        if let Ok(prompt) = std::env::var("TASKFLOW_SYSTEM_PROMPT") {
            chat.system_prompt = prompt;
        }

        Ok(Self {
            db_path: std::env::var("TASKFLOW_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/taskflow.db")),
            port: env_parse("TASKFLOW_PORT", 8000)?,
            jwt_secret: SecretString::from(jwt_secret),
            token_ttl: Duration::from_secs(env_parse::<u64>("TASKFLOW_TOKEN_EXPIRE_MIN", 60)? * 60),
            allowed_origins,
            auth_rate_limit: env_parse("TASKFLOW_AUTH_RATE_LIMIT", 5)?,
            auth_rate_window: Duration::from_secs(env_parse("TASKFLOW_AUTH_RATE_WINDOW_SECS", 60)?),
            llm,
            chat,
            log_dir: std::env::var("TASKFLOW_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Chat assistant configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub system_prompt: String,
    /// Number of stored messages replayed to the model as history.
    pub history_window: usize,
    /// Maximum model/tool round trips per user message.
    pub max_tool_rounds: usize,
    /// Attempts per turn when the provider rate limits us.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: 10,
            max_tool_rounds: 5,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Client library configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the TaskFlow server.
    pub base_url: String,
    /// Where the bearer token is persisted between runs, if anywhere.
    pub token_file: Option<PathBuf>,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TASKFLOW_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            token_file: std::env::var("TASKFLOW_TOKEN_FILE").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
