//! Bearer token storage and the global logout signal.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{RwLock, broadcast};

use crate::error::ClientError;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user logged out.
    UserRequested,
    /// The server rejected the token with a 401.
    Expired,
}

/// Holds the current access token, optionally persisted to a file.
///
/// Every part of the client shares one session. When a request comes back
/// 401 the session is cleared and a [`LogoutReason::Expired`] event is sent
/// to all subscribers, which is how the UI learns it must return to login.
pub struct AuthSession {
    token: RwLock<Option<SecretString>>,
    token_file: Option<PathBuf>,
    logout_tx: broadcast::Sender<LogoutReason>,
}

impl AuthSession {
    /// Session without persistence.
    pub fn in_memory() -> Arc<Self> {
        Self::build(None, None)
    }

    /// Session persisted at `token_file`, restoring a previously saved token.
    pub async fn load(token_file: Option<PathBuf>) -> Result<Arc<Self>, ClientError> {
        let token = match token_file {
            Some(ref path) if tokio::fs::try_exists(path).await? => {
                let raw = tokio::fs::read_to_string(path).await?;
                let raw = raw.trim();
                (!raw.is_empty()).then(|| SecretString::from(raw.to_string()))
            }
            _ => None,
        };
        Ok(Self::build(token, token_file))
    }

    fn build(token: Option<SecretString>, token_file: Option<PathBuf>) -> Arc<Self> {
        let (logout_tx, _rx) = broadcast::channel(8);
        Arc::new(Self {
            token: RwLock::new(token),
            token_file,
            logout_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogoutReason> {
        self.logout_tx.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// `Authorization` header value for the current token.
    pub async fn authorization(&self) -> Option<String> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| format!("Bearer {}", t.expose_secret()))
    }

    pub async fn set_token(&self, token: String) -> Result<(), ClientError> {
        if let Some(ref path) = self.token_file {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &token).await?;
        }
        *self.token.write().await = Some(SecretString::from(token));
        Ok(())
    }

    /// Drop the token and notify subscribers. Does nothing when already
    /// logged out, so concurrent 401s produce a single event.
    pub async fn end(&self, reason: LogoutReason) {
        let had_token = self.token.write().await.take().is_some();
        if !had_token {
            return;
        }
        if let Some(ref path) = self.token_file {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove token file");
            }
        }
        tracing::info!(?reason, "Session ended");
        let _ = self.logout_tx.send(reason);
    }
}
