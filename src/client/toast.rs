//! Toast queue: user-visible notifications with broadcast to the UI layer.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Toasts kept for late readers; older ones are dropped.
const MAX_RETAINED: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub id: Uuid,
    pub kind: ToastKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub struct ToastQueue {
    toasts: RwLock<VecDeque<Toast>>,
    tx: broadcast::Sender<Toast>,
}

impl ToastQueue {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            toasts: RwLock::new(VecDeque::new()),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    pub async fn push(&self, kind: ToastKind, message: impl Into<String>) -> Toast {
        let toast = Toast {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            created_at: Utc::now(),
        };
        {
            let mut toasts = self.toasts.write().await;
            toasts.push_back(toast.clone());
            while toasts.len() > MAX_RETAINED {
                toasts.pop_front();
            }
        }
        let _ = self.tx.send(toast.clone());
        toast
    }

    pub async fn error(&self, message: impl Into<String>) -> Toast {
        self.push(ToastKind::Error, message).await
    }

    pub async fn success(&self, message: impl Into<String>) -> Toast {
        self.push(ToastKind::Success, message).await
    }

    /// Remove a toast once the UI has shown it.
    pub async fn dismiss(&self, id: Uuid) -> bool {
        let mut toasts = self.toasts.write().await;
        let before = toasts.len();
        toasts.retain(|t| t.id != id);
        toasts.len() != before
    }

    /// Toasts not yet dismissed, oldest first.
    pub async fn pending(&self) -> Vec<Toast> {
        self.toasts.read().await.iter().cloned().collect()
    }
}
