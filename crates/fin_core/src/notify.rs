//! User-facing notices emitted by mutations

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Success(String),
    /// Saved locally; will be sent when the connection returns
    Queued(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Success(m) | Notice::Queued(m) | Notice::Error(m) => m,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Error(m) => tracing::warn!("{}", m),
            other => tracing::info!("{}", other.message()),
        }
        // No subscriber is not an error
        let _ = self.tx.send(notice);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Notice::Success(message.into()));
    }

    pub fn queued(&self, message: impl Into<String>) {
        self.notify(Notice::Queued(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Notice::Error(message.into()));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_notices() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.queued("Salvo offline");
        assert_eq!(rx.recv().await.unwrap(), Notice::Queued("Salvo offline".to_string()));
    }

    #[test]
    fn test_notify_without_subscribers() {
        Notifier::new().error("sem ouvintes");
    }
}
