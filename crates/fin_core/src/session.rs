//! Cross-session broadcast
//!
//! Every open session of the same user subscribes to the bus. A logout in one
//! session clears cached data in all of them.

use crate::cache::QueryCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Logout { origin: String },
}

#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Announce a logout. Returns how many sessions were listening.
    pub fn broadcast_logout(&self, origin: &str) -> usize {
        tracing::info!("Broadcasting logout from session {}", origin);
        self.tx
            .send(SessionEvent::Logout {
                origin: origin.to_string(),
            })
            .unwrap_or(0)
    }

    /// Clear `cache` whenever another session logs out.
    pub fn spawn_listener(&self, session_id: String, cache: Arc<QueryCache>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Logout { origin }) => {
                        if origin != session_id {
                            tracing::info!("Session {} logged out, clearing cached data", origin);
                        }
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Session listener lagged by {} events", n);
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEvent;
    use fin_common::{Category, CategoryKind};

    #[tokio::test]
    async fn test_logout_clears_other_sessions() {
        let bus = SessionBus::new();
        let cache = Arc::new(QueryCache::new());
        cache.set_categories(vec![Category {
            id: "cat-1".to_string(),
            name: "Mercado".to_string(),
            kind: CategoryKind::Expense,
            color: None,
        }]);
        let mut events = cache.subscribe();

        let handle = bus.spawn_listener("tab-b".to_string(), cache.clone());
        assert_eq!(bus.broadcast_logout("tab-a"), 1);

        loop {
            if events.recv().await.unwrap() == CacheEvent::Cleared {
                break;
            }
        }
        assert!(cache.categories().is_empty());
        handle.abort();
    }

    #[test]
    fn test_broadcast_without_listeners() {
        assert_eq!(SessionBus::new().broadcast_logout("tab-a"), 0);
    }
}
