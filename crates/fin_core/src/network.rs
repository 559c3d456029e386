//! Connectivity detector
//!
//! Holds the current online flag in a `watch` channel so any task can read the
//! latest value or await a transition without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

impl ConnectionStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<ConnectionStatus>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let initial = if online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Record a connectivity change. Subscribers are woken only on transitions.
    pub fn set_online(&self, online: bool) {
        let next = if online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!("Connection status changed to {:?}", next);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(NetworkMonitor::new(true).is_online());
        assert!(!NetworkMonitor::new(false).is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Online);
    }
}
