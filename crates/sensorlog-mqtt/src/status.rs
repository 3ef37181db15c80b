//! Observable connection state of the subscription manager.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Where the broker connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected; waiting out a backoff or shut down.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and all topic filters have been (re-)issued.
    Subscribed,
}

impl ConnectionState {
    /// Returns the canonical label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Connection failures since the manager started.
    pub reconnect_attempts: u64,
    /// Most recent connection error, cleared on successful subscribe.
    pub last_error: Option<String>,
    /// When the current subscribed session began.
    pub subscribed_since: Option<DateTime<Utc>>,
}

impl Default for BrokerStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
            subscribed_since: None,
        }
    }
}

/// Writer side of the status channel, owned by the receive loop.
#[derive(Debug)]
pub(crate) struct StatusHandle {
    tx: watch::Sender<BrokerStatus>,
}

impl StatusHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<BrokerStatus>) {
        let (tx, rx) = watch::channel(BrokerStatus::default());
        (Self { tx }, rx)
    }

    pub(crate) fn connecting(&self) {
        self.tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
            status.subscribed_since = None;
        });
    }

    pub(crate) fn subscribed(&self) {
        self.tx.send_modify(|status| {
            status.state = ConnectionState::Subscribed;
            status.last_error = None;
            status.subscribed_since = Some(Utc::now());
        });
    }

    /// Connected, but the broker refused every filter; no traffic will flow.
    pub(crate) fn rejected(&self, error: String) {
        self.tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
            status.last_error = Some(error);
            status.subscribed_since = None;
        });
    }

    pub(crate) fn connection_lost(&self, error: String) {
        self.tx.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.reconnect_attempts += 1;
            status.last_error = Some(error);
            status.subscribed_since = None;
        });
    }

    pub(crate) fn stopped(&self) {
        self.tx.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.subscribed_since = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_update_snapshot() {
        let (handle, rx) = StatusHandle::new();
        assert_eq!(rx.borrow().state, ConnectionState::Disconnected);

        handle.connecting();
        assert_eq!(rx.borrow().state, ConnectionState::Connecting);

        handle.connection_lost("connection refused".to_string());
        {
            let status = rx.borrow();
            assert_eq!(status.state, ConnectionState::Disconnected);
            assert_eq!(status.reconnect_attempts, 1);
            assert_eq!(status.last_error.as_deref(), Some("connection refused"));
        }

        handle.connecting();
        handle.subscribed();
        let status = rx.borrow();
        assert_eq!(status.state, ConnectionState::Subscribed);
        assert_eq!(status.reconnect_attempts, 1);
        assert!(status.last_error.is_none());
        assert!(status.subscribed_since.is_some());
    }

    #[test]
    fn rejected_subscription_is_not_subscribed() {
        let (handle, rx) = StatusHandle::new();
        handle.connecting();
        handle.rejected("broker rejected every topic filter".to_string());

        let status = rx.borrow();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_error.is_some());
        assert!(status.subscribed_since.is_none());
    }

    #[test]
    fn serialises_state_labels() {
        let json = serde_json::to_value(BrokerStatus::default()).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["reconnect_attempts"], 0);
    }
}
