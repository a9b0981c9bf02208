//! Connection lifecycle status and the cached connection snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::TenantId;

/// Observable lifecycle state of the shared connection.
///
/// Exactly one value holds at any instant; it is the authoritative state
/// surfaced to every caller and status subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A transport is being established.
    Connecting,
    /// The transport is established and the heartbeat is running.
    Open,
    /// No transport is open. Initial state.
    #[default]
    Closed,
    /// The transport failed. Always followed by `Closed`.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` for [`ConnectionStatus::Open`].
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the lowercase wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the connection, published by the connection task
/// on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Latest broadcast status.
    pub status: ConnectionStatus,
    /// Tenant the connection is bound to, if any.
    pub tenant: Option<TenantId>,
    /// Current reconnection attempt (0 after a successful open).
    pub retry_attempt: u32,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn initial_status_is_closed() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Closed);
        let snapshot = ConnectionSnapshot::default();
        assert_eq!(snapshot.status, ConnectionStatus::Closed);
        assert!(snapshot.tenant.is_none());
        assert_eq!(snapshot.retry_attempt, 0);
    }

    #[test]
    fn only_open_is_open() {
        assert!(ConnectionStatus::Open.is_open());
        assert!(!ConnectionStatus::Connecting.is_open());
        assert!(!ConnectionStatus::Closed.is_open());
        assert!(!ConnectionStatus::Error.is_open());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::Connecting).ok();
        assert_eq!(json.as_deref(), Some("\"connecting\""));
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
