//! Realtime error types.
//!
//! [`RealtimeError`] is the central error type used at the internal seams of
//! the crate: configuration loading, the transport connector, and typed
//! interpretation of envelopes. None of these errors cross the public
//! connection API (`ensure_connection`, `send`, `subscribe`); transport
//! failures there are surfaced only as status transitions.

/// Error enum for configuration, transport and decoding failures.
///
/// # Recoverability
///
/// | Variant         | Recoverable | Typical source                     |
/// |-----------------|-------------|------------------------------------|
/// | `InvalidConfig` | no          | bad environment / `.env` values    |
/// | `Connect`       | yes         | handshake refused, DNS, TCP reset  |
/// | `Transport`     | yes         | socket error on an open connection |
/// | `Serialization` | no          | payload shape mismatch             |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// A configuration value is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An established transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Returns `true` if the reconnection policy may recover from this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Transport(_) => true,
            Self::InvalidConfig(_) | Self::Serialization(_) => false,
        }
    }

    /// Short machine-readable label, used as a structured log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::Connect(_) => "connect",
            Self::Transport(_) => "transport",
            Self::Serialization(_) => "serialization",
        }
    }
}
