//! WebSocket layer: transport seam, frame decoding, backoff policy and the
//! connection state machine.
//!
//! The connection task owns the one live transport per service and is the
//! only writer of connection state.

pub mod backoff;
pub mod connection;
pub mod decoder;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;
pub use transport::{Connector, Frame, TransportEvent, TransportLink, TransportPeer, TungsteniteConnector};
