//! # tenant-realtime
//!
//! Persistent, tenant-scoped real-time event connection for the operations
//! dashboard.
//!
//! One long-lived [`RealtimeService`] owns at most one live connection per
//! process, bound to the active tenant. Any number of independent callers
//! can ask for the connection, subscribe to decoded events and status
//! changes, and send fire-and-forget messages, while the connection task
//! keeps the link alive with a heartbeat and reconnects with bounded
//! exponential backoff.
//!
//! ## Architecture
//!
//! ```text
//! Feature code
//!     │
//!     ├── RealtimeService (service/)     ensure / subscribe / send / status
//!     │
//!     ├── TenantResolver (domain/)       session record → TenantId
//!     ├── SubscriberRegistry (domain/)   event + status fan-out
//!     │
//!     ├── ConnectionActor (ws/)          state machine, heartbeat, backoff
//!     ├── Frame decoder (ws/)            control tokens, JSON envelopes
//!     │
//!     └── Connector (ws/)                tokio-tungstenite transport
//! ```
//!
//! [`RealtimeService`]: service::RealtimeService

pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
