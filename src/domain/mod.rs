//! Domain layer: tenant identity, connection status, envelopes, and the
//! subscriber registry.
//!
//! These types are shared by the connection task and the public service
//! and carry no transport details.

pub mod envelope;
pub mod status;
pub mod subscriber_registry;
pub mod tenant;

pub use envelope::Envelope;
pub use status::{ConnectionSnapshot, ConnectionStatus};
pub use subscriber_registry::{SubscriberId, SubscriberRegistry, Subscription};
pub use tenant::{TenantId, TenantResolver};
