//! Service layer: the public access point used by feature code.

pub mod realtime_service;

pub use realtime_service::{Payload, RealtimeService};
