//! In-memory connector for exercising the connection task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{Connector, TransportLink, TransportPeer};
use crate::error::RealtimeError;

#[derive(Debug, Default)]
struct MockState {
    urls: Vec<String>,
    fail_remaining: u32,
    peers: Vec<Option<TransportPeer>>,
}

/// Connector that hands out in-memory transports and records every attempt.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
    connect_delay: Option<Duration>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every connect waits `delay` before resolving.
    pub(crate) fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` connect attempts fail.
    pub(crate) fn fail_next(&self, count: u32) {
        self.state().fail_remaining = count;
    }

    /// Number of connect attempts started, including ones still pending.
    pub(crate) fn attempt_count(&self) -> usize {
        self.state().urls.len()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.state().urls.clone()
    }

    /// Takes the network side of the `index`-th successful connect.
    pub(crate) fn take_peer(&self, index: usize) -> Option<TransportPeer> {
        self.state().peers.get_mut(index).and_then(Option::take)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, RealtimeError> {
        self.state().urls.push(url.to_string());
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(RealtimeError::Connect("connection refused".to_string()));
        }
        let (link, peer) = TransportLink::channel();
        state.peers.push(Some(peer));
        Ok(link)
    }
}

/// Lets spawned tasks drain their queues without advancing time.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
