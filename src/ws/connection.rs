//! Connection state machine.
//!
//! A single task owns the transport link, the heartbeat timer, the pending
//! reconnection deadline and the retry counter. Callers talk to it through
//! [`ConnCmd`]s; transport events, heartbeat ticks and the reconnection
//! deadline are further branches of the same `select!` loop, so every state
//! transition is serialized without locks.
//!
//! ```text
//!            ensure              transport up
//!   Closed ─────────▶ Connecting ────────────▶ Open ──┐ heartbeat "ping"
//!     ▲                  │                      │ ◀──┘
//!     │                  │ connect failed       │ transport error / close
//!     │                  ▼                      ▼
//!     └──────────────── Error ─────────────▶ Closed ──▶ backoff ──▶ Connecting
//! ```

use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::backoff::BackoffPolicy;
use super::decoder;
use super::transport::{Connector, Frame, TransportEvent, TransportLink};
use crate::config::RealtimeConfig;
use crate::domain::{ConnectionSnapshot, ConnectionStatus, SubscriberRegistry, TenantId};
use crate::error::RealtimeError;

/// Keepalive token written while the connection is open.
pub const HEARTBEAT_TOKEN: &str = "ping";

/// Commands accepted by the connection task.
#[derive(Debug)]
pub(crate) enum ConnCmd {
    /// Make sure a connection for this tenant is open or being opened.
    Ensure(TenantId),
    /// Write a text frame if the connection is open.
    Send(String),
    /// Manual teardown; the task keeps running.
    Disconnect,
    /// Manual teardown, then the task exits.
    Shutdown,
}

type PendingConnect = BoxFuture<'static, Result<TransportLink, RealtimeError>>;

/// The transport currently owned by the task.
struct ActiveLink {
    id: uuid::Uuid,
    link: TransportLink,
}

/// State owned exclusively by the connection task.
pub(crate) struct ConnectionActor {
    connector: Arc<dyn Connector>,
    registry: SubscriberRegistry,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    config: RealtimeConfig,
    tenant: Option<TenantId>,
    link: Option<ActiveLink>,
    connecting: Option<PendingConnect>,
    status: ConnectionStatus,
    retry_attempt: u32,
    manual_close: bool,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        registry: SubscriberRegistry,
        snapshot_tx: watch::Sender<ConnectionSnapshot>,
    ) -> Self {
        Self {
            connector,
            registry,
            snapshot_tx,
            config,
            tenant: None,
            link: None,
            connecting: None,
            status: ConnectionStatus::Closed,
            retry_attempt: 0,
            manual_close: false,
            heartbeat: None,
            reconnect_at: None,
        }
    }

    /// Runs until [`ConnCmd::Shutdown`] arrives or every command sender is
    /// dropped.
    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Ensure(tenant)) => self.ensure(tenant),
                    Some(ConnCmd::Send(text)) => self.send(text),
                    Some(ConnCmd::Disconnect) => self.teardown("disconnect requested"),
                    Some(ConnCmd::Shutdown) | None => {
                        self.teardown("shutdown");
                        break;
                    }
                },
                result = pending_connect(&mut self.connecting) => self.on_connect_result(result),
                event = next_transport_event(&mut self.link) => self.on_transport_event(event),
                () = heartbeat_tick(&mut self.heartbeat) => self.send_heartbeat(),
                () = reconnect_due(self.reconnect_at) => self.on_reconnect_due(),
            }
        }
        tracing::debug!("connection task stopped");
    }

    /// Idempotent connect guard.
    fn ensure(&mut self, tenant: TenantId) {
        let live = self.link.is_some() || self.connecting.is_some();
        if self.tenant.as_ref() == Some(&tenant) && live {
            tracing::trace!(%tenant, status = %self.status, "connection already live");
            return;
        }

        if let Some(current) = self.tenant.as_ref()
            && *current != tenant
        {
            tracing::info!(from = %current, to = %tenant, "switching tenant");
            self.teardown("tenant switch");
            self.retry_attempt = 0;
        }

        self.tenant = Some(tenant);
        self.open();
    }

    /// Starts a connect attempt for the bound tenant.
    fn open(&mut self) {
        let Some(tenant) = self.tenant.clone() else {
            return;
        };
        self.manual_close = false;
        self.reconnect_at = None;

        let url = self.config.endpoint_url(&tenant);
        tracing::info!(%tenant, %url, attempt = self.retry_attempt, "opening realtime connection");

        let connector = Arc::clone(&self.connector);
        let limit = self.config.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            tokio::time::timeout(limit, connector.connect(&url))
                .await
                .unwrap_or_else(|_| {
                    Err(RealtimeError::Connect(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )))
                })
        }));
        self.set_status(ConnectionStatus::Connecting);
    }

    fn on_connect_result(&mut self, result: Result<TransportLink, RealtimeError>) {
        self.connecting = None;
        match result {
            Ok(link) => {
                let id = uuid::Uuid::new_v4();
                tracing::info!(tenant = ?self.tenant, link_id = %id, "realtime connection open");
                self.link = Some(ActiveLink { id, link });
                self.retry_attempt = 0;
                self.heartbeat = Some(self.new_heartbeat());
                self.set_status(ConnectionStatus::Open);
            }
            Err(e) => {
                tracing::warn!(
                    tenant = ?self.tenant,
                    error = %e,
                    kind = e.kind(),
                    recoverable = e.is_recoverable(),
                    "realtime connect failed"
                );
                self.set_status(ConnectionStatus::Error);
                self.on_closed();
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => {
                if let Some(envelope) = decoder::decode(&frame) {
                    self.registry.dispatch_event(&envelope);
                }
            }
            TransportEvent::Error(e) => {
                tracing::warn!(
                    tenant = ?self.tenant,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    "realtime transport error"
                );
                self.set_status(ConnectionStatus::Error);
                self.drop_link();
                self.on_closed();
            }
            TransportEvent::Closed => {
                tracing::info!(tenant = ?self.tenant, "realtime transport closed");
                self.drop_link();
                self.on_closed();
            }
        }
    }

    /// Close handler shared by transport close, transport error and failed
    /// connects.
    fn on_closed(&mut self) {
        self.heartbeat = None;
        self.set_status(ConnectionStatus::Closed);
        if self.manual_close || self.tenant.is_none() {
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let policy: BackoffPolicy = self.config.backoff;
        self.retry_attempt = policy.next_attempt(self.retry_attempt);
        let delay = policy.delay_for(self.retry_attempt);
        self.reconnect_at = Some(Instant::now() + delay);
        tracing::info!(
            tenant = ?self.tenant,
            attempt = self.retry_attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        self.publish_snapshot();
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if self.manual_close {
            return;
        }
        self.open();
    }

    /// Manual teardown: no reconnection follows.
    fn teardown(&mut self, reason: &'static str) {
        self.manual_close = true;
        self.reconnect_at = None;
        self.connecting = None;
        if let Some(active) = self.link.as_ref() {
            tracing::info!(tenant = ?self.tenant, link_id = %active.id, reason, "closing realtime connection");
        }
        self.drop_link();
        self.set_status(ConnectionStatus::Closed);
    }

    /// Discards the link; dropping its sender closes the transport.
    fn drop_link(&mut self) {
        self.heartbeat = None;
        self.link = None;
    }

    fn send(&mut self, text: String) {
        if !self.status.is_open() {
            tracing::debug!(status = %self.status, "connection not open, dropping outbound message");
            return;
        }
        self.write(Frame::Text(text));
    }

    fn send_heartbeat(&mut self) {
        if self.status.is_open() {
            tracing::trace!("sending heartbeat");
            self.write(Frame::text(HEARTBEAT_TOKEN));
        }
    }

    fn write(&self, frame: Frame) {
        let Some(active) = self.link.as_ref() else {
            return;
        };
        if active.link.outbound.send(frame).is_err() {
            tracing::debug!(link_id = %active.id, "transport gone, outbound frame dropped");
        }
    }

    fn new_heartbeat(&self) -> Interval {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(from = %self.status, to = %status, "status transition");
        self.status = status;
        self.publish_snapshot();
        self.registry.dispatch_status(status);
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(ConnectionSnapshot {
            status: self.status,
            tenant: self.tenant.clone(),
            retry_attempt: self.retry_attempt,
        });
    }
}

async fn pending_connect(
    slot: &mut Option<PendingConnect>,
) -> Result<TransportLink, RealtimeError> {
    match slot.as_mut() {
        Some(connect) => connect.await,
        None => future::pending().await,
    }
}

async fn next_transport_event(slot: &mut Option<ActiveLink>) -> TransportEvent {
    match slot.as_mut() {
        Some(active) => active
            .link
            .inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed),
        None => future::pending().await,
    }
}

async fn heartbeat_tick(slot: &mut Option<Interval>) {
    match slot.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn reconnect_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
