//! Realtime service: the public access point for live tenant feeds.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::RealtimeConfig;
use crate::domain::{
    ConnectionSnapshot, ConnectionStatus, Envelope, SubscriberRegistry, Subscription, TenantId,
    TenantResolver,
};
use crate::ws::Connector;
use crate::ws::connection::{ConnCmd, ConnectionActor};

/// Outbound message accepted by [`RealtimeService::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Written unchanged.
    Text(String),
    /// Serialized to JSON text before writing.
    Json(serde_json::Value),
}

impl Payload {
    /// Returns the text that goes on the wire.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug)]
struct ServiceInner {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    registry: SubscriberRegistry,
    resolver: TenantResolver,
    snapshot_rx: watch::Receiver<ConnectionSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Long-lived handle to the shared tenant connection.
///
/// Constructed once by the application's composition root with
/// [`RealtimeService::start`] and shared by cloning; every clone drives the
/// same connection task and the same subscriber sets. None of the methods
/// block on network I/O.
#[derive(Debug, Clone)]
pub struct RealtimeService {
    inner: Arc<ServiceInner>,
}

impl RealtimeService {
    /// Spawns the connection task and returns the service handle.
    ///
    /// Must be called from within a Tokio runtime. No connection is opened
    /// until [`RealtimeService::ensure_connection`] is called.
    #[must_use]
    pub fn start<C: Connector>(config: RealtimeConfig, connector: C) -> Self {
        let registry = SubscriberRegistry::new();
        let resolver =
            TenantResolver::new(config.session_file.clone(), config.default_tenant_id.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());

        let actor = ConnectionActor::new(config, Arc::new(connector), registry.clone(), snapshot_tx);
        let task = tokio::spawn(actor.run(cmd_rx));

        Self {
            inner: Arc::new(ServiceInner {
                cmd_tx,
                registry,
                resolver,
                snapshot_rx,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Resolves the active tenant and makes sure a connection for it is open
    /// or being opened. Repeated calls never open a second connection.
    ///
    /// The session record is read synchronously from local disk; the
    /// connect itself happens on the connection task.
    ///
    /// Returns the tenant the connection is bound to.
    pub fn ensure_connection(&self) -> TenantId {
        let tenant = self.inner.resolver.resolve();
        self.ensure_connection_for(tenant.clone());
        tenant
    }

    /// Like [`RealtimeService::ensure_connection`] with an explicit tenant.
    /// A different tenant than the current one tears the old connection
    /// down first.
    pub fn ensure_connection_for(&self, tenant: TenantId) {
        self.command(ConnCmd::Ensure(tenant));
    }

    /// Registers an event callback. See [`SubscriberRegistry::subscribe`].
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(callback)
    }

    /// Registers a status callback. See
    /// [`SubscriberRegistry::subscribe_status`].
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe_status(callback)
    }

    /// Writes `payload` if the connection is open; otherwise drops it.
    ///
    /// Fire-and-forget: nothing is queued while disconnected and write
    /// failures are not reported.
    pub fn send(&self, payload: impl Into<Payload>) {
        if !self.current_status().is_open() {
            tracing::debug!("connection not open, dropping outbound message");
            return;
        }
        self.command(ConnCmd::Send(payload.into().into_text()));
    }

    /// Latest broadcast status.
    #[must_use]
    pub fn current_status(&self) -> ConnectionStatus {
        self.inner.snapshot_rx.borrow().status
    }

    /// Latest snapshot of status, tenant and retry counter.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Current reconnection attempt; 0 while open.
    #[must_use]
    pub fn retry_attempt(&self) -> u32 {
        self.inner.snapshot_rx.borrow().retry_attempt
    }

    /// Tenant the connection is bound to, if any.
    #[must_use]
    pub fn current_tenant(&self) -> Option<TenantId> {
        self.inner.snapshot_rx.borrow().tenant.clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot_rx.clone()
    }

    /// Closes the connection without reconnecting. Subscribers stay
    /// registered; a later `ensure_connection` reconnects.
    pub fn disconnect(&self) {
        self.command(ConnCmd::Disconnect);
    }

    /// Closes the connection and stops the connection task.
    ///
    /// Waits for the task to finish. Later calls on any clone are no-ops.
    pub async fn shutdown(&self) {
        self.command(ConnCmd::Shutdown);
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "connection task ended abnormally");
        }
    }

    fn command(&self, cmd: ConnCmd) {
        if let Err(e) = self.inner.cmd_tx.send(cmd) {
            tracing::debug!(command = ?e.0, "connection task stopped, command ignored");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_test::assert_ok;

    use super::*;
    use crate::ws::testing::{MockConnector, settle};
    use crate::ws::{Frame, TransportEvent};

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(connector: &MockConnector) -> RealtimeService {
        let config = RealtimeConfig::new("ws://realtime.test")
            .with_default_tenant(TenantId::new("tenant-a"));
        RealtimeService::start(config, connector.clone())
    }

    fn record_statuses(
        service: &RealtimeService,
    ) -> (Arc<Mutex<Vec<ConnectionStatus>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = service.subscribe_status(move |status| lock(&sink).push(status));
        (seen, sub)
    }

    fn record_events(service: &RealtimeService) -> (Arc<Mutex<Vec<Envelope>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = service.subscribe(move |env: &Envelope| lock(&sink).push(env.clone()));
        (seen, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_ensure_opens_single_connection() {
        let connector = MockConnector::new().with_connect_delay(Duration::from_millis(50));
        let service = start(&connector);
        let (statuses, _sub) = record_statuses(&service);

        for _ in 0..5 {
            assert_eq!(service.ensure_connection(), TenantId::new("tenant-a"));
        }
        let other_handle = service.clone();
        other_handle.ensure_connection();
        settle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;

        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(connector.urls(), vec!["ws://realtime.test/ws/tenant-a".to_string()]);
        assert_eq!(
            *lock(&statuses),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Open]
        );
        assert_eq!(service.current_status(), ConnectionStatus::Open);
        assert_eq!(service.current_tenant(), Some(TenantId::new("tenant-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn tenant_switch_closes_previous_connection_first() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (statuses, _sub) = record_statuses(&service);

        service.ensure_connection_for(TenantId::new("a"));
        settle().await;
        let Some(mut peer_a) = connector.take_peer(0) else {
            panic!("expected transport for tenant a");
        };

        service.ensure_connection_for(TenantId::new("b"));
        settle().await;

        assert!(matches!(
            peer_a.outbound.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
        assert_eq!(
            *lock(&statuses),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Closed,
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
            ]
        );
        assert_eq!(
            connector.urls(),
            vec![
                "ws://realtime.test/ws/a".to_string(),
                "ws://realtime.test/ws/b".to_string()
            ]
        );

        // The torn-down tenant never reconnects.
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(service.current_tenant(), Some(TenantId::new("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_close_suppresses_reconnection() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (statuses, _sub) = record_statuses(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };

        service.disconnect();
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Closed);

        // The stale handle reporting a close goes nowhere.
        assert!(peer.inbound.send(TransportEvent::Closed).is_err());
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(service.retry_attempt(), 0);
        assert_eq!(
            *lock(&statuses),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Closed
            ]
        );

        // Subscribers survive the teardown and see the next connection.
        service.ensure_connection();
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Open);
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_storm_backs_off_one_timer_at_a_time() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (statuses, _sub) = record_statuses(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };

        // First unexpected closure; the next two reconnects are refused.
        connector.fail_next(2);
        assert!(peer.inbound.send(TransportEvent::Closed).is_ok());
        settle().await;
        assert_eq!(service.retry_attempt(), 1);

        tokio::time::sleep(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(service.retry_attempt(), 2);

        tokio::time::sleep(Duration::from_millis(1_999)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 2);
        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(service.retry_attempt(), 3);
        assert_eq!(service.current_status(), ConnectionStatus::Closed);

        tokio::time::sleep(Duration::from_millis(3_999)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 3);
        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 4);
        assert_eq!(service.current_status(), ConnectionStatus::Open);
        assert_eq!(service.retry_attempt(), 0);

        let observed = lock(&statuses).clone();
        let opens = observed
            .iter()
            .filter(|s| **s == ConnectionStatus::Open)
            .count();
        let errors = observed
            .iter()
            .filter(|s| **s == ConnectionStatus::Error)
            .count();
        assert_eq!(opens, 2);
        assert_eq!(errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_during_backoff_connects_now_and_cancels_timer() {
        let connector = MockConnector::new().with_connect_delay(Duration::from_millis(50));
        let service = start(&connector);

        service.ensure_connection();
        tokio::time::sleep(Duration::from_millis(60)).await;
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };
        assert_ok!(peer.inbound.send(TransportEvent::Closed));
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Closed);
        assert_eq!(service.retry_attempt(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        service.ensure_connection();
        settle().await;
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(service.current_status(), ConnectionStatus::Connecting);
        assert_eq!(service.retry_attempt(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Open);
        assert_eq!(service.retry_attempt(), 0);

        // The old deadline passes without a second reconnect.
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(service.current_status(), ConnectionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn tenant_switch_during_backoff_resets_retry_and_drops_old_tenant() {
        let connector = MockConnector::new().with_connect_delay(Duration::from_millis(50));
        let service = start(&connector);

        service.ensure_connection_for(TenantId::new("a"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport for tenant a");
        };
        assert_ok!(peer.inbound.send(TransportEvent::Closed));
        settle().await;
        assert_eq!(service.retry_attempt(), 1);

        service.ensure_connection_for(TenantId::new("b"));
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Connecting);
        assert_eq!(service.retry_attempt(), 0);
        assert_eq!(service.current_tenant(), Some(TenantId::new("b")));

        tokio::time::sleep(Duration::from_millis(60)).await;
        settle().await;
        assert_eq!(service.current_status(), ConnectionStatus::Open);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(
            connector.urls(),
            vec![
                "ws://realtime.test/ws/a".to_string(),
                "ws://realtime.test/ws/b".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_reports_error_then_closed() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (statuses, _sub) = record_statuses(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };
        assert_ok!(peer.inbound.send(TransportEvent::Error(
            crate::error::RealtimeError::Transport("reset by peer".to_string())
        )));
        settle().await;

        assert_eq!(
            *lock(&statuses),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Error,
                ConnectionStatus::Closed
            ]
        );
        assert_eq!(service.retry_attempt(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_subscribers_in_order() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (events, _events_sub) = record_events(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };
        for text in [
            "pong",
            r#"{"event":"message.created","data":{"phone":"+911234567890","seq":1}}"#,
            "debug: hello",
            r#"{"event":"message.read","data":{"seq":2}}"#,
            "ok",
        ] {
            assert_ok!(peer.inbound.send(TransportEvent::Frame(Frame::text(text))));
        }
        settle().await;

        let received = lock(&events).clone();
        let names: Vec<&str> = received.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["message.created", "message.read"]);
        assert_eq!(
            received.first().and_then(Envelope::phone),
            Some("911234567890")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_subscriber_does_not_starve_others() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let _bad = service.subscribe(|_env: &Envelope| panic!("subscriber bug"));
        let (events, _good) = record_events(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };
        assert_ok!(peer.inbound.send(TransportEvent::Frame(Frame::text(
            r#"{"event":"x","data":{}}"#
        ))));
        settle().await;

        assert_eq!(lock(&events).len(), 1);
        assert_eq!(service.current_status(), ConnectionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_only_while_open() {
        let connector = MockConnector::new();
        let service = start(&connector);

        service.send("dropped while closed");
        service.ensure_connection();
        settle().await;
        let Some(mut peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };

        service.send("raw text");
        service.send(json!({"action": "typing", "chat": 7}));
        settle().await;

        assert_eq!(peer.outbound.try_recv().ok(), Some(Frame::text("raw text")));
        let Ok(Frame::Text(json_text)) = peer.outbound.try_recv() else {
            panic!("expected JSON frame");
        };
        let parsed: serde_json::Value = serde_json::from_str(&json_text).unwrap_or_default();
        assert_eq!(parsed, json!({"action": "typing", "chat": 7}));
        assert!(matches!(peer.outbound.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_while_open_and_stops_after_close() {
        let connector = MockConnector::new();
        let service = start(&connector);

        service.ensure_connection();
        settle().await;
        let Some(mut peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };

        tokio::time::sleep(Duration::from_secs(24)).await;
        settle().await;
        assert!(matches!(peer.outbound.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(peer.outbound.try_recv().ok(), Some(Frame::text("ping")));

        tokio::time::sleep(Duration::from_secs(25)).await;
        settle().await;
        assert_eq!(peer.outbound.try_recv().ok(), Some(Frame::text("ping")));

        service.disconnect();
        settle().await;
        assert!(matches!(
            peer.outbound.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery_but_keeps_connection() {
        let connector = MockConnector::new();
        let service = start(&connector);
        let (events, sub) = record_events(&service);

        service.ensure_connection();
        settle().await;
        let Some(peer) = connector.take_peer(0) else {
            panic!("expected transport");
        };
        assert!(sub.unsubscribe());
        assert_ok!(peer.inbound.send(TransportEvent::Frame(Frame::text(
            r#"{"event":"x","data":{}}"#
        ))));
        settle().await;

        assert!(lock(&events).is_empty());
        assert_eq!(service.current_status(), ConnectionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_task_and_ignores_later_calls() {
        let connector = MockConnector::new();
        let service = start(&connector);
        service.ensure_connection();
        settle().await;

        service.shutdown().await;
        assert_eq!(service.current_status(), ConnectionStatus::Closed);

        service.ensure_connection();
        service.shutdown().await;
        settle().await;
        assert_eq!(connector.attempt_count(), 1);
    }

    #[test]
    fn payload_text_passes_through() {
        assert_eq!(Payload::from("ping").into_text(), "ping");
        assert_eq!(
            Payload::from(json!({"a": 1})).into_text(),
            r#"{"a":1}"#.to_string()
        );
    }
}
