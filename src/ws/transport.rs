//! Transport seam between the connection task and the network.
//!
//! A [`Connector`] establishes a [`TransportLink`]: a pair of channels the
//! connection task uses to write frames and to observe inbound frames,
//! errors and closure. Dropping the link's outbound sender closes the
//! underlying transport. [`TungsteniteConnector`] is the production
//! connector over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::RealtimeError;

/// A single transport frame, text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Raw binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Creates a text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::text(text),
            Self::Binary(bytes) => Message::binary(bytes),
        }
    }
}

/// Something the transport reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound frame.
    Frame(Frame),
    /// The transport failed. No further events follow.
    Error(RealtimeError),
    /// The transport closed. No further events follow.
    Closed,
}

/// Owner side of an established transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to write. Dropping this sender closes the transport.
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Inbound frames and lifecycle notifications.
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Network side of an established transport, driven by a connector's pump.
#[derive(Debug)]
pub struct TransportPeer {
    /// Frames the owner asked to write.
    pub outbound: mpsc::UnboundedReceiver<Frame>,
    /// Channel for reporting inbound frames and lifecycle notifications.
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportLink {
    /// Creates a connected link/peer pair.
    #[must_use]
    pub fn channel() -> (Self, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }
}

/// Establishes transports for the connection task.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a transport to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Connect`] if the transport cannot be
    /// established.
    async fn connect(&self, url: &str) -> Result<TransportLink, RealtimeError>;
}

/// Production connector over `tokio-tungstenite`.
///
/// Protocol-level ping/pong frames are answered by tungstenite itself; the
/// application-level `"ping"` heartbeat is a regular text frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, RealtimeError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        tracing::debug!(url, status = %response.status(), "websocket handshake complete");

        let (link, peer) = TransportLink::channel();
        tokio::spawn(pump(stream, peer));
        Ok(link)
    }
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bridges a websocket to a [`TransportPeer`] until either side goes away.
async fn pump(stream: ClientStream, peer: TransportPeer) {
    let (mut sink, mut source) = stream.split();
    let TransportPeer {
        mut outbound,
        inbound,
    } = peer;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Owner dropped the link: close quietly.
                    let _ = sink.close().await;
                    break;
                };
                if let Err(e) = sink.send(frame.into_message()).await {
                    let _ = inbound.send(TransportEvent::Error(RealtimeError::Transport(e.to_string())));
                    break;
                }
            }
            message = source.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(Frame::Text(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => TransportEvent::Frame(Frame::Binary(bytes.to_vec())),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        TransportEvent::Closed
                    }
                    Some(Err(e)) => TransportEvent::Error(RealtimeError::Transport(e.to_string())),
                    None => TransportEvent::Closed,
                };
                let terminal = !matches!(event, TransportEvent::Frame(_));
                if inbound.send(event).is_err() || terminal {
                    break;
                }
            }
        }
    }

    tracing::debug!("websocket pump stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_and_peer_are_connected() {
        let (mut link, mut peer) = TransportLink::channel();

        assert!(link.outbound.send(Frame::text("ping")).is_ok());
        assert_eq!(peer.outbound.recv().await, Some(Frame::text("ping")));

        assert!(peer.inbound.send(TransportEvent::Closed).is_ok());
        let Some(TransportEvent::Closed) = link.inbound.recv().await else {
            panic!("expected close notification");
        };
    }

    #[tokio::test]
    async fn dropping_link_disconnects_peer() {
        let (link, mut peer) = TransportLink::channel();
        drop(link);
        assert_eq!(peer.outbound.recv().await, None);
        assert!(peer.inbound.send(TransportEvent::Closed).is_err());
    }

    #[test]
    fn frames_convert_to_messages() {
        assert_eq!(
            Frame::text("hi").into_message(),
            Message::text(String::from("hi"))
        );
        assert_eq!(
            Frame::Binary(vec![1, 2]).into_message(),
            Message::binary(vec![1u8, 2])
        );
    }
}
