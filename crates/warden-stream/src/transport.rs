// ABOUTME: Duplex transport to the streaming backend and its WebSocket implementation.
// ABOUTME: Exposes open/send/close plus lifecycle events as an mpsc-backed link.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::error::StreamError;

/// Close code for a deliberate close by either side.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code used when the connection died without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for a close frame that carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Default buffer size for the link channels.
pub const DEFAULT_LINK_BUFFER: usize = 100;

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Low-level lifecycle events raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed(CloseReason),
}

/// Frames pushed toward the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close(CloseReason),
}

/// One live connection as seen by the controller.
///
/// Dropping the link (or calling [`TransportLink::close`]) ends the
/// underlying socket; events from a dropped link are never observed.
#[derive(Debug)]
pub struct TransportLink {
    sender: mpsc::Sender<OutboundFrame>,
    events: mpsc::Receiver<TransportEvent>,
    open: bool,
}

impl TransportLink {
    pub fn new(sender: mpsc::Sender<OutboundFrame>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            sender,
            events,
            open: false,
        }
    }

    /// Create a link plus the peer ends used by a transport implementation.
    pub fn pair(
        buffer: usize,
    ) -> (
        Self,
        mpsc::Receiver<OutboundFrame>,
        mpsc::Sender<TransportEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (ev_tx, ev_rx) = mpsc::channel(buffer);
        (Self::new(out_tx, ev_rx), out_rx, ev_tx)
    }

    pub fn mark_open(&mut self) {
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.sender.is_closed()
    }

    /// Queue a text frame. Fails instead of blocking when the socket is not
    /// open yet or the queue is full.
    pub fn send_text(&self, text: String) -> Result<(), StreamError> {
        if !self.open {
            return Err(StreamError::Connection("socket is not open".into()));
        }
        self.sender
            .try_send(OutboundFrame::Text(text))
            .map_err(|e| StreamError::Connection(format!("send failed: {}", e)))
    }

    /// Close with the given reason and drop the link.
    pub fn close(self, reason: CloseReason) {
        if let Err(e) = self.sender.try_send(OutboundFrame::Close(reason)) {
            tracing::debug!(error = %e, "Close frame not queued, dropping link");
        }
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// Opens links to the streaming endpoint.
///
/// `open` returns immediately; the outcome arrives as `Opened` or as
/// `Error` followed by `Closed` on the link's event channel.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url) -> TransportLink;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    buffer: usize,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_LINK_BUFFER,
        }
    }
}

impl WebSocketTransport {
    pub fn new(buffer: usize) -> Self {
        Self { buffer }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &Url) -> TransportLink {
        let (link, outbound, events) = TransportLink::pair(self.buffer);
        tokio::spawn(run_socket(url.clone(), outbound, events));
        link
    }
}

async fn fail(events: &mpsc::Sender<TransportEvent>, error: String) {
    let _ = events.send(TransportEvent::Error(error.clone())).await;
    let _ = events
        .send(TransportEvent::Closed(CloseReason::abnormal(error)))
        .await;
}

async fn run_socket(
    url: Url,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    events: mpsc::Sender<TransportEvent>,
) {
    tracing::debug!(host = ?url.host_str(), "Opening WebSocket");
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            fail(&events, e.to_string()).await;
            return;
        }
    };

    if events.send(TransportEvent::Opened).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        fail(&events, e.to_string()).await;
                        break;
                    }
                }
                Some(OutboundFrame::Close(reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(reason.code),
                        reason: reason.reason.into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if events.send(TransportEvent::Message(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| CloseReason {
                            code: u16::from(f.code),
                            reason: f.reason.into_owned(),
                        })
                        .unwrap_or(CloseReason {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                        });
                    let _ = events.send(TransportEvent::Closed(reason)).await;
                    break;
                }
                // Protocol-level ping/pong is answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fail(&events, e.to_string()).await;
                    break;
                }
                None => {
                    let _ = events
                        .send(TransportEvent::Closed(CloseReason::abnormal("stream ended")))
                        .await;
                    break;
                }
            },
        }
    }
    tracing::debug!("WebSocket task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_normal() {
        assert!(CloseReason::normal("bye").is_normal());
        assert!(!CloseReason::abnormal("dropped").is_normal());
        assert_eq!(CloseReason::abnormal("x").code, ABNORMAL_CLOSURE);
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (link, mut outbound, _events) = TransportLink::pair(4);
        assert!(!link.is_open());
        assert!(link.send_text("hello".into()).is_err());
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_open() {
        let (mut link, mut outbound, _events) = TransportLink::pair(4);
        link.mark_open();
        assert!(link.is_open());
        link.send_text("hello".into()).unwrap();
        assert_eq!(outbound.recv().await, Some(OutboundFrame::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_close_queues_close_frame() {
        let (link, mut outbound, _events) = TransportLink::pair(4);
        link.close(CloseReason::normal("new session"));
        assert_eq!(
            outbound.recv().await,
            Some(OutboundFrame::Close(CloseReason::normal("new session")))
        );
        assert_eq!(outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_link_events_in_order() {
        let (mut link, _outbound, events) = TransportLink::pair(4);
        events.send(TransportEvent::Opened).await.unwrap();
        events
            .send(TransportEvent::Message("{}".into()))
            .await
            .unwrap();
        assert_eq!(link.next_event().await, Some(TransportEvent::Opened));
        assert_eq!(
            link.next_event().await,
            Some(TransportEvent::Message("{}".into()))
        );
    }

    #[tokio::test]
    async fn test_websocket_open_failure_reports_abnormal_close() {
        let transport = WebSocketTransport::default();
        let url = Url::parse("ws://127.0.0.1:1/stream").unwrap();
        let mut link = transport.open(&url);

        assert!(matches!(link.next_event().await, Some(TransportEvent::Error(_))));
        match link.next_event().await {
            Some(TransportEvent::Closed(reason)) => assert!(!reason.is_normal()),
            other => panic!("expected abnormal close, got {:?}", other),
        }
    }
}
