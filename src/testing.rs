//! Test utilities for driving the notification actor and the trackers without real IO.
//!
//! [`MockTransport`] hands every opened socket to a paired [`MockServer`], so tests can
//! push inbound frames, read what the client wrote and drop sockets from the server side.
//! [`RecordingSink`] captures analytics events instead of posting them.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::analytics::{AnalyticsError, AnalyticsEvent, AnalyticsSink, SinkFuture};
use crate::core::{WebSocketError, WsCloseFrame, WsFrame, WsReconnectStrategy};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// In-memory transport; each `connect` produces a fresh [`MockSocket`].
#[derive(Clone)]
pub struct MockTransport {
    sockets_tx: mpsc::UnboundedSender<MockSocket>,
    connects: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (sockets_tx, sockets_rx) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sockets_tx,
                connects: Arc::clone(&connects),
            },
            MockServer {
                sockets_rx,
                connects,
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let sockets_tx = self.sockets_tx.clone();
        let connects = Arc::clone(&self.connects);
        Box::pin(async move {
            connects.fetch_add(1, Ordering::SeqCst);

            let (sent_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            sockets_tx
                .send(MockSocket {
                    url,
                    outbound_rx,
                    inbound_tx: Some(inbound_tx),
                })
                .map_err(|_| WebSocketError::ConnectionFailed("mock server dropped".to_string()))?;

            Ok((MockReader { rx: inbound_rx }, MockWriter { sent_tx }))
        })
    }
}

/// Errors returned by [`MockSocket`] helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockServerError {
    SocketDropped,
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client reader is gone"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    sockets_rx: mpsc::UnboundedReceiver<MockSocket>,
    connects: Arc<AtomicUsize>,
}

impl MockServer {
    /// Next socket opened by the client.
    pub async fn accept(&mut self) -> Option<MockSocket> {
        self.sockets_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockSocket> {
        tokio::time::timeout(timeout, self.sockets_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Number of `connect` calls the transport has seen.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// One accepted connection.
pub struct MockSocket {
    url: String,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive a frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    /// Send a close frame; the client treats it as a remote close.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Close(Some(WsCloseFrame {
            code,
            reason: bytes::Bytes::copy_from_slice(reason.as_bytes()),
        })))
    }

    /// Simulate the server vanishing: the client's reader sees the stream end.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Transport whose handshake always fails, counting attempts.
#[derive(Clone, Default)]
pub struct RefusingTransport {
    attempts: Arc<AtomicUsize>,
}

impl RefusingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl WsTransport for RefusingTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let attempts = Arc::clone(&self.attempts);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(WebSocketError::ConnectionFailed(format!(
                "{url}: connection refused"
            )))
        })
    }
}

/// Reconnect strategy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl WsReconnectStrategy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        false
    }

    fn attempts(&self) -> u32 {
        0
    }
}

/// Analytics sink that keeps every submitted event; can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
    failing: Arc<Mutex<Option<u16>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later submission with `status`.
    pub fn fail_with_status(&self, status: u16) {
        *self.failing.lock() = Some(status);
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().clone()
    }
}

impl AnalyticsSink for RecordingSink {
    fn submit(&self, event: AnalyticsEvent) -> SinkFuture {
        let failing = *self.failing.lock();
        if failing.is_none() {
            self.events.lock().push(event);
        }
        Box::pin(async move {
            match failing {
                Some(status) => Err(AnalyticsError::Status(status)),
                None => Ok(()),
            }
        })
    }
}
