use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{WebSocketError, WsFrame};

pub mod tungstenite;

/// Boxed future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), WebSocketError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The connection actor owns state and policies; the transport only opens sockets and
/// converts frames, so tests can swap in an in-memory implementation.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, WebSocketError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
