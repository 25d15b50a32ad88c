//! Control-channel transport to a tracker
//!
//! One persistent text-message socket per tracker URL, abstracted behind
//! [`Dialer`] so tests can run the protocol over in-memory sockets and
//! deployments behind an outbound proxy can substitute their own dialer.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A frame the signaling client writes to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    /// One protocol message
    Text(String),
    /// Keepalive ping
    Ping,
}

/// Write half of a tracker socket
#[async_trait]
pub trait SocketSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: SocketFrame) -> Result<()>;

    /// Close the socket; best effort
    async fn close(&mut self);
}

/// Read half of a tracker socket
#[async_trait]
pub trait SocketStream: Send {
    /// Next protocol message. `Ok(None)` on clean close, `Err` on a socket
    /// failure; either way the connection is finished.
    async fn recv(&mut self) -> Result<Option<String>>;
}

/// Establishes tracker sockets. This is the pluggable transport seam: the
/// default [`WsDialer`] dials directly; a proxying implementation can route
/// the connection however it likes.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a socket to `url`, returning its two halves
    async fn dial(&self, url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)>;
}

/// Direct WebSocket dialer (ws:// and wss://)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("dialing {url}: {e}")))?;
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink(sink)), Box::new(WsSource(stream))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl SocketSink for WsSink {
    async fn send(&mut self, frame: SocketFrame) -> Result<()> {
        let message = match frame {
            SocketFrame::Text(text) => Message::Text(text),
            SocketFrame::Ping => Message::Ping(Vec::new()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| Error::Transport(format!("socket send: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            debug!("socket close: {}", e);
        }
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl SocketStream for WsSource {
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // pongs and stray binary frames are not protocol messages
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::Transport(format!("socket receive: {e}"))),
            }
        }
    }
}
