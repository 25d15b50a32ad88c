//! Peer-connection engine abstraction
//!
//! The signaling layer never talks to WebRTC directly. It asks a
//! [`PeerConnector`] for offers and answerers, applies remote answers
//! through [`PeerHandle`], and receives the finished [`DataChannel`] through
//! an open callback. [`WebRtcConnector`] is the production implementation;
//! tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::Result;

mod rtc;

pub use rtc::WebRtcConnector;

/// Callback fired exactly once when a negotiated data channel opens
pub type OpenHandler = Box<dyn FnOnce(Arc<dyn DataChannel>) -> BoxFuture<'static, ()> + Send>;

/// A byte channel to a single remote peer
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send one message to the peer
    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Receive the next message; `None` once the channel is closed
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Whether the channel is currently open
    fn is_open(&self) -> bool;

    /// Close the channel
    async fn close(&self);
}

/// Owned handle to one (possibly still unestablished) peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Apply the remote answer to a connection this side offered. `on_open`
    /// fires once when the data channel opens.
    async fn apply_answer(&self, answer: RTCSessionDescription, on_open: OpenHandler)
        -> Result<()>;

    /// Register for the remote-created data channel on a connection this
    /// side answered. If the channel already opened before registration, the
    /// handler fires immediately.
    fn on_channel_open(&self, on_open: OpenHandler);

    /// Dispose the peer connection and everything it owns
    async fn close(&self);
}

/// Creates peer connections for both negotiation directions
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection this side offers. Returns the owned handle and
    /// the local offer description, candidates included.
    async fn create_offer(&self) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)>;

    /// Create a connection answering a remote offer. Returns the owned
    /// handle and the local answer description, candidates included.
    async fn create_answerer(
        &self,
        remote: &RTCSessionDescription,
    ) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)>;
}

/// Single-fire rendezvous between "the channel opened" and "someone wants to
/// know".
///
/// Whichever arrives first parks; the second arrival fires the handler on a
/// spawned task. [`PeerHandle`] implementations use this to honor the
/// fire-immediately contract of [`PeerHandle::on_channel_open`] without
/// caring which side of the race they are on.
#[derive(Clone, Default)]
pub struct OpenLatch {
    inner: Arc<Mutex<LatchInner>>,
}

#[derive(Default)]
struct LatchInner {
    handler: Option<OpenHandler>,
    channel: Option<Arc<dyn DataChannel>>,
    fired: bool,
}

impl OpenLatch {
    /// Record that the data channel is open
    pub fn open(&self, channel: Arc<dyn DataChannel>) {
        let mut inner = self.inner.lock();
        inner.channel = Some(channel);
        Self::try_fire(&mut inner);
    }

    /// Register the handler to fire on open
    pub fn arm(&self, handler: OpenHandler) {
        let mut inner = self.inner.lock();
        inner.handler = Some(handler);
        Self::try_fire(&mut inner);
    }

    fn try_fire(inner: &mut LatchInner) {
        if inner.fired || inner.handler.is_none() || inner.channel.is_none() {
            return;
        }
        inner.fired = true;
        if let (Some(handler), Some(channel)) = (inner.handler.take(), inner.channel.take()) {
            tokio::spawn(handler(channel));
        }
    }
}
