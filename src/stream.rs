//! Negotiated peer streams and the accept queue

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::engine::{DataChannel, PeerHandle};
use crate::ident::{OfferId, PeerId};
use crate::Result;

/// How a peer stream came to exist: who offered, which offer it was, and the
/// session descriptions both sides settled on. Diagnostic; the stream itself
/// is in [`PeerStream`].
#[derive(Clone)]
pub struct NegotiationContext {
    /// The remote peer's identifier
    pub peer_id: PeerId,

    /// The offer this negotiation completed
    pub offer_id: OfferId,

    /// True when this side sent the offer, false when it answered
    pub local_offered: bool,

    /// This side's session description
    pub local: RTCSessionDescription,

    /// The remote side's session description
    pub remote: RTCSessionDescription,
}

impl fmt::Debug for NegotiationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationContext")
            .field("peer_id", &self.peer_id)
            .field("offer_id", &self.offer_id)
            .field("local_offered", &self.local_offered)
            .finish_non_exhaustive()
    }
}

/// A direct bidirectional stream to one remote peer.
///
/// Owns the underlying peer connection: dropping the stream without calling
/// [`PeerStream::close`] keeps the connection alive until the last clone of
/// the channel goes away.
pub struct PeerStream {
    channel: Arc<dyn DataChannel>,
    context: NegotiationContext,
    // keeps the peer connection alive for as long as the stream is held
    handle: Arc<dyn PeerHandle>,
}

impl PeerStream {
    pub(crate) fn new(
        channel: Arc<dyn DataChannel>,
        context: NegotiationContext,
        handle: Arc<dyn PeerHandle>,
    ) -> Self {
        Self {
            channel,
            context,
            handle,
        }
    }

    /// The open data channel
    pub fn channel(&self) -> Arc<dyn DataChannel> {
        self.channel.clone()
    }

    /// How this stream was negotiated
    pub fn context(&self) -> &NegotiationContext {
        &self.context
    }

    /// Send one message to the peer
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.channel.send(data).await
    }

    /// Receive the next message; `None` once the channel is closed
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.channel.recv().await
    }

    /// Close the data channel and its peer connection
    pub async fn close(&self) {
        self.channel.close().await;
        self.handle.close().await;
    }
}

impl fmt::Debug for PeerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerStream")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Accept queue of peers negotiated by any tracker in the registry
pub struct PeerListener {
    rx: mpsc::Receiver<PeerStream>,
}

impl PeerListener {
    pub(crate) fn new(rx: mpsc::Receiver<PeerStream>) -> Self {
        Self { rx }
    }

    /// Wait for the next negotiated peer. `None` once the registry has shut
    /// down and the queue drained.
    pub async fn accept(&mut self) -> Option<PeerStream> {
        self.rx.recv().await
    }
}
