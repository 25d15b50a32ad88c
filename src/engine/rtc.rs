//! Production peer-connection engine on the `webrtc` crate
//!
//! Announce-protocol trackers relay only offers and answers, never ICE
//! candidates, so both sides run non-trickle: descriptions are returned only
//! after ICE gathering completes and therefore carry embedded candidates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{DataChannel, OpenHandler, OpenLatch, PeerConnector, PeerHandle};
use crate::{Error, Result};

const DATA_CHANNEL_LABEL: &str = "swarmlink";

/// Upper bound on ICE gathering; a description without every candidate is
/// still usable, an indefinitely blocked negotiation is not.
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

const MESSAGE_BUFFER: usize = 64;

/// Peer-connection engine backed by the `webrtc` crate
pub struct WebRtcConnector {
    stun_servers: Vec<String>,
}

impl WebRtcConnector {
    /// Create an engine using the given STUN servers for candidate gathering
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }

    async fn new_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Engine(format!("registering codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::Engine(format!("registering interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await
        .map(Arc::new)
        .map_err(|e| Error::Engine(format!("creating peer connection: {e}")))
    }
}

/// Set the local description and wait for gathering so the returned SDP has
/// candidates embedded.
async fn gathered_local_description(
    pc: &Arc<RTCPeerConnection>,
    local: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let mut gathering_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(local)
        .await
        .map_err(|e| Error::Engine(format!("setting local description: {e}")))?;
    let _ = tokio::time::timeout(GATHER_TIMEOUT, gathering_complete.recv()).await;

    pc.local_description()
        .await
        .ok_or_else(|| Error::Engine("no local description after ICE gathering".to_string()))
}

/// Bridge an `RTCDataChannel` into our [`DataChannel`] and report its open
/// event to the latch.
fn wire_channel(dc: Arc<RTCDataChannel>, latch: OpenLatch) {
    let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
    let channel = Arc::new(WebRtcChannel {
        dc: dc.clone(),
        rx: Mutex::new(rx),
    });

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            // receiver dropped means the application let go of the stream
            let _ = tx.send(msg.data.to_vec()).await;
        })
    }));

    dc.on_open(Box::new(move || {
        let latch = latch.clone();
        let channel = channel.clone();
        Box::pin(async move {
            latch.open(channel);
        })
    }));
}

struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.dc
            .send(&Bytes::from(data))
            .await
            .map(|_| ())
            .map_err(|e| Error::Engine(format!("data channel send: {e}")))
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!("data channel close: {}", e);
        }
    }
}

struct WebRtcHandle {
    pc: Arc<RTCPeerConnection>,
    latch: OpenLatch,
}

#[async_trait]
impl PeerHandle for WebRtcHandle {
    async fn apply_answer(
        &self,
        answer: RTCSessionDescription,
        on_open: OpenHandler,
    ) -> Result<()> {
        // arm first: the channel may open the instant the answer applies
        self.latch.arm(on_open);
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Engine(format!("applying remote answer: {e}")))
    }

    fn on_channel_open(&self, on_open: OpenHandler) {
        self.latch.arm(on_open);
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("peer connection close: {}", e);
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_offer(&self) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)> {
        let pc = self.new_connection().await?;

        let dc = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(|e| Error::Engine(format!("creating data channel: {e}")))?;

        let latch = OpenLatch::default();
        wire_channel(dc, latch.clone());

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Engine(format!("creating offer: {e}")))?;
        let description = gathered_local_description(&pc, offer).await?;

        Ok((Arc::new(WebRtcHandle { pc, latch }), description))
    }

    async fn create_answerer(
        &self,
        remote: &RTCSessionDescription,
    ) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)> {
        let pc = self.new_connection().await?;
        let latch = OpenLatch::default();

        // register before set_remote_description so the remote-created
        // channel cannot slip past the handler
        let dc_latch = latch.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let dc_latch = dc_latch.clone();
            Box::pin(async move {
                debug!("received data channel {:?}", dc.label());
                wire_channel(dc, dc_latch);
            })
        }));

        pc.set_remote_description(remote.clone())
            .await
            .map_err(|e| Error::Engine(format!("applying remote offer: {e}")))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Engine(format!("creating answer: {e}")))?;
        let description = gathered_local_description(&pc, answer).await?;

        Ok((Arc::new(WebRtcHandle { pc, latch }), description))
    }
}
