//! Shared test doubles: in-memory tracker sockets and a mock peer engine
//!
//! `MemoryDialer` hands the test one `TrackerEnd` per dial, so a test plays
//! the tracker: it reads the frames the client writes and injects announce
//! responses. `MockConnector` records every engine call and lets the test
//! decide when a data channel "opens".

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use swarmlink::engine::{DataChannel, OpenHandler, OpenLatch, PeerConnector, PeerHandle};
use swarmlink::signaling::socket::{Dialer, SocketFrame, SocketSink, SocketStream};
use swarmlink::{Error, Result, SwarmConfig};

pub const SAMPLE_SDP: &str = "v=0\r\no=- 123 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

pub fn sample_offer() -> RTCSessionDescription {
    RTCSessionDescription::offer(SAMPLE_SDP.to_string()).unwrap()
}

pub fn sample_answer() -> RTCSessionDescription {
    RTCSessionDescription::answer(SAMPLE_SDP.to_string()).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Config with intervals short enough for tests
pub fn test_config(num_want: usize) -> SwarmConfig {
    SwarmConfig {
        trackers: vec!["ws://tracker.test".to_string()],
        identifier: "swarmlink-tests".to_string(),
        num_want,
        announce_interval: Duration::from_millis(200),
        keepalive_interval: Duration::from_secs(60),
        handshake_timeout: Duration::from_secs(5),
        reconnect_backoff: Duration::from_millis(20),
        stun_servers: Vec::new(),
        accept_queue_capacity: 8,
    }
}

// ---- in-memory tracker socket --------------------------------------------

/// Test-side handle to one accepted control-channel connection
pub struct TrackerEnd {
    /// Frames the client wrote
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Feed for messages "from the tracker"
    pub inbound: mpsc::UnboundedSender<String>,
    /// Keepalive pings the client sent
    pub pings: Arc<AtomicU64>,
}

impl TrackerEnd {
    pub fn inject(&self, text: impl Into<String>) {
        let _ = self.inbound.send(text.into());
    }

    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client socket closed")
    }

    /// Wait until the client has dropped its write half
    pub async fn wait_closed(&mut self) {
        let deadline = Duration::from_secs(2);
        tokio::time::timeout(deadline, async {
            while self.outbound.recv().await.is_some() {}
        })
        .await
        .expect("client never closed its socket");
    }

    /// Simulate the tracker dropping the connection
    pub fn disconnect(self) {}
}

/// Dialer producing in-memory socket pairs; dials block until a permit is
/// available, so tests control when "connectivity" exists.
pub struct MemoryDialer {
    permits: Semaphore,
    accepted: mpsc::UnboundedSender<TrackerEnd>,
    dials: AtomicUsize,
}

impl MemoryDialer {
    pub fn new(initial_permits: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<TrackerEnd>) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                permits: Semaphore::new(initial_permits),
                accepted,
                dials: AtomicUsize::new(0),
            }),
            accepted_rx,
        )
    }

    pub fn allow_dials(&self, n: usize) {
        self.permits.add_permits(n);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, _url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Transport("dialer shut down".to_string()))?;
        permit.forget();
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let pings = Arc::new(AtomicU64::new(0));

        let end = TrackerEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
            pings: pings.clone(),
        };
        let _ = self.accepted.send(end);

        Ok((
            Box::new(MemSink {
                tx: outbound_tx,
                pings,
                closed: closed_tx,
            }),
            Box::new(MemStream {
                rx: inbound_rx,
                closed: closed_rx,
            }),
        ))
    }
}

struct MemSink {
    tx: mpsc::UnboundedSender<String>,
    pings: Arc<AtomicU64>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl SocketSink for MemSink {
    async fn send(&mut self, frame: SocketFrame) -> Result<()> {
        if *self.closed.borrow() || self.tx.is_closed() {
            return Err(Error::Transport("socket closed".to_string()));
        }
        match frame {
            SocketFrame::Text(text) => self
                .tx
                .send(text)
                .map_err(|_| Error::Transport("socket closed".to_string())),
            SocketFrame::Ping => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.closed.send(true);
    }
}

struct MemStream {
    rx: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl SocketStream for MemStream {
    async fn recv(&mut self) -> Result<Option<String>> {
        let MemStream { rx, closed } = self;
        tokio::select! {
            message = rx.recv() => Ok(message),
            _ = closed.wait_for(|c| *c) => Ok(None),
        }
    }
}

// ---- mock peer-connection engine -----------------------------------------

/// Engine double recording every call; channels open when the test says so
pub struct MockConnector {
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    /// Fail `create_offer` once this many offers exist (for error-path
    /// tests); `usize::MAX` means never
    pub fail_offers_after: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            offers_created: AtomicUsize::new(0),
            answers_created: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            fail_offers_after: AtomicUsize::new(usize::MAX),
        }
    }
}

impl MockConnector {
    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    pub fn offer_handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles
            .lock()
            .iter()
            .filter(|h| h.kind == "offer")
            .cloned()
            .collect()
    }

    pub fn answer_handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles
            .lock()
            .iter()
            .filter(|h| h.kind == "answer")
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create_offer(&self) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)> {
        if self.offers_created.load(Ordering::SeqCst)
            >= self.fail_offers_after.load(Ordering::SeqCst)
        {
            return Err(Error::Engine("injected offer failure".to_string()));
        }
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(MockHandle::new("offer"));
        self.handles.lock().push(handle.clone());
        Ok((handle, sample_offer()))
    }

    async fn create_answerer(
        &self,
        _remote: &RTCSessionDescription,
    ) -> Result<(Arc<dyn PeerHandle>, RTCSessionDescription)> {
        self.answers_created.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(MockHandle::new("answer"));
        self.handles.lock().push(handle.clone());
        Ok((handle, sample_answer()))
    }
}

/// One mock peer connection
pub struct MockHandle {
    pub kind: &'static str,
    closed: AtomicBool,
    answered: Mutex<Option<RTCSessionDescription>>,
    latch: OpenLatch,
}

impl MockHandle {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            closed: AtomicBool::new(false),
            answered: Mutex::new(None),
            latch: OpenLatch::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_answered(&self) -> bool {
        self.answered.lock().is_some()
    }

    /// Pretend the data channel just opened
    pub fn open_channel(&self) {
        self.latch.open(Arc::new(MockChannel::default()));
    }
}

#[async_trait]
impl PeerHandle for MockHandle {
    async fn apply_answer(
        &self,
        answer: RTCSessionDescription,
        on_open: OpenHandler,
    ) -> Result<()> {
        *self.answered.lock() = Some(answer);
        self.latch.arm(on_open);
        Ok(())
    }

    fn on_channel_open(&self, on_open: OpenHandler) {
        self.latch.arm(on_open);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockChannel {
    closed: AtomicBool,
}

#[async_trait]
impl DataChannel for MockChannel {
    async fn send(&self, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        None
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Poll `predicate` until it holds or the deadline passes
pub async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
