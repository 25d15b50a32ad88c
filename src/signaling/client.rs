//! Tracker signaling client
//!
//! One client owns one control-channel connection to one tracker URL. A
//! background task dials, reads, and redials with a fixed backoff; announces
//! batch fresh connection offers to the tracker; inbound messages are
//! matched against the offer table or answered on the spot. Completed
//! negotiations surface as [`PeerStream`]s on the shared accept queue.
//!
//! Locking: one async mutex guards the socket sink, both negotiation
//! tables, and the counters. Every table mutation happens under it, which
//! makes "first of {match, timeout, close} wins" a property of the map
//! rather than something the timer has to get right.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::SwarmConfig;
use crate::engine::{OpenHandler, PeerConnector, PeerHandle};
use crate::ident::{InfoHash, OfferId, PeerId};
use crate::signaling::protocol::{AnnounceOffer, AnnounceRequest, AnnounceResponse};
use crate::signaling::socket::{Dialer, SocketFrame, SocketSink};
use crate::stream::{NegotiationContext, PeerStream};
use crate::{Error, Result};

/// Diagnostic counters for one tracker client
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerClientStats {
    /// Control-channel dial attempts
    pub dials: u64,
    /// Announce messages written
    pub announces: u64,
    /// Outbound offers matched by an answer
    pub offers_answered: u64,
    /// Outbound offers that expired unanswered
    pub offers_expired: u64,
    /// Answered (inbound) negotiations that never produced a channel
    pub answers_expired: u64,
    /// Data channels opened for offers this client sent
    pub outbound_conversions: u64,
    /// Data channels opened for offers this client answered
    pub inbound_conversions: u64,
    /// Messages discarded: wrong swarm, loopback, or unknown offer id
    pub ignored_messages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connected,
    Closed,
}

struct OutboundOffer {
    handle: Arc<dyn PeerHandle>,
    description: RTCSessionDescription,
    timeout: AbortHandle,
}

struct PendingAnswer {
    handle: Arc<dyn PeerHandle>,
    timeout: AbortHandle,
}

struct ClientState {
    sink: Option<Box<dyn SocketSink>>,
    offers: HashMap<OfferId, OutboundOffer>,
    answering: HashMap<u64, PendingAnswer>,
    closed: bool,
    stats: TrackerClientStats,
}

/// Offers created for an announce that has not been sent yet. If the
/// announce aborts at any point, dropping the batch disposes the handles.
#[derive(Default)]
struct OfferBatch {
    offers: Vec<(OfferId, Arc<dyn PeerHandle>, RTCSessionDescription)>,
}

impl OfferBatch {
    fn take(&mut self) -> Vec<(OfferId, Arc<dyn PeerHandle>, RTCSessionDescription)> {
        std::mem::take(&mut self.offers)
    }
}

impl Drop for OfferBatch {
    fn drop(&mut self) {
        for (_, handle, _) in self.offers.drain(..) {
            tokio::spawn(async move { handle.close().await });
        }
    }
}

struct ClientShared {
    url: String,
    peer_id_hex: String,
    info_hash_hex: String,
    num_want: usize,
    handshake_timeout: Duration,
    keepalive_interval: Duration,
    reconnect_backoff: Duration,
    engine: Arc<dyn PeerConnector>,
    dialer: Arc<dyn Dialer>,
    events: mpsc::Sender<PeerStream>,
    state: Mutex<ClientState>,
    conn: watch::Sender<ConnState>,
    answer_seq: AtomicU64,
}

/// Signaling client for one tracker URL. Cheap to clone; all clones share
/// the same connection and offer table.
#[derive(Clone)]
pub struct TrackerClient {
    shared: Arc<ClientShared>,
    started: Arc<AtomicBool>,
}

impl TrackerClient {
    /// Create a client for `url`. Nothing happens until [`start`] spawns the
    /// connection loop.
    ///
    /// [`start`]: TrackerClient::start
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: String,
        peer_id: PeerId,
        info_hash: InfoHash,
        config: &SwarmConfig,
        engine: Arc<dyn PeerConnector>,
        dialer: Arc<dyn Dialer>,
        events: mpsc::Sender<PeerStream>,
    ) -> Self {
        let (conn, _) = watch::channel(ConnState::Disconnected);
        Self {
            shared: Arc::new(ClientShared {
                url,
                peer_id_hex: peer_id.as_hex(),
                info_hash_hex: info_hash.as_hex(),
                num_want: config.num_want,
                handshake_timeout: config.handshake_timeout,
                keepalive_interval: config.keepalive_interval,
                reconnect_backoff: config.reconnect_backoff,
                engine,
                dialer,
                events,
                state: Mutex::new(ClientState {
                    sink: None,
                    offers: HashMap::new(),
                    answering: HashMap::new(),
                    closed: false,
                    stats: TrackerClientStats::default(),
                }),
                conn,
                answer_seq: AtomicU64::new(0),
            }),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the connection loop. Idempotent.
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(ClientShared::run(Arc::clone(&self.shared)));
        }
    }

    /// Generate `num_want` fresh offers and announce them to the tracker.
    ///
    /// Suspends while no control-channel connection exists; fails with
    /// [`Error::Closed`] once the client is closed. On any failure the
    /// offers created for this call are disposed.
    pub async fn announce(&self) -> Result<()> {
        self.shared.announce_offers(self.shared.num_want).await
    }

    /// Close the client: terminate the connection loop, drop the socket, and
    /// dispose every pending negotiation. Idempotent.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    /// Snapshot of the diagnostic counters
    pub async fn stats(&self) -> TrackerClientStats {
        self.shared.state.lock().await.stats
    }

    /// Whether a control-channel connection is currently established
    pub fn is_connected(&self) -> bool {
        *self.shared.conn.borrow() == ConnState::Connected
    }

    /// The tracker URL this client announces to
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

impl ClientShared {
    // ---- connection loop ---------------------------------------------

    async fn run(self: Arc<Self>) {
        let mut conn_rx = self.conn.subscribe();
        loop {
            if self.is_closed().await {
                break;
            }
            match self.run_connection().await {
                Ok(()) => debug!("tracker {} connection ended", self.url),
                Err(e) => debug!("tracker {} connection ended: {}", self.url, e),
            }
            if self.is_closed().await {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_backoff) => {}
                _ = conn_rx.wait_for(|s| *s == ConnState::Closed) => break,
            }
        }
        debug!("tracker {} client loop terminated", self.url);
    }

    /// One dial-to-disconnect cycle
    async fn run_connection(self: &Arc<Self>) -> Result<()> {
        self.state.lock().await.stats.dials += 1;
        let mut conn_rx = self.conn.subscribe();
        let (sink, mut stream) = tokio::select! {
            dialed = self.dialer.dial(&self.url) => dialed?,
            _ = conn_rx.wait_for(|s| *s == ConnState::Closed) => return Ok(()),
        };
        debug!("connected to tracker {}", self.url);

        // Install the socket and pull out offers stranded by the previous
        // connection; the tracker cannot be assumed to remember them.
        let stale: Vec<(OfferId, OutboundOffer)> = {
            let mut st = self.state.lock().await;
            if st.closed {
                drop(st);
                let mut sink = sink;
                sink.close().await;
                return Ok(());
            }
            st.sink = Some(sink);
            self.set_conn(&st, ConnState::Connected);
            st.offers.drain().collect()
        };

        if !stale.is_empty() {
            info!(
                "tracker {}: discarding {} offers from the previous connection and reannouncing",
                self.url,
                stale.len()
            );
            for (_, offer) in stale {
                offer.timeout.abort();
                offer.handle.close().await;
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = shared.announce_offers(1).await {
                        debug!("reannounce after reconnect failed: {}", e);
                    }
                });
            }
        }

        let keepalive = tokio::spawn(Self::keepalive_loop(Arc::clone(self)));

        let result = loop {
            match stream.recv().await {
                Ok(Some(text)) => self.dispatch(&text).await,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        keepalive.abort();
        {
            let mut st = self.state.lock().await;
            if let Some(mut sink) = st.sink.take() {
                sink.close().await;
            }
            self.set_conn(&st, ConnState::Disconnected);
        }
        result
    }

    async fn keepalive_loop(shared: Arc<Self>) {
        let mut ticker = tokio::time::interval(shared.keepalive_interval);
        ticker.tick().await; // the immediate first tick
        loop {
            ticker.tick().await;
            let mut st = shared.state.lock().await;
            if st.closed {
                return;
            }
            let Some(sink) = st.sink.as_mut() else {
                return;
            };
            if let Err(e) = sink.send(SocketFrame::Ping).await {
                warn!("tracker {} keepalive failed: {}", shared.url, e);
                // surface the dead socket to the read loop by closing it
                if let Some(mut sink) = st.sink.take() {
                    sink.close().await;
                }
                shared.set_conn(&st, ConnState::Disconnected);
                return;
            }
        }
    }

    fn set_conn(&self, st: &ClientState, value: ConnState) {
        if !st.closed {
            self.conn.send_replace(value);
        }
    }

    async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    // ---- sending ------------------------------------------------------

    /// Write `payload` to the tracker, suspending until a connection exists.
    /// `on_sent` runs under the client lock immediately after a successful
    /// write, before any inbound message can be dispatched.
    async fn send_text_with<F>(self: &Arc<Self>, payload: String, on_sent: F) -> Result<()>
    where
        F: FnOnce(&Arc<Self>, &mut ClientState),
    {
        let mut conn_rx = self.conn.subscribe();
        let mut on_sent = Some(on_sent);
        loop {
            {
                let mut st = self.state.lock().await;
                if st.closed {
                    return Err(Error::Closed);
                }
                if let Some(sink) = st.sink.as_mut() {
                    return match sink.send(SocketFrame::Text(payload.clone())).await {
                        Ok(()) => {
                            if let Some(f) = on_sent.take() {
                                f(self, &mut st);
                            }
                            Ok(())
                        }
                        Err(e) => {
                            warn!("tracker {} send failed: {}", self.url, e);
                            if let Some(mut sink) = st.sink.take() {
                                sink.close().await;
                            }
                            self.set_conn(&st, ConnState::Disconnected);
                            Err(e)
                        }
                    };
                }
            }
            // no connection: park until one appears or the client closes
            if conn_rx
                .wait_for(|s| *s != ConnState::Disconnected)
                .await
                .is_err()
            {
                return Err(Error::Closed);
            }
        }
    }

    /// Write `payload` on the live connection, failing fast when none
    /// exists. Dispatch replies use this rather than the suspending path:
    /// an answer only makes sense on the socket its offer arrived on, and
    /// the read loop must never park waiting for a reconnect it would
    /// itself have to drive.
    async fn send_now_with<F>(self: &Arc<Self>, payload: String, on_sent: F) -> Result<()>
    where
        F: FnOnce(&Arc<Self>, &mut ClientState),
    {
        let mut st = self.state.lock().await;
        if st.closed {
            return Err(Error::Closed);
        }
        let Some(sink) = st.sink.as_mut() else {
            return Err(Error::Transport("not connected".to_string()));
        };
        match sink.send(SocketFrame::Text(payload)).await {
            Ok(()) => {
                on_sent(self, &mut st);
                Ok(())
            }
            Err(e) => {
                warn!("tracker {} send failed: {}", self.url, e);
                if let Some(mut sink) = st.sink.take() {
                    sink.close().await;
                }
                self.set_conn(&st, ConnState::Disconnected);
                Err(e)
            }
        }
    }

    async fn announce_offers(self: &Arc<Self>, count: usize) -> Result<()> {
        if self.is_closed().await {
            return Err(Error::Closed);
        }

        let mut batch = OfferBatch::default();
        for _ in 0..count {
            let (handle, description) = self.engine.create_offer().await?;
            batch.offers.push((OfferId::generate(), handle, description));
        }

        let entries: Vec<AnnounceOffer> = batch
            .offers
            .iter()
            .map(|(id, _, description)| AnnounceOffer {
                offer_id: id.as_hex(),
                offer: description.clone(),
            })
            .collect();
        let request = AnnounceRequest::new(
            self.info_hash_hex.clone(),
            self.peer_id_hex.clone(),
            entries,
        );
        let payload = request.to_json()?;

        // The batch moves into the closure: registered on success, disposed
        // by its Drop when the send fails or the announce is cancelled.
        self.send_text_with(payload, move |shared, st| {
            for (id, handle, description) in batch.take() {
                let timeout = shared.spawn_offer_timeout(id);
                st.offers.insert(
                    id,
                    OutboundOffer {
                        handle,
                        description,
                        timeout,
                    },
                );
            }
            st.stats.announces += 1;
        })
        .await
    }

    // ---- timeouts -----------------------------------------------------

    fn spawn_offer_timeout(self: &Arc<Self>, id: OfferId) -> AbortHandle {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.handshake_timeout).await;
            let expired = {
                let mut st = shared.state.lock().await;
                let offer = st.offers.remove(&id);
                if offer.is_some() {
                    st.stats.offers_expired += 1;
                }
                offer
            };
            if let Some(offer) = expired {
                debug!("offer {} expired without an answer", id);
                offer.handle.close().await;
            }
        })
        .abort_handle()
    }

    fn spawn_answer_timeout(self: &Arc<Self>, seq: u64) -> AbortHandle {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.handshake_timeout).await;
            let expired = {
                let mut st = shared.state.lock().await;
                let pending = st.answering.remove(&seq);
                if pending.is_some() {
                    st.stats.answers_expired += 1;
                }
                pending
            };
            if let Some(pending) = expired {
                debug!("answered negotiation timed out before the channel opened");
                pending.handle.close().await;
            }
        })
        .abort_handle()
    }

    // ---- inbound dispatch ---------------------------------------------

    async fn dispatch(self: &Arc<Self>, text: &str) {
        let message = match AnnounceResponse::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("tracker {} sent a malformed message: {}", self.url, e);
                return;
            }
        };

        // another swarm sharing the same tracker socket
        if !message.info_hash.is_empty() && message.info_hash != self.info_hash_hex {
            debug!(
                "ignoring message for swarm {} (announcing {})",
                message.info_hash, self.info_hash_hex
            );
            self.bump_ignored().await;
            return;
        }

        // trackers fan announces back to their sender
        if message.peer_id.as_deref() == Some(self.peer_id_hex.as_str()) {
            self.bump_ignored().await;
            return;
        }

        if let Some(offer) = message.offer {
            let (Some(peer_hex), Some(offer_hex)) = (message.peer_id, message.offer_id) else {
                warn!("offer message missing peer or offer id");
                return;
            };
            let (Ok(peer_id), Ok(offer_id)) =
                (PeerId::from_hex(&peer_hex), OfferId::from_hex(&offer_hex))
            else {
                warn!("offer message with malformed identifiers");
                return;
            };
            if let Err(e) = self.handle_offer(offer, offer_id, peer_id).await {
                warn!("failed to answer offer from {}: {}", peer_id, e);
            }
        } else if let Some(answer) = message.answer {
            let (Some(peer_hex), Some(offer_hex)) = (message.peer_id, message.offer_id) else {
                warn!("answer message missing peer or offer id");
                return;
            };
            let (Ok(peer_id), Ok(offer_id)) =
                (PeerId::from_hex(&peer_hex), OfferId::from_hex(&offer_hex))
            else {
                warn!("answer message with malformed identifiers");
                return;
            };
            self.handle_answer(answer, offer_id, peer_id).await;
        }
    }

    async fn bump_ignored(&self) {
        self.state.lock().await.stats.ignored_messages += 1;
    }

    /// A remote peer offered a connection: answer it through the tracker and
    /// wait (bounded) for the data channel.
    async fn handle_offer(
        self: &Arc<Self>,
        offer: RTCSessionDescription,
        offer_id: OfferId,
        from: PeerId,
    ) -> Result<()> {
        let (handle, answer) = self.engine.create_answerer(&offer).await?;

        let reply = AnnounceResponse::answer(
            &self.info_hash_hex,
            &self.peer_id_hex,
            &from.as_hex(),
            answer.clone(),
            &offer_id.as_hex(),
        );
        let payload = match reply.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                handle.close().await;
                return Err(e);
            }
        };

        let seq = self.answer_seq.fetch_add(1, Ordering::Relaxed);
        let entry_handle = handle.clone();
        let sent = self
            .send_now_with(payload, move |shared, st| {
                let timeout = shared.spawn_answer_timeout(seq);
                st.answering.insert(
                    seq,
                    PendingAnswer {
                        handle: entry_handle,
                        timeout,
                    },
                );
            })
            .await;
        if let Err(e) = sent {
            handle.close().await;
            return Err(e);
        }

        let context = NegotiationContext {
            peer_id: from,
            offer_id,
            local_offered: false,
            local: answer,
            remote: offer,
        };
        handle.on_channel_open(self.inbound_open_handler(seq, handle.clone(), context));
        debug!("answered offer {} from {}", offer_id, from);
        Ok(())
    }

    /// An answer arrived for one of our offers
    async fn handle_answer(
        self: &Arc<Self>,
        answer: RTCSessionDescription,
        offer_id: OfferId,
        from: PeerId,
    ) {
        // A matched offer leaves the table for good: only one answer can
        // ever apply, whether or not the channel ends up opening.
        let offer = {
            let mut st = self.state.lock().await;
            match st.offers.remove(&offer_id) {
                Some(offer) => {
                    offer.timeout.abort();
                    st.stats.offers_answered += 1;
                    offer
                }
                None => {
                    st.stats.ignored_messages += 1;
                    drop(st);
                    debug!("answer for unknown or expired offer {}", offer_id);
                    return;
                }
            }
        };

        let context = NegotiationContext {
            peer_id: from,
            offer_id,
            local_offered: true,
            local: offer.description.clone(),
            remote: answer.clone(),
        };
        let handler = self.outbound_open_handler(offer.handle.clone(), context);
        if let Err(e) = offer.handle.apply_answer(answer, handler).await {
            warn!("could not apply answer for offer {}: {}", offer_id, e);
            offer.handle.close().await;
        }
    }

    // ---- completion ---------------------------------------------------

    fn outbound_open_handler(
        self: &Arc<Self>,
        handle: Arc<dyn PeerHandle>,
        context: NegotiationContext,
    ) -> OpenHandler {
        let shared = Arc::clone(self);
        Box::new(move |channel| {
            Box::pin(async move {
                shared.state.lock().await.stats.outbound_conversions += 1;
                debug!("offer {} produced a data channel", context.offer_id);
                let stream = PeerStream::new(channel, context, handle);
                if shared.events.send(stream).await.is_err() {
                    debug!("accept queue closed; dropping negotiated peer");
                }
            })
        })
    }

    fn inbound_open_handler(
        self: &Arc<Self>,
        seq: u64,
        handle: Arc<dyn PeerHandle>,
        context: NegotiationContext,
    ) -> OpenHandler {
        let shared = Arc::clone(self);
        Box::new(move |channel| {
            Box::pin(async move {
                let won = {
                    let mut st = shared.state.lock().await;
                    match st.answering.remove(&seq) {
                        Some(pending) => {
                            pending.timeout.abort();
                            st.stats.inbound_conversions += 1;
                            true
                        }
                        // the timeout fired first and disposed the handle
                        None => false,
                    }
                };
                if !won {
                    return;
                }
                debug!(
                    "answered offer {} produced a data channel",
                    context.offer_id
                );
                let stream = PeerStream::new(channel, context, handle);
                if shared.events.send(stream).await.is_err() {
                    debug!("accept queue closed; dropping negotiated peer");
                }
            })
        })
    }

    // ---- shutdown -----------------------------------------------------

    async fn close(&self) {
        let (sink, offers, answering) = {
            let mut st = self.state.lock().await;
            if st.closed {
                return;
            }
            st.closed = true;
            self.conn.send_replace(ConnState::Closed);
            (
                st.sink.take(),
                st.offers.drain().collect::<Vec<_>>(),
                st.answering.drain().collect::<Vec<_>>(),
            )
        };

        if let Some(mut sink) = sink {
            sink.close().await;
        }
        for (_, offer) in offers {
            offer.timeout.abort();
            offer.handle.close().await;
        }
        for (_, pending) in answering {
            pending.timeout.abort();
            pending.handle.close().await;
        }
        debug!("tracker {} client closed", self.url);
    }
}
