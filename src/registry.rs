//! Multi-tracker orchestration
//!
//! One [`TrackerClient`] per tracker URL, shared by reference count across
//! everyone interested in that URL, plus the ticker that keeps every client
//! re-announcing. Negotiated peers from all clients funnel into one
//! [`PeerListener`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::engine::{PeerConnector, WebRtcConnector};
use crate::ident::{InfoHash, PeerId};
use crate::signaling::client::TrackerClient;
use crate::signaling::socket::{Dialer, WsDialer};
use crate::stream::{PeerListener, PeerStream};
use crate::{Error, Result};

/// Proof of one [`TrackerRegistry::acquire`] call. Hand it back through
/// [`TrackerRegistry::release`]; consuming the lease makes double-release
/// unrepresentable.
#[must_use = "a tracker lease keeps its client alive until released"]
pub struct TrackerLease {
    url: String,
}

impl TrackerLease {
    /// The tracker URL this lease pins
    pub fn url(&self) -> &str {
        &self.url
    }
}

struct Entry {
    ref_count: usize,
    client: TrackerClient,
}

struct RegistryInner {
    clients: HashMap<String, Entry>,
    shutdown: bool,
}

struct Announcer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct RegistryCore {
    config: SwarmConfig,
    peer_id: PeerId,
    info_hash: InfoHash,
    engine: Arc<dyn PeerConnector>,
    dialer: Arc<dyn Dialer>,
    events: mpsc::Sender<PeerStream>,
    inner: Mutex<RegistryInner>,
    announcer: Mutex<Option<Announcer>>,
}

/// Registry of tracker signaling clients, keyed by URL.
///
/// Cheap to clone; all clones share the same clients and ticker.
#[derive(Clone)]
pub struct TrackerRegistry {
    core: Arc<RegistryCore>,
}

impl TrackerRegistry {
    /// Create a registry with the production WebRTC engine and WebSocket
    /// dialer. Returns the registry and the listener its negotiated peers
    /// arrive on.
    pub fn new(config: SwarmConfig) -> Result<(Self, PeerListener)> {
        let engine = Arc::new(WebRtcConnector::new(config.stun_servers.clone()));
        Self::with_parts(config, engine, Arc::new(WsDialer))
    }

    /// Create a registry with injected engine and dialer. This is how tests
    /// run the protocol in memory and how deployments plug in a proxying
    /// dialer.
    pub fn with_parts(
        config: SwarmConfig,
        engine: Arc<dyn PeerConnector>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<(Self, PeerListener)> {
        config.validate()?;
        let (events, rx) = mpsc::channel(config.accept_queue_capacity);
        let peer_id = PeerId::generate();
        let info_hash = InfoHash::from_identifier(&config.identifier);
        info!(
            "swarm {} ({}), local peer {}",
            config.identifier, info_hash, peer_id
        );
        let core = Arc::new(RegistryCore {
            config,
            peer_id,
            info_hash,
            engine,
            dialer,
            events,
            inner: Mutex::new(RegistryInner {
                clients: HashMap::new(),
                shutdown: false,
            }),
            announcer: Mutex::new(None),
        });
        Ok((Self { core }, PeerListener::new(rx)))
    }

    /// This process's peer identifier
    pub fn peer_id(&self) -> PeerId {
        self.core.peer_id
    }

    /// The swarm identifier derived from the configured identifier string
    pub fn info_hash(&self) -> InfoHash {
        self.core.info_hash
    }

    /// Acquire every configured tracker and start the periodic announcer
    pub async fn start(&self) -> Result<()> {
        for url in self.core.config.trackers.clone() {
            // the registry itself holds this reference; shutdown closes
            // every registered client regardless of outstanding leases
            let _lease = self.acquire(&url).await?;
        }
        self.spawn_announcer().await;
        Ok(())
    }

    /// Get (or create) the signaling client for `url` and pin it with a
    /// lease. The first acquisition starts the client's connection loop and
    /// issues its first announce.
    pub async fn acquire(&self, url: &str) -> Result<TrackerLease> {
        let mut inner = self.core.inner.lock().await;
        if inner.shutdown {
            return Err(Error::Closed);
        }

        if let Some(entry) = inner.clients.get_mut(url) {
            entry.ref_count += 1;
        } else {
            let client = TrackerClient::new(
                url.to_string(),
                self.core.peer_id,
                self.core.info_hash,
                &self.core.config,
                self.core.engine.clone(),
                self.core.dialer.clone(),
                self.core.events.clone(),
            );
            client.start();

            // first advertisement; delivered as soon as the control channel
            // is up, without holding up acquisition
            let announcing = client.clone();
            tokio::spawn(async move {
                if let Err(e) = announcing.announce().await {
                    debug!(
                        "first announce to {} failed: {}",
                        announcing.url(),
                        e
                    );
                }
            });

            info!("tracker client created for {}", url);
            inner.clients.insert(
                url.to_string(),
                Entry {
                    ref_count: 1,
                    client,
                },
            );
        }

        Ok(TrackerLease {
            url: url.to_string(),
        })
    }

    /// Return a lease. When the last lease for a URL goes, its client is
    /// closed and removed. Releasing after [`shutdown`](Self::shutdown) is a
    /// no-op; the client is already closed.
    pub async fn release(&self, lease: TrackerLease) {
        let closing = {
            let mut inner = self.core.inner.lock().await;
            if inner.shutdown {
                return;
            }
            let entry = match inner.clients.get_mut(&lease.url) {
                Some(entry) => entry,
                // a lease outliving its entry means acquire/release pairing
                // is broken somewhere; that is a bug, not a runtime state
                None => unreachable!("tracker lease released for unknown url {}", lease.url),
            };
            assert!(entry.ref_count > 0, "tracker client reference underflow");
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                inner.clients.remove(&lease.url).map(|entry| entry.client)
            } else {
                None
            }
        };

        if let Some(client) = closing {
            client.close().await;
            info!("tracker client for {} released and closed", lease.url);
        }
    }

    /// Number of currently registered tracker clients
    pub async fn tracker_count(&self) -> usize {
        self.core.inner.lock().await.clients.len()
    }

    /// Stop the periodic announcer, then close every registered client.
    /// After this returns, no further announces are issued.
    pub async fn shutdown(&self) {
        if let Some(announcer) = self.core.announcer.lock().await.take() {
            let _ = announcer.stop.send(true);
            // joining guarantees the ticker cannot announce past this point
            let _ = announcer.task.await;
        }

        let clients: Vec<TrackerClient> = {
            let mut inner = self.core.inner.lock().await;
            inner.shutdown = true;
            inner
                .clients
                .drain()
                .map(|(_, entry)| entry.client)
                .collect()
        };
        for client in &clients {
            client.close().await;
        }
        if !clients.is_empty() {
            info!("closed {} tracker clients", clients.len());
        }
    }

    async fn spawn_announcer(&self) {
        let mut slot = self.core.announcer.lock().await;
        if slot.is_some() {
            return;
        }
        let (stop, mut stop_rx) = watch::channel(false);
        let core = Arc::downgrade(&self.core);
        let period = self.core.config.announce_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => return,
                }
                let Some(core) = core.upgrade() else { return };
                let clients: Vec<TrackerClient> = core
                    .inner
                    .lock()
                    .await
                    .clients
                    .values()
                    .map(|entry| entry.client.clone())
                    .collect();
                for client in clients {
                    // a disconnected client reannounces by itself on
                    // reconnect; skipping it keeps one dead tracker from
                    // stalling announces to the others
                    if !client.is_connected() {
                        continue;
                    }
                    tokio::select! {
                        result = client.announce() => {
                            if let Err(e) = result {
                                debug!("periodic announce to {} failed: {}", client.url(), e);
                            }
                        }
                        _ = stop_rx.changed() => return,
                    }
                }
            }
        });

        *slot = Some(Announcer { stop, task });
    }
}
