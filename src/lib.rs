//! Peer discovery and direct WebRTC data channels over WebTorrent tracker
//! signaling
//!
//! Processes that share a swarm identifier find each other through ordinary
//! WebTorrent trackers: each announces connection offers over a persistent
//! WebSocket, the tracker relays offers and answers between peers, and once
//! a pair completes the exchange they talk directly over a WebRTC data
//! channel. The tracker never carries application data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  TrackerRegistry                                     │
//! │  ├─ TrackerClient per URL (ref-counted)              │
//! │  │   ├─ connect/read loop + keepalive                │
//! │  │   ├─ offer table with timeout eviction            │
//! │  │   └─ announce protocol codec                      │
//! │  ├─ periodic announce ticker                         │
//! │  └─ PeerListener (accept queue)                      │
//! │       ↓                                              │
//! │  PeerStream: direct data channel + negotiation info  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use swarmlink::{SwarmConfig, TrackerRegistry};
//!
//! let config = SwarmConfig::new(
//!     "my-application-v1",
//!     vec!["wss://tracker.openwebtorrent.com".to_string()],
//! );
//! let (registry, mut listener) = TrackerRegistry::new(config)?;
//! registry.start().await?;
//!
//! while let Some(peer) = listener.accept().await {
//!     println!("connected to {}", peer.context().peer_id);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
mod ident;
mod registry;
pub mod signaling;
mod stream;

pub use config::SwarmConfig;
pub use error::{Error, Result};
pub use ident::{InfoHash, OfferId, PeerId, ID_LEN};
pub use registry::{TrackerLease, TrackerRegistry};
pub use signaling::{TrackerClient, TrackerClientStats};
pub use stream::{NegotiationContext, PeerListener, PeerStream};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
