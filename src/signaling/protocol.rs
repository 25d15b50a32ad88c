//! WebTorrent tracker announce protocol types
//!
//! Field names are the compatibility surface: they must match what announce
//! trackers emit and expect byte-for-byte, and optional response fields are
//! omitted rather than sent as `null`. The protocol carries no real transfer
//! accounting; `uploaded`/`downloaded`/`left` are fixed sentinels.
//!
//! All 20-byte identifiers (`info_hash`, `peer_id`, `to_peer_id`,
//! `offer_id`) travel hex-encoded; see [`crate::ident`].

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::{Error, Result};

/// The only announce action this protocol uses
pub const ACTION_ANNOUNCE: &str = "announce";

/// Sentinel: the tracker is a rendezvous, not a download accountant
const LEFT_UNKNOWN: i64 = -1;

/// One announce message carrying a batch of connection offers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    /// How many peers the sender wants back
    pub numwant: usize,

    /// Transfer accounting sentinel (always 0)
    pub uploaded: i64,

    /// Transfer accounting sentinel (always 0)
    pub downloaded: i64,

    /// Transfer accounting sentinel (always -1)
    pub left: i64,

    /// Always "announce"
    pub action: String,

    /// Swarm identifier, hex
    pub info_hash: String,

    /// Announcing peer's identifier, hex
    pub peer_id: String,

    /// Connection offers for the tracker to fan out
    pub offers: Vec<AnnounceOffer>,
}

/// One offer inside an announce request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceOffer {
    /// Offer identifier, hex; echoed back with the matching answer
    pub offer_id: String,

    /// The offer session description
    pub offer: RTCSessionDescription,
}

/// A message received from (or, for answers, sent back through) the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceResponse {
    /// Swarm identifier, hex; empty when the tracker omits it
    #[serde(default)]
    pub info_hash: String,

    /// Always "announce"
    #[serde(default)]
    pub action: String,

    /// Tracker-suggested re-announce interval, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,

    /// Seeder count reported by the tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<i64>,

    /// Leecher count reported by the tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete: Option<i64>,

    /// Originating peer's identifier, hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Destination peer's identifier, hex (set on relayed answers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_peer_id: Option<String>,

    /// Answer session description, present on answer messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<RTCSessionDescription>,

    /// Offer session description, present on relayed offers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<RTCSessionDescription>,

    /// Identifier of the offer this message refers to, hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
}

impl AnnounceRequest {
    /// Build an announce carrying `offers`; `numwant` mirrors the batch size
    pub fn new(info_hash: String, peer_id: String, offers: Vec<AnnounceOffer>) -> Self {
        Self {
            numwant: offers.len(),
            uploaded: 0,
            downloaded: 0,
            left: LEFT_UNKNOWN,
            action: ACTION_ANNOUNCE.to_string(),
            info_hash,
            peer_id,
            offers,
        }
    }

    /// Convert to the wire JSON text
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("encoding announce request: {e}")))
    }

    /// Parse from wire JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("decoding announce request: {e}")))
    }
}

impl AnnounceResponse {
    /// Build the answer message sent back through the tracker for a received
    /// offer.
    pub fn answer(
        info_hash: &str,
        peer_id: &str,
        to_peer_id: &str,
        answer: RTCSessionDescription,
        offer_id: &str,
    ) -> Self {
        Self {
            info_hash: info_hash.to_string(),
            action: ACTION_ANNOUNCE.to_string(),
            interval: None,
            complete: None,
            incomplete: None,
            peer_id: Some(peer_id.to_string()),
            to_peer_id: Some(to_peer_id.to_string()),
            answer: Some(answer),
            offer: None,
            offer_id: Some(offer_id.to_string()),
        }
    }

    /// Convert to the wire JSON text
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("encoding announce response: {e}")))
    }

    /// Parse from wire JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("decoding announce response: {e}")))
    }
}
