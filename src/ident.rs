//! 20-byte peer, swarm, and offer identifiers
//!
//! All three identifier kinds share one wire rule: lowercase hex, 40
//! characters, strictly reversible. Trackers relay identifiers inside JSON
//! text, so the encoding must survive any JSON encoder; hex does, arbitrary
//! byte-per-code-point strings do not.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Length in bytes of every identifier on the announce protocol
pub const ID_LEN: usize = 20;

fn decode_hex_id(kind: &str, s: &str) -> Result<[u8; ID_LEN]> {
    let raw = hex::decode(s)
        .map_err(|e| Error::InvalidIdentifier(format!("{kind} is not valid hex: {e}")))?;
    let mut bytes = [0u8; ID_LEN];
    if raw.len() != ID_LEN {
        return Err(Error::InvalidIdentifier(format!(
            "{kind} must be {ID_LEN} bytes, got {}",
            raw.len()
        )));
    }
    bytes.copy_from_slice(&raw);
    Ok(bytes)
}

fn random_id() -> [u8; ID_LEN] {
    let mut bytes = [0u8; ID_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Identifies this process to trackers and remote peers.
///
/// Generated once at startup from the OS random source; immutable for the
/// process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; ID_LEN]);

impl PeerId {
    /// Generate a fresh random peer id
    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Construct from raw bytes
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Wire form: 40 lowercase hex characters
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the wire form back into an id
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_id("peer id", s).map(Self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.as_hex())
    }
}

/// Identifies the swarm a peer wants to join.
///
/// Derived deterministically from an application-chosen identifier string,
/// so every process configured with the same identifier lands in the same
/// swarm.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; ID_LEN]);

impl InfoHash {
    /// Digest an identifier string into a swarm id (SHA-256 truncated to 20
    /// bytes).
    pub fn from_identifier(identifier: &str) -> Self {
        let digest = Sha256::digest(identifier.as_bytes());
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&digest[..ID_LEN]);
        Self(bytes)
    }

    /// Construct from raw bytes
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Wire form: 40 lowercase hex characters
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the wire form back into an id
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_id("info hash", s).map(Self)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.as_hex())
    }
}

/// Identifies one outbound connection offer.
///
/// Random per offer; uniqueness among concurrently outstanding offers is
/// statistical (160-bit space), not enforced.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OfferId([u8; ID_LEN]);

impl OfferId {
    /// Generate a fresh random offer id
    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Construct from raw bytes
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Wire form: 40 lowercase hex characters
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the wire form back into an id
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_id("offer id", s).map(Self)
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl fmt::Debug for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OfferId({})", self.as_hex())
    }
}
