//! lanmesh wire format: the announce datagram and the metadata it carries.
//!
//! A datagram is a fixed 32-byte HMAC-SHA256 signature followed by the
//! encoded HostMetadata. There is no length prefix beyond the datagram size.
//!
//! ```text
//! [0:32)   signature              (32 bytes, raw)
//! [32:)    encoded HostMetadata   (variable length)
//! ```
//!
//! The payload codec is bincode with fixed-width little-endian integers.
//! Fields are encoded in declaration order, so the same HostMetadata always
//! produces the same bytes. The signature covers exactly those bytes, so
//! reordering or retyping a field is a breaking change.

use bincode::Options;
use serde::{Deserialize, Serialize};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Length of the signature prefix on every datagram.
pub const SIGNATURE_LEN: usize = 32;

/// Current payload version tag.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest datagram the receiver will read. Anything longer is truncated by
/// the socket and then fails signature verification.
pub const MAX_DATAGRAM: usize = 4096;

/// Maximum |now − timestamp| accepted by the validator, in seconds.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Default UDP port for announcements.
pub const DEFAULT_PORT: u16 = 5678;

/// Default IPv4 multicast group for announcements.
pub const DEFAULT_MULTICAST_GROUP: &str = "239.255.0.1";

// ── Host Metadata ─────────────────────────────────────────────────────────────

/// The announced fact about a machine.
///
/// Produced fresh on every announce. Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetadata {
    /// Payload version tag. Currently [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Unix seconds at which the announce was built.
    pub timestamp: i64,
    /// Canonical lowercase colon-hex MAC, e.g. `aa:bb:cc:dd:ee:01`.
    pub mac_address: String,
    /// Dotted-quad IPv4 address of the announcing interface.
    pub ip_address: String,
    pub hostname: String,
    pub os: OsInfo,
    pub hardware: HardwareInfo,
}

/// Operating system descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub kernel: String,
    pub arch: String,
}

/// Hardware descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpu_model: String,
    pub cpu_cores: u32,
    /// Total memory in GiB, rounded to two decimals.
    pub memory_gb: f64,
    /// Number of mounted disk partitions.
    pub disk_count: u32,
}

impl HostMetadata {
    /// Serialize to the compact binary payload form.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        codec().serialize(self).map_err(WireError::Encode)
    }

    /// Parse a payload. Malformed or truncated input is an error, never a panic.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        codec().deserialize(bytes).map_err(WireError::Decode)
    }
}

/// Codec options shared by both directions. The byte limit keeps a forged
/// string length from triggering a large allocation.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_DATAGRAM as u64)
        .reject_trailing_bytes()
}

/// Round a byte count to GiB with two decimals, as carried in `memory_gb`.
pub fn bytes_to_gib(bytes: u64) -> f64 {
    let gib = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (gib * 100.0).round() / 100.0
}

/// Format six raw bytes as a canonical lowercase colon-hex MAC.
pub fn format_mac(bytes: [u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

// ── Signed Packet ─────────────────────────────────────────────────────────────

/// Prepend a signature to an encoded payload.
pub fn assemble(signature: &[u8; SIGNATURE_LEN], payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(SIGNATURE_LEN + payload.len());
    packet.extend_from_slice(signature);
    packet.extend_from_slice(payload);
    packet
}

/// Split a datagram into `(signature, payload)`.
///
/// Returns `None` when there is no room for a payload, i.e.
/// `datagram.len() <= SIGNATURE_LEN`.
pub fn split(datagram: &[u8]) -> Option<(&[u8], &[u8])> {
    if datagram.len() <= SIGNATURE_LEN {
        return None;
    }
    Some(datagram.split_at(SIGNATURE_LEN))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode host metadata: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode host metadata: {0}")]
    Decode(bincode::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
