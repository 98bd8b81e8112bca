//! Inbound datagram admission.
//!
//! A pure pipeline, short-circuiting on the first failed check:
//!
//!   1. size: there must be room for a payload after the signature
//!   2. signature: HMAC over the payload must verify under the shared secret
//!   3. decode: the payload must parse as HostMetadata
//!   4. freshness: |now - timestamp| must be within MAX_CLOCK_SKEW_SECS
//!   5. self: announcements carrying our own MAC are ignored
//!
//! Every failure is a [`Rejection`]: a silent drop for the caller, never a
//! protocol response.

use crate::crypto::{self, SharedSecret};
use crate::wire::{self, HostMetadata, WireError, MAX_CLOCK_SKEW_SECS};

/// Local identity and clock the pipeline checks against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Our own canonical MAC.
    pub local_mac: &'a str,
    pub secret: &'a SharedSecret,
    /// Current Unix time in seconds.
    pub now_unix: i64,
}

/// Why a datagram was dropped.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("datagram of {0} bytes has no room for a payload")]
    TooShort(usize),

    #[error("signature verification failed")]
    BadSignature,

    #[error(transparent)]
    Malformed(#[from] WireError),

    #[error("timestamp {timestamp} is {skew}s away from local clock")]
    Stale { timestamp: i64, skew: u64 },

    #[error("announcement originated from this host")]
    SelfOrigin,
}

impl Rejection {
    /// Short, stable label for logs and counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::TooShort(_) => "too_short",
            Rejection::BadSignature => "bad_signature",
            Rejection::Malformed(_) => "malformed",
            Rejection::Stale { .. } => "stale",
            Rejection::SelfOrigin => "self_origin",
        }
    }
}

/// Run the admission pipeline over one datagram.
pub fn validate(datagram: &[u8], ctx: &ValidationContext<'_>) -> Result<HostMetadata, Rejection> {
    let (signature, payload) =
        wire::split(datagram).ok_or(Rejection::TooShort(datagram.len()))?;

    if !crypto::verify(signature, payload, ctx.secret) {
        return Err(Rejection::BadSignature);
    }

    let metadata = HostMetadata::decode(payload)?;

    let skew = ctx.now_unix.abs_diff(metadata.timestamp);
    if skew > MAX_CLOCK_SKEW_SECS as u64 {
        return Err(Rejection::Stale {
            timestamp: metadata.timestamp,
            skew,
        });
    }

    if metadata.mac_address == ctx.local_mac {
        return Err(Rejection::SelfOrigin);
    }

    Ok(metadata)
}

/// Encode and sign metadata into a ready-to-send datagram.
pub fn seal(metadata: &HostMetadata, secret: &SharedSecret) -> Result<Vec<u8>, WireError> {
    let payload = metadata.encode()?;
    let signature = crypto::sign(&payload, secret);
    Ok(wire::assemble(&signature, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{HardwareInfo, OsInfo, PROTOCOL_VERSION, SIGNATURE_LEN};

    const NOW: i64 = 1_708_444_800;
    const LOCAL_MAC: &str = "aa:bb:cc:dd:ee:99";

    fn secret() -> SharedSecret {
        SharedSecret::from_config("S").unwrap()
    }

    fn announce(mac: &str, timestamp: i64) -> HostMetadata {
        HostMetadata {
            version: PROTOCOL_VERSION,
            timestamp,
            mac_address: mac.into(),
            ip_address: "192.168.1.10".into(),
            hostname: "host-a".into(),
            os: OsInfo::default(),
            hardware: HardwareInfo::default(),
        }
    }

    fn check(datagram: &[u8]) -> Result<HostMetadata, Rejection> {
        let s = secret();
        let ctx = ValidationContext {
            local_mac: LOCAL_MAC,
            secret: &s,
            now_unix: NOW,
        };
        validate(datagram, &ctx)
    }

    #[test]
    fn accepts_a_fresh_signed_announce() {
        let packet = seal(&announce("aa:bb:cc:dd:ee:01", NOW), &secret()).unwrap();
        let m = check(&packet).unwrap();
        assert_eq!(m.hostname, "host-a");
        assert_eq!(m.ip_address, "192.168.1.10");
    }

    #[test]
    fn rejects_datagram_without_payload() {
        assert!(matches!(check(&[0u8; SIGNATURE_LEN]), Err(Rejection::TooShort(32))));
        assert!(matches!(check(&[]), Err(Rejection::TooShort(0))));
    }

    #[test]
    fn rejects_flipped_payload_byte() {
        let mut packet = seal(&announce("aa:bb:cc:dd:ee:01", NOW), &secret()).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0x01;
        assert!(matches!(check(&packet), Err(Rejection::BadSignature)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let other = SharedSecret::from_config("not-S").unwrap();
        let packet = seal(&announce("aa:bb:cc:dd:ee:01", NOW), &other).unwrap();
        assert!(matches!(check(&packet), Err(Rejection::BadSignature)));
    }

    #[test]
    fn rejects_signed_garbage() {
        let s = secret();
        let payload = b"\x01not a payload";
        let packet = wire::assemble(&crypto::sign(payload, &s), payload);
        assert!(matches!(check(&packet), Err(Rejection::Malformed(_))));
    }

    #[test]
    fn freshness_window_is_symmetric() {
        let s = secret();
        for ts in [NOW - 60, NOW + 60] {
            let packet = seal(&announce("aa:bb:cc:dd:ee:01", ts), &s).unwrap();
            assert!(check(&packet).is_ok(), "ts offset {} should pass", ts - NOW);
        }
        for ts in [NOW - 61, NOW + 61, i64::MIN, i64::MAX] {
            let packet = seal(&announce("aa:bb:cc:dd:ee:01", ts), &s).unwrap();
            assert!(matches!(check(&packet), Err(Rejection::Stale { .. })));
        }
    }

    #[test]
    fn rejects_own_announce() {
        let packet = seal(&announce(LOCAL_MAC, NOW), &secret()).unwrap();
        let err = check(&packet).unwrap_err();
        assert!(matches!(err, Rejection::SelfOrigin));
        assert_eq!(err.reason(), "self_origin");
    }

    #[test]
    fn stale_check_runs_before_self_check() {
        let packet = seal(&announce(LOCAL_MAC, NOW - 3600), &secret()).unwrap();
        assert!(matches!(check(&packet), Err(Rejection::Stale { .. })));
    }
}
