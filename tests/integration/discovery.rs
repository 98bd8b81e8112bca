use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;

use lanmesh_core::{seal, HostMetadata, Role, SharedSecret};
use lanmesh_services::{now_unix, MetadataSource};

use crate::*;

const MAC_A: &str = "aa:bb:cc:dd:ee:01";
const MAC_B: &str = "aa:bb:cc:dd:ee:02";

/// A announces once; B registers it, then expires it after the stale threshold.
#[tokio::test]
async fn test_announce_registers_then_expires() {
    let mut b_config = loopback_config(Role::Listen, vec![]);
    b_config.stale_threshold = Duration::from_millis(500);
    let b = Node::start(b_config, SECRET, metadata(MAC_B, "192.168.1.20", "host-b")).await;

    let a = Node::start(
        loopback_config(Role::Announce, vec![b.addr]),
        SECRET,
        metadata(MAC_A, "192.168.1.10", "host-a"),
    )
    .await;

    let registry = b.registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), || registry.get_active().unwrap().len() == 1).await,
        "B never registered A"
    );

    let active = b.registry.get_active().unwrap();
    assert_eq!(active.len(), 1);
    let record = &active[0];
    assert_eq!(record.metadata.mac_address, MAC_A);
    assert_eq!(record.metadata.hostname, "host-a");
    assert_eq!(record.metadata.ip_address, "192.168.1.10");
    assert_eq!(record.packet_count, 1);
    assert!(record.active);
    let first_seen = record.first_seen;

    // announce-only nodes register nothing
    assert!(a.registry.get_all().unwrap().is_empty());

    let registry = b.registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), || registry.get_active().unwrap().is_empty()).await,
        "A never expired"
    );
    let expired = b.registry.get(MAC_A).unwrap().unwrap();
    assert!(!expired.active);
    assert_eq!(expired.packet_count, 1);
    assert_eq!(expired.first_seen, first_seen);

    a.stop().await;
    b.stop().await;
}

/// A flipped payload byte after signing never reaches the registry.
#[tokio::test]
async fn test_tampered_packet_is_rejected() {
    let b = Node::start(
        loopback_config(Role::Listen, vec![]),
        SECRET,
        metadata(MAC_B, "192.168.1.20", "host-b"),
    )
    .await;
    let secret = SharedSecret::from_config(SECRET).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut forged = metadata(MAC_A, "192.168.1.10", "host-a");
    forged.timestamp = now_unix();
    let mut packet = seal(&forged, &secret).unwrap();
    let last = packet.len() - 1;
    packet[last] ^= 0x01;
    sender.send_to(&packet, b.addr).await.unwrap();

    // a valid announce from another host, sent after, marks the tampered one as processed
    let mut valid = metadata("aa:bb:cc:dd:ee:03", "192.168.1.30", "host-c");
    valid.timestamp = now_unix();
    sender.send_to(&seal(&valid, &secret).unwrap(), b.addr).await.unwrap();

    let registry = b.registry.clone();
    assert!(wait_until(Duration::from_secs(5), || registry.get_all().unwrap().len() == 1).await);

    let all = b.registry.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].metadata.mac_address, "aa:bb:cc:dd:ee:03");
    assert!(b.registry.get(MAC_A).unwrap().is_none());
    assert_eq!(b.stats.snapshot().rejected, 1);

    b.stop().await;
}

/// Nodes with different secrets never see each other.
#[tokio::test]
async fn test_secret_mismatch_is_silent() {
    let b = Node::start(
        loopback_config(Role::Listen, vec![]),
        SECRET,
        metadata(MAC_B, "192.168.1.20", "host-b"),
    )
    .await;
    let a = Node::start(
        loopback_config(Role::Announce, vec![b.addr]),
        "not-the-secret",
        metadata(MAC_A, "192.168.1.10", "host-a"),
    )
    .await;

    let stats = b.stats.clone();
    assert!(wait_until(Duration::from_secs(5), || stats.snapshot().rejected >= 1).await);
    assert!(b.registry.get_all().unwrap().is_empty());

    a.stop().await;
    b.stop().await;
}

/// Stale and replayed announcements are dropped.
#[tokio::test]
async fn test_replayed_announce_is_rejected() {
    let b = Node::start(
        loopback_config(Role::Listen, vec![]),
        SECRET,
        metadata(MAC_B, "192.168.1.20", "host-b"),
    )
    .await;
    let secret = SharedSecret::from_config(SECRET).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut old = metadata(MAC_A, "192.168.1.10", "host-a");
    old.timestamp = now_unix() - 3600;
    sender.send_to(&seal(&old, &secret).unwrap(), b.addr).await.unwrap();

    let stats = b.stats.clone();
    assert!(wait_until(Duration::from_secs(5), || stats.snapshot().rejected == 1).await);
    assert!(b.registry.get_all().unwrap().is_empty());

    b.stop().await;
}

/// Repeated announces from one host update a single record.
#[tokio::test]
async fn test_repeated_announces_refresh_one_record() {
    let b = Node::start(
        loopback_config(Role::Listen, vec![]),
        SECRET,
        metadata(MAC_B, "192.168.1.20", "host-b"),
    )
    .await;
    let mut a_config = loopback_config(Role::Announce, vec![b.addr]);
    a_config.announce_interval = Duration::from_millis(100);
    let a = Node::start(a_config, SECRET, metadata(MAC_A, "192.168.1.10", "host-a")).await;

    let registry = b.registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            registry
                .get(MAC_A)
                .unwrap()
                .is_some_and(|r| r.packet_count >= 3)
        })
        .await
    );
    assert_eq!(b.registry.get_all().unwrap().len(), 1);

    a.stop().await;
    b.stop().await;
}

/// Local metadata whose address can be changed mid-run, like a DHCP renewal.
struct MovingHost {
    ip: Mutex<String>,
}

impl MetadataSource for MovingHost {
    fn snapshot(&self) -> HostMetadata {
        let ip = self.ip.lock().unwrap().clone();
        metadata(MAC_A, &ip, "host-a")
    }
}

/// Every announce carries the current address; a change updates the record in place.
#[tokio::test]
async fn test_address_change_updates_record_in_place() {
    let b = Node::start(
        loopback_config(Role::Listen, vec![]),
        SECRET,
        metadata(MAC_B, "192.168.1.20", "host-b"),
    )
    .await;

    let source = Arc::new(MovingHost {
        ip: Mutex::new("192.168.1.10".into()),
    });
    let mut a_config = loopback_config(Role::Announce, vec![b.addr]);
    a_config.announce_interval = Duration::from_millis(100);
    let a = Node::start_with_source(a_config, SECRET, source.clone()).await;

    let registry = b.registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            registry
                .get(MAC_A)
                .unwrap()
                .is_some_and(|r| r.metadata.ip_address == "192.168.1.10")
        })
        .await
    );
    let first_seen = b.registry.get(MAC_A).unwrap().unwrap().first_seen;

    *source.ip.lock().unwrap() = "192.168.1.77".into();

    let registry = b.registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            registry
                .get(MAC_A)
                .unwrap()
                .is_some_and(|r| r.metadata.ip_address == "192.168.1.77")
        })
        .await,
        "new address never reached the registry"
    );

    let all = b.registry.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].first_seen, first_seen);
    assert!(all[0].packet_count >= 2);

    a.stop().await;
    b.stop().await;
}
