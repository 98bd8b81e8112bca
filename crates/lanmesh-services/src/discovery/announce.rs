//! Periodic signed announcement.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use lanmesh_core::wire::{MAX_DATAGRAM, PROTOCOL_VERSION};
use lanmesh_core::{seal, SharedSecret};

use super::{DiscoveryStats, MetadataSource};
use crate::now_unix;

pub struct Announcer {
    socket: Arc<UdpSocket>,
    targets: Vec<SocketAddr>,
    interval: Duration,
    secret: SharedSecret,
    source: Arc<dyn MetadataSource>,
    stats: Arc<DiscoveryStats>,
    shutdown: broadcast::Receiver<()>,
}

impl Announcer {
    pub fn new(
        socket: Arc<UdpSocket>,
        targets: Vec<SocketAddr>,
        interval: Duration,
        secret: SharedSecret,
        source: Arc<dyn MetadataSource>,
        stats: Arc<DiscoveryStats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            targets,
            interval,
            secret,
            source,
            stats,
            shutdown,
        }
    }

    /// Announce immediately, then once per interval until shutdown.
    pub async fn run(mut self) -> Result<()> {
        // first tick completes immediately
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            targets = ?self.targets,
            interval_secs = self.interval.as_secs(),
            "announcer starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("announcer shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => self.announce_once().await,
            }
        }
    }

    async fn announce_once(&self) {
        let source = self.source.clone();
        let mut metadata = match tokio::task::spawn_blocking(move || source.snapshot()).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "metadata snapshot failed");
                return;
            }
        };
        metadata.version = PROTOCOL_VERSION;
        metadata.timestamp = now_unix();

        let packet = match seal(&metadata, &self.secret) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode announcement");
                return;
            }
        };
        if packet.len() > MAX_DATAGRAM {
            tracing::warn!(bytes = packet.len(), "announcement exceeds datagram limit, skipped");
            return;
        }

        for target in &self.targets {
            match self.socket.send_to(&packet, target).await {
                Ok(n) => {
                    DiscoveryStats::bump(&self.stats.announces_sent);
                    tracing::trace!(target = %target, bytes = n, "announce sent");
                }
                Err(e) => {
                    DiscoveryStats::bump(&self.stats.send_failures);
                    tracing::warn!(target = %target, error = %e, "announce send failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticMetadata;
    use lanmesh_core::wire::{HardwareInfo, OsInfo};
    use lanmesh_core::{validate, HostMetadata, ValidationContext};

    fn metadata() -> HostMetadata {
        HostMetadata {
            version: 0,
            timestamp: 0,
            mac_address: "aa:bb:cc:dd:ee:01".into(),
            ip_address: "192.168.1.10".into(),
            hostname: "host-a".into(),
            os: OsInfo::default(),
            hardware: HardwareInfo::default(),
        }
    }

    #[tokio::test]
    async fn announces_immediately_with_fresh_timestamp() {
        let secret = SharedSecret::from_config("S").unwrap();
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let stats = Arc::new(DiscoveryStats::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        let announcer = Announcer::new(
            socket,
            vec![sink.local_addr().unwrap()],
            Duration::from_secs(3600),
            secret.clone(),
            Arc::new(StaticMetadata(metadata())),
            stats.clone(),
            shutdown_tx.subscribe(),
        );
        let task = tokio::spawn(announcer.run());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), sink.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let ctx = ValidationContext {
            local_mac: "aa:bb:cc:dd:ee:99",
            secret: &secret,
            now_unix: now_unix(),
        };
        let received = validate(&buf[..len], &ctx).unwrap();
        assert_eq!(received.version, PROTOCOL_VERSION);
        assert_eq!(received.hostname, "host-a");
        assert!(received.timestamp > 0);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(stats.snapshot().announces_sent, 1);
    }

    #[tokio::test]
    async fn send_failure_does_not_stop_the_loop() {
        let secret = SharedSecret::from_config("S").unwrap();
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let stats = Arc::new(DiscoveryStats::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        // an IPv6 target cannot be reached from an IPv4 socket
        let announcer = Announcer::new(
            socket,
            vec!["[::1]:9".parse().unwrap(), sink.local_addr().unwrap()],
            Duration::from_millis(50),
            secret,
            Arc::new(StaticMetadata(metadata())),
            stats.clone(),
            shutdown_tx.subscribe(),
        );
        let task = tokio::spawn(announcer.run());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), sink.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        let snap = stats.snapshot();
        assert!(snap.send_failures >= 2);
        assert!(snap.announces_sent >= 2);
    }
}
