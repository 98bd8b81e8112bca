//! Shared node harness.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lanmesh_core::wire::{HardwareInfo, OsInfo, PROTOCOL_VERSION};
use lanmesh_core::{HostMetadata, Role, SharedSecret};
use lanmesh_services::{
    Discovery, DiscoveryConfig, DiscoveryStats, MetadataSource, Registry, StaticMetadata,
};

pub const SECRET: &str = "S";

pub fn metadata(mac: &str, ip: &str, hostname: &str) -> HostMetadata {
    HostMetadata {
        version: PROTOCOL_VERSION,
        timestamp: 0,
        mac_address: mac.into(),
        ip_address: ip.into(),
        hostname: hostname.into(),
        os: OsInfo {
            name: "Debian GNU/Linux 12".into(),
            kernel: "6.1.0".into(),
            arch: "x86_64".into(),
        },
        hardware: HardwareInfo {
            cpu_model: "Test CPU".into(),
            cpu_cores: 4,
            memory_gb: 7.75,
            disk_count: 1,
        },
    }
}

/// Loopback engine settings with fast timers.
pub fn loopback_config(role: Role, targets: Vec<SocketAddr>) -> DiscoveryConfig {
    DiscoveryConfig {
        bind: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        role,
        targets,
        multicast: None,
        announce_interval: Duration::from_secs(3600),
        stale_threshold: Duration::from_secs(3600),
        expiry_check: Duration::from_millis(50),
        rate_limit_per_minute: 1000,
        max_inflight: 16,
    }
}

pub struct Node {
    pub addr: SocketAddr,
    pub registry: Registry,
    pub stats: Arc<DiscoveryStats>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<Result<()>>>,
    _dir: TempDir,
}

impl Node {
    pub async fn start(config: DiscoveryConfig, secret: &str, local: HostMetadata) -> Node {
        Self::start_with_source(config, secret, Arc::new(StaticMetadata(local))).await
    }

    pub async fn start_with_source(
        config: DiscoveryConfig,
        secret: &str,
        source: Arc<dyn MetadataSource>,
    ) -> Node {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("hosts.db")).unwrap();
        let discovery = Discovery::bind(
            config,
            SharedSecret::from_config(secret).unwrap(),
            source,
            registry.clone(),
            None,
        )
        .unwrap();

        let addr = discovery.local_addr().unwrap();
        let stats = discovery.stats();
        let (shutdown, _) = broadcast::channel(1);
        let tasks = discovery.spawn(&shutdown);

        Node {
            addr,
            registry,
            stats,
            shutdown,
            tasks,
            _dir: dir,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            task.await.unwrap().unwrap();
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
