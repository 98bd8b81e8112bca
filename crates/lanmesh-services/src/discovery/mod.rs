//! LAN discovery engine.
//!
//! One UDP socket serves both directions. Depending on the configured role
//! the engine runs up to three duties, each its own task:
//!
//!   announce.rs  periodic signed announcement to every resolved target
//!   receive.rs   rate limit, validate, then hand off to a bounded worker
//!   expiry.rs    fixed-cadence liveness sweep over the registry
//!
//! All duties stop when the shutdown channel fires.

pub mod announce;
pub mod expiry;
pub mod receive;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lanmesh_core::config::{AnnounceMode, NodeConfig, ResolvedNode};
use lanmesh_core::{HostMetadata, Role, SharedSecret};

use crate::hosts_file::HostsFile;
use crate::registry::Registry;

pub use announce::Announcer;
pub use expiry::ExpirySweeper;
pub use receive::Receiver;

// ── Local metadata ────────────────────────────────────────────────────────────

/// Supplies this host's metadata for each announcement.
///
/// `snapshot` may block (it can touch /proc and /sys); the announcer calls it
/// from a blocking task. Version and timestamp are overwritten by the caller.
pub trait MetadataSource: Send + Sync + 'static {
    fn snapshot(&self) -> HostMetadata;
}

/// Fixed metadata, for tests and for hosts whose facts never change.
#[derive(Debug, Clone)]
pub struct StaticMetadata(pub HostMetadata);

impl MetadataSource for StaticMetadata {
    fn snapshot(&self) -> HostMetadata {
        self.0.clone()
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// IPv4 multicast group to join on the receive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastMembership {
    pub group: Ipv4Addr,
    /// Local interface address; UNSPECIFIED lets the kernel pick.
    pub interface: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub bind: SocketAddrV4,
    pub role: Role,
    /// Every announce goes to each of these.
    pub targets: Vec<SocketAddr>,
    pub multicast: Option<MulticastMembership>,
    pub announce_interval: Duration,
    pub stale_threshold: Duration,
    pub expiry_check: Duration,
    pub rate_limit_per_minute: u32,
    pub max_inflight: usize,
}

impl DiscoveryConfig {
    /// Build from validated node settings. `local_ip` selects the interface
    /// used for multicast membership.
    pub fn from_node(node: &NodeConfig, resolved: &ResolvedNode, local_ip: Option<Ipv4Addr>) -> Self {
        let mut targets = Vec::new();
        let multicast = match (node.mode, resolved.multicast_group) {
            (AnnounceMode::Multicast, Some(group)) => {
                targets.push(SocketAddr::V4(SocketAddrV4::new(group, node.port)));
                Some(MulticastMembership {
                    group,
                    interface: local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
                })
            }
            _ => {
                if let Some(network) = resolved.network {
                    targets.push(SocketAddr::V4(SocketAddrV4::new(
                        network.broadcast(),
                        node.port,
                    )));
                }
                None
            }
        };
        targets.extend(resolved.unicast_targets.iter().copied().map(SocketAddr::V4));

        Self {
            bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, node.port),
            role: node.role,
            targets,
            multicast,
            announce_interval: resolved.announce_interval,
            stale_threshold: resolved.stale_threshold,
            expiry_check: resolved.expiry_check,
            rate_limit_per_minute: node.rate_limit_per_minute,
            max_inflight: node.max_inflight,
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Engine counters, shared with the query surface.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub announces_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub rate_limited: AtomicU64,
    pub overloaded: AtomicU64,
    pub storage_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub announces_sent: u64,
    pub send_failures: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rate_limited: u64,
    pub overloaded: u64,
    pub storage_errors: u64,
}

impl DiscoveryStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            announces_sent: self.announces_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

// ── Socket ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("{0} failed: {1}")]
    Socket(&'static str, std::io::Error),
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddrV4, std::io::Error),
}

/// Create the shared announce/receive socket. Must run inside a tokio runtime.
pub fn bind_socket(config: &DiscoveryConfig) -> Result<UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::Socket("socket()", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| DiscoveryError::Socket("SO_REUSEADDR", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| DiscoveryError::Socket("SO_BROADCAST", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::Socket("set_nonblocking", e))?;
    socket
        .bind(&config.bind.into())
        .map_err(|e| DiscoveryError::Bind(config.bind, e))?;

    if let Some(m) = config.multicast {
        socket
            .join_multicast_v4(&m.group, &m.interface)
            .map_err(|e| DiscoveryError::Socket("IP_ADD_MEMBERSHIP", e))?;
        if !m.interface.is_unspecified() {
            socket
                .set_multicast_if_v4(&m.interface)
                .map_err(|e| DiscoveryError::Socket("IP_MULTICAST_IF", e))?;
        }
        // TTL 1: never leave the local segment
        socket
            .set_multicast_ttl_v4(1)
            .map_err(|e| DiscoveryError::Socket("IP_MULTICAST_TTL", e))?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| DiscoveryError::Socket("IP_MULTICAST_LOOP", e))?;
    }

    UdpSocket::from_std(socket.into()).map_err(|e| DiscoveryError::Socket("register socket", e))
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// A bound engine, ready to spawn its duties.
pub struct Discovery {
    socket: Arc<UdpSocket>,
    config: DiscoveryConfig,
    secret: SharedSecret,
    source: Arc<dyn MetadataSource>,
    local_mac: String,
    registry: Registry,
    hosts_file: Option<HostsFile>,
    stats: Arc<DiscoveryStats>,
}

impl Discovery {
    pub fn bind(
        config: DiscoveryConfig,
        secret: SharedSecret,
        source: Arc<dyn MetadataSource>,
        registry: Registry,
        hosts_file: Option<HostsFile>,
    ) -> Result<Self, DiscoveryError> {
        let socket = bind_socket(&config)?;
        let local_mac = source.snapshot().mac_address;
        Ok(Self {
            socket: Arc::new(socket),
            config,
            secret,
            source,
            local_mac,
            registry,
            hosts_file,
            stats: Arc::new(DiscoveryStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<DiscoveryStats> {
        self.stats.clone()
    }

    /// Spawn the duties for the configured role.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<Result<()>>> {
        let mut tasks = Vec::new();

        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            role = ?self.config.role,
            targets = self.config.targets.len(),
            mac = %self.local_mac,
            "discovery engine starting"
        );

        if self.config.role.announces() {
            let announcer = Announcer::new(
                self.socket.clone(),
                self.config.targets.clone(),
                self.config.announce_interval,
                self.secret.clone(),
                self.source.clone(),
                self.stats.clone(),
                shutdown.subscribe(),
            );
            tasks.push(tokio::spawn(announcer.run()));
        }

        if self.config.role.listens() {
            let receiver = Receiver::new(
                self.socket.clone(),
                self.secret.clone(),
                self.local_mac.clone(),
                self.config.rate_limit_per_minute,
                self.config.max_inflight,
                self.registry.clone(),
                self.hosts_file.clone(),
                self.stats.clone(),
                shutdown.subscribe(),
            );
            tasks.push(tokio::spawn(receiver.run()));

            let sweeper = ExpirySweeper::new(
                self.registry.clone(),
                self.config.stale_threshold,
                self.config.expiry_check,
                shutdown.subscribe(),
            );
            tasks.push(tokio::spawn(sweeper.run()));
        }

        tasks
    }
}
