//! Datagram intake.
//!
//! The receive loop itself only rate limits and validates. Accepted
//! announcements are handed to a short-lived task holding one of
//! `max_inflight` permits; when none is free the announcement is dropped,
//! since the sender will repeat it next interval anyway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};

use lanmesh_core::wire::MAX_DATAGRAM;
use lanmesh_core::{validate, HostMetadata, Rejection, SharedSecret, ValidationContext};

use super::DiscoveryStats;
use crate::hosts_file::{HostsFile, HostsFileError};
use crate::ratelimit::RateLimiter;
use crate::registry::{Registry, UpsertOutcome};
use crate::now_unix;

/// Pause after the first failed `recv_from`; doubles per consecutive failure.
const RECV_BACKOFF_BASE: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after `failures` consecutive receive errors.
fn recv_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_BASE
        .saturating_mul(1 << shift)
        .min(RECV_BACKOFF_MAX)
}

pub struct Receiver {
    socket: Arc<UdpSocket>,
    secret: SharedSecret,
    local_mac: String,
    limiter: RateLimiter,
    inflight: Arc<Semaphore>,
    registry: Registry,
    hosts_file: Option<HostsFile>,
    stats: Arc<DiscoveryStats>,
    shutdown: broadcast::Receiver<()>,
}

impl Receiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Arc<UdpSocket>,
        secret: SharedSecret,
        local_mac: String,
        rate_limit_per_minute: u32,
        max_inflight: usize,
        registry: Registry,
        hosts_file: Option<HostsFile>,
        stats: Arc<DiscoveryStats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            secret,
            local_mac,
            limiter: RateLimiter::new(rate_limit_per_minute),
            inflight: Arc::new(Semaphore::new(max_inflight)),
            registry,
            hosts_file,
            stats,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut failures: u32 = 0;

        if let Some(hosts_file) = self.hosts_file.clone() {
            let registry = self.registry.clone();
            tokio::task::spawn_blocking(move || sync_hosts_file(&registry, &hosts_file));
        }

        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            permits = self.inflight.available_permits(),
            "receiver starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("receiver shutting down");
                    return Ok(());
                }
                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let delay = recv_backoff(failures);
                            tracing::warn!(
                                error = %e,
                                failures,
                                retry_ms = delay.as_millis() as u64,
                                "recv_from failed"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };
                    failures = 0;
                    self.handle(&buf[..len], from);
                }
            }
        }
    }

    fn handle(&self, datagram: &[u8], from: SocketAddr) {
        if !self.limiter.check(from.ip()) {
            DiscoveryStats::bump(&self.stats.rate_limited);
            tracing::debug!(
                source = %from,
                dropped = self.limiter.dropped(),
                "rate limit exceeded, datagram dropped"
            );
            return;
        }

        let ctx = ValidationContext {
            local_mac: &self.local_mac,
            secret: &self.secret,
            now_unix: now_unix(),
        };
        let metadata = match validate(datagram, &ctx) {
            Ok(m) => m,
            Err(Rejection::SelfOrigin) => {
                tracing::trace!("ignoring own announcement");
                return;
            }
            Err(rejection) => {
                DiscoveryStats::bump(&self.stats.rejected);
                tracing::debug!(
                    source = %from,
                    reason = rejection.reason(),
                    error = %rejection,
                    "datagram rejected"
                );
                return;
            }
        };

        let permit = match self.inflight.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                DiscoveryStats::bump(&self.stats.overloaded);
                tracing::warn!(source = %from, "worker pool saturated, announcement dropped");
                return;
            }
        };
        DiscoveryStats::bump(&self.stats.accepted);

        let registry = self.registry.clone();
        let hosts_file = self.hosts_file.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let stored = tokio::task::spawn_blocking(move || {
                record_announcement(&registry, hosts_file.as_ref(), &metadata)
            })
            .await;
            if !matches!(stored, Ok(true)) {
                DiscoveryStats::bump(&stats.storage_errors);
            }
        });
    }
}

/// Upsert one accepted announcement and refresh the hosts file.
/// Returns false if the registry write failed.
fn record_announcement(
    registry: &Registry,
    hosts_file: Option<&HostsFile>,
    metadata: &HostMetadata,
) -> bool {
    match registry.upsert(metadata) {
        Ok(UpsertOutcome::Discovered) => tracing::info!(
            mac = %metadata.mac_address,
            ip = %metadata.ip_address,
            hostname = %metadata.hostname,
            "new host discovered"
        ),
        Ok(UpsertOutcome::Revived) => tracing::info!(
            mac = %metadata.mac_address,
            ip = %metadata.ip_address,
            "host active again"
        ),
        Ok(UpsertOutcome::Refreshed) => tracing::debug!(
            mac = %metadata.mac_address,
            "host refreshed"
        ),
        Err(e) => {
            tracing::error!(mac = %metadata.mac_address, error = %e, "registry upsert failed");
            return false;
        }
    }

    if let Some(hosts_file) = hosts_file {
        sync_hosts_file(registry, hosts_file);
    }
    true
}

fn sync_hosts_file(registry: &Registry, hosts_file: &HostsFile) {
    let records = match registry.get_all() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to read registry for hosts file sync");
            return;
        }
    };
    match hosts_file.sync(&records) {
        Ok(_) => {}
        Err(e @ HostsFileError::PermissionDenied(_)) => tracing::warn!(error = %e, "hosts file sync skipped"),
        Err(e) => tracing::warn!(error = %e, "hosts file sync failed"),
    }
}
