//! Local system probe.
//!
//! Finds the interface this host announces from and collects the facts that
//! go into each announcement. Interface, hostname, memory and partition count
//! are re-read on every snapshot; OS and CPU facts are read once. When
//! re-detection fails the last known identity is announced.

use std::net::Ipv4Addr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use sysinfo::{Disks, System};

use lanmesh_core::wire::{bytes_to_gib, format_mac, HardwareInfo, OsInfo, PROTOCOL_VERSION};
use lanmesh_core::{HostMetadata, Ipv4Cidr};
use lanmesh_services::MetadataSource;

/// The interface chosen for announcements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: String,
}

/// Pick the first non-loopback IPv4 interface with a MAC, restricted to
/// `network` when given.
pub fn select_interface(network: Option<Ipv4Cidr>) -> Result<LocalInterface> {
    let addrs = get_if_addrs().context("failed to enumerate network interfaces")?;

    for iface in addrs {
        if iface.is_loopback() {
            continue;
        }
        let ip = match iface.addr {
            IfAddr::V4(ref v4) => v4.ip,
            IfAddr::V6(_) => continue,
        };
        if let Some(net) = network {
            if !net.contains(ip) {
                continue;
            }
        }
        match mac_address::mac_address_by_name(&iface.name) {
            Ok(Some(mac)) => {
                return Ok(LocalInterface {
                    name: iface.name,
                    ip,
                    mac: format_mac(mac.bytes()),
                })
            }
            Ok(None) => tracing::debug!(interface = %iface.name, "interface has no MAC"),
            Err(e) => tracing::debug!(interface = %iface.name, error = %e, "MAC lookup failed"),
        }
    }

    match network {
        Some(net) => anyhow::bail!("no interface with a MAC address inside {}", net),
        None => anyhow::bail!("no non-loopback IPv4 interface with a MAC address"),
    }
}

/// Last successfully detected identity.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    interface: LocalInterface,
    hostname: String,
}

impl Identity {
    /// Fold in a re-detection. Failed or empty results keep the cached value.
    fn refresh(&mut self, interface: Result<LocalInterface>, hostname: String) {
        match interface {
            Ok(iface) if iface != self.interface => {
                tracing::info!(
                    interface = %iface.name,
                    old_ip = %self.interface.ip,
                    ip = %iface.ip,
                    mac = %iface.mac,
                    "local interface changed"
                );
                self.interface = iface;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                error = %e,
                ip = %self.interface.ip,
                "interface re-detection failed, announcing last known address"
            ),
        }

        if !hostname.is_empty() && hostname != self.hostname {
            tracing::info!(old = %self.hostname, hostname = %hostname, "hostname changed");
            self.hostname = hostname;
        }
    }
}

fn current_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn total_memory_gib() -> f64 {
    let mut sys = System::new();
    sys.refresh_memory();
    bytes_to_gib(sys.total_memory())
}

pub struct SystemProbe {
    network: Option<Ipv4Cidr>,
    identity: Mutex<Identity>,
    os: OsInfo,
    cpu_model: String,
    cpu_cores: u32,
}

impl SystemProbe {
    pub fn detect(network: Option<Ipv4Cidr>) -> Result<Self> {
        let interface = select_interface(network)?;

        let mut sys = System::new();
        sys.refresh_cpu();

        let cpu_model = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let os = OsInfo {
            name: System::long_os_version()
                .or_else(System::name)
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            kernel: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
            arch: std::env::consts::ARCH.to_string(),
        };

        Ok(Self {
            network,
            identity: Mutex::new(Identity {
                interface,
                hostname: current_hostname(),
            }),
            os,
            cpu_model,
            cpu_cores: sys.cpus().len() as u32,
        })
    }

    fn identity(&self) -> std::sync::MutexGuard<'_, Identity> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn interface(&self) -> LocalInterface {
        self.identity().interface.clone()
    }

    pub fn hostname(&self) -> String {
        self.identity().hostname.clone()
    }
}

impl MetadataSource for SystemProbe {
    fn snapshot(&self) -> HostMetadata {
        let detected = select_interface(self.network);
        let hostname = current_hostname();
        let identity = {
            let mut identity = self.identity();
            identity.refresh(detected, hostname);
            identity.clone()
        };
        let disks = Disks::new_with_refreshed_list();

        HostMetadata {
            version: PROTOCOL_VERSION,
            timestamp: 0,
            mac_address: identity.interface.mac,
            ip_address: identity.interface.ip.to_string(),
            hostname: identity.hostname,
            os: self.os.clone(),
            hardware: HardwareInfo {
                cpu_model: self.cpu_model.clone(),
                cpu_cores: self.cpu_cores,
                memory_gb: total_memory_gib(),
                disk_count: disks.list().len() as u32,
            },
        }
    }
}
