//! Host listing and registry commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostRecord {
    pub metadata: HostMetadata,
    pub first_seen: u64,
    pub last_seen: u64,
    pub packet_count: u64,
    pub active: bool,
    pub ssh_key_pushed: bool,
    pub pushed_at: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostMetadata {
    pub mac_address: String,
    pub ip_address: String,
    pub hostname: String,
    pub os: OsInfo,
    pub hardware: HardwareInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub kernel: String,
    pub arch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareInfo {
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub disk_count: u32,
}

#[derive(Deserialize)]
struct StatusResponse {
    node: NodeIdentity,
    role: String,
    uptime_secs: u64,
    hosts: Counts,
    discovery: Stats,
}

#[derive(Deserialize)]
struct NodeIdentity {
    mac_address: String,
    ip_address: String,
    hostname: String,
}

#[derive(Deserialize)]
struct Counts {
    total: usize,
    active: usize,
}

#[derive(Deserialize)]
struct Stats {
    announces_sent: u64,
    accepted: u64,
    rejected: u64,
    rate_limited: u64,
    overloaded: u64,
}

// ── Host selection ────────────────────────────────────────────────────────────

/// A host named on the command line: 1-based index into the active list, or a MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSelector {
    Index(usize),
    Mac(String),
}

impl HostSelector {
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<usize>() {
            Ok(n) => HostSelector::Index(n),
            Err(_) => HostSelector::Mac(s.trim().to_ascii_lowercase().replace('-', ":")),
        }
    }
}

pub async fn fetch_active(port: u16) -> Result<Vec<HostRecord>> {
    let resp: HostsResponse = get_json(&format!("{}/hosts/active", base_url(port))).await?;
    Ok(resp.hosts)
}

/// Resolve a selector against the daemon's registry.
pub async fn resolve(port: u16, selector: &HostSelector) -> Result<HostRecord> {
    match selector {
        HostSelector::Index(n) => {
            let hosts = fetch_active(port).await?;
            pick(&hosts, *n).cloned()
        }
        HostSelector::Mac(mac) => get_json(&format!("{}/hosts/{}", base_url(port), mac)).await,
    }
}

fn pick(hosts: &[HostRecord], n: usize) -> Result<&HostRecord> {
    if n == 0 || n > hosts.len() {
        anyhow::bail!("no active host #{} ({} active)", n, hosts.len());
    }
    Ok(&hosts[n - 1])
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

pub async fn cmd_hosts(port: u16, all: bool) -> Result<()> {
    let hosts = if all {
        let resp: HostsResponse = get_json(&format!("{}/hosts", base_url(port))).await?;
        resp.hosts
    } else {
        fetch_active(port).await?
    };

    if hosts.is_empty() {
        println!("No hosts discovered yet.");
        return Ok(());
    }

    println!(
        "{:>3}  {:<20} {:<16} {:<18} {:<8} {}",
        "#", "HOSTNAME", "IP", "MAC", "STATE", "KEY"
    );
    for (i, h) in hosts.iter().enumerate() {
        println!(
            "{:>3}  {:<20} {:<16} {:<18} {:<8} {}",
            i + 1,
            h.metadata.hostname,
            h.metadata.ip_address,
            h.metadata.mac_address,
            if h.active { "active" } else { "inactive" },
            if h.ssh_key_pushed { "pushed" } else { "-" },
        );
    }
    Ok(())
}

pub async fn cmd_show(port: u16, selector: &HostSelector) -> Result<()> {
    let h = resolve(port, selector).await?;
    let m = &h.metadata;

    println!("═══════════════════════════════════════");
    println!("  {}", m.hostname);
    println!("═══════════════════════════════════════");
    println!("  MAC          : {}", m.mac_address);
    println!("  IP           : {}", m.ip_address);
    println!("  OS           : {} ({})", m.os.name, m.os.arch);
    println!("  Kernel       : {}", m.os.kernel);
    println!("  CPU          : {} x{}", m.hardware.cpu_model, m.hardware.cpu_cores);
    println!("  Memory       : {:.2} GiB", m.hardware.memory_gb);
    println!("  Disks        : {}", m.hardware.disk_count);
    println!("  State        : {}", if h.active { "active" } else { "inactive" });
    println!("  Packets      : {}", h.packet_count);
    println!("  First seen   : {} ms", h.first_seen);
    println!("  Last seen    : {} ms", h.last_seen);
    match h.pushed_at {
        Some(at) if h.ssh_key_pushed => println!("  SSH key      : pushed at {} ms", at),
        _ => println!("  SSH key      : not pushed"),
    }
    Ok(())
}

pub async fn mark_pushed(port: u16, mac: &str) -> Result<HostRecord> {
    post_json(&format!("{}/hosts/{}/key-pushed", base_url(port), mac)).await
}

pub async fn cmd_mark_pushed(port: u16, selector: &HostSelector) -> Result<()> {
    let mac = match selector {
        HostSelector::Mac(mac) => mac.clone(),
        HostSelector::Index(_) => resolve(port, selector).await?.metadata.mac_address,
    };
    let record = mark_pushed(port, &mac).await?;
    println!("✓ {} ({}) marked as key pushed", record.metadata.hostname, mac);
    Ok(())
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  lanmeshd Status");
    println!("═══════════════════════════════════════");
    println!("  Node           : {} ({})", resp.node.hostname, resp.node.mac_address);
    println!("  Address        : {}", resp.node.ip_address);
    println!("  Role           : {}", resp.role);
    println!("  Uptime         : {}s", resp.uptime_secs);
    println!("  Hosts          : {} active / {} known", resp.hosts.active, resp.hosts.total);
    println!("  Announces sent : {}", resp.discovery.announces_sent);
    println!("  Accepted       : {}", resp.discovery.accepted);
    println!("  Rejected       : {}", resp.discovery.rejected);
    println!("  Rate limited   : {}", resp.discovery.rate_limited);
    println!("  Overloaded     : {}", resp.discovery.overloaded);
    Ok(())
}
