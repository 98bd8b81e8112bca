//! Configuration system for lanmesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. explicit path (`--config`)
//!   2. $LANMESH_CONFIG
//!   3. $XDG_CONFIG_HOME/lanmesh/config.toml
//!   4. ~/.config/lanmesh/config.toml

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cidr::{CidrError, Ipv4Cidr};
use crate::crypto::{SecretError, SharedSecret, PLACEHOLDER_SECRET};
use crate::wire::{DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};

/// Default port for the local query API.
pub const DEFAULT_API_PORT: u16 = 5679;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanmeshConfig {
    pub node: NodeConfig,
    pub hosts_file: HostsFileConfig,
    pub api: ApiConfig,
    pub connect: ConnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// CIDR of the LAN to announce on. Required in broadcast mode.
    pub network_range: String,
    /// UDP port for announcements, both sending and receiving.
    pub port: u16,
    pub announce_interval_secs: u64,
    /// Silence after which a host is marked inactive.
    pub stale_threshold_secs: u64,
    /// Cadence of the expiry sweep.
    pub expiry_check_secs: u64,
    pub shared_secret: String,
    pub db_path: PathBuf,
    /// Default tracing directive when RUST_LOG is unset.
    pub log_level: String,
    pub role: Role,
    pub mode: AnnounceMode,
    pub multicast_group: String,
    /// Extra announce targets, "ip" or "ip:port".
    pub unicast_targets: Vec<String>,
    /// Datagrams accepted per source IP per one-minute window.
    pub rate_limit_per_minute: u32,
    /// Upper bound on concurrently processed accepted datagrams.
    pub max_inflight: usize,
}

/// Which duties the discovery engine runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Announce and listen.
    #[default]
    Both,
    /// Announce only; nothing is registered.
    Announce,
    /// Listen only; this host stays silent.
    Listen,
}

impl Role {
    pub fn announces(self) -> bool {
        matches!(self, Role::Both | Role::Announce)
    }

    pub fn listens(self) -> bool {
        matches!(self, Role::Both | Role::Listen)
    }
}

/// How announcements reach the LAN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceMode {
    /// Subnet broadcast address computed from `network_range`.
    #[default]
    Broadcast,
    /// IPv4 multicast group.
    Multicast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsFileConfig {
    /// Keep a managed section of the hosts file in sync with the registry.
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Port of the local query API, bound to 127.0.0.1.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub api_port: u16,
    /// Public key pushed to remote hosts.
    pub public_key: PathBuf,
    /// Known-hosts file pinned on first contact.
    pub known_hosts: PathBuf,
    pub ssh_port: u16,
    pub default_user: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_range: String::new(),
            port: DEFAULT_PORT,
            announce_interval_secs: 30,
            stale_threshold_secs: 90,
            expiry_check_secs: 5,
            shared_secret: PLACEHOLDER_SECRET.to_string(),
            db_path: data_dir().join("hosts.db"),
            log_level: "info".to_string(),
            role: Role::Both,
            mode: AnnounceMode::Broadcast,
            multicast_group: DEFAULT_MULTICAST_GROUP.to_string(),
            unicast_targets: Vec::new(),
            rate_limit_per_minute: 5,
            max_inflight: 64,
        }
    }
}

impl Default for HostsFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/etc/hosts"),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            public_key: dirs_or_home().join(".ssh").join("id_ed25519.pub"),
            known_hosts: config_dir().join("known_hosts"),
            ssh_port: 22,
            default_user: "root".to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("lanmesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("lanmesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Expand a leading `~` to $HOME.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs_or_home().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("network_range must be set in broadcast mode (e.g. '10.51.240.0/23')")]
    MissingNetworkRange,
    #[error("invalid network_range: {0}")]
    InvalidNetworkRange(#[from] CidrError),
    #[error("'{0}' is not an IPv4 multicast group")]
    InvalidMulticastGroup(String),
    #[error("invalid unicast target '{0}'")]
    InvalidUnicastTarget(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LanmeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::file_path);
        let mut config = Self::load_file(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a single file with no env overrides. A missing file yields defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config: LanmeshConfig = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            LanmeshConfig::default()
        };
        config.expand_paths();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LANMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing(path: &Path) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
            }
            let text = toml::to_string_pretty(&LanmeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(path, text)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        Ok(path.to_path_buf())
    }

    fn expand_paths(&mut self) {
        self.node.db_path = expand_tilde(&self.node.db_path);
        self.hosts_file.path = expand_tilde(&self.hosts_file.path);
        self.connect.public_key = expand_tilde(&self.connect.public_key);
        self.connect.known_hosts = expand_tilde(&self.connect.known_hosts);
    }

    /// Apply LANMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LANMESH_NODE__NETWORK_RANGE") {
            self.node.network_range = v;
        }
        if let Ok(v) = std::env::var("LANMESH_NODE__PORT") {
            if let Ok(p) = v.parse() {
                self.node.port = p;
            }
        }
        if let Ok(v) = std::env::var("LANMESH_NODE__SHARED_SECRET") {
            self.node.shared_secret = v;
        }
        if let Ok(v) = std::env::var("LANMESH_NODE__DB_PATH") {
            self.node.db_path = expand_tilde(Path::new(&v));
        }
        if let Ok(v) = std::env::var("LANMESH_NODE__LOG_LEVEL") {
            self.node.log_level = v;
        }
        if let Ok(v) = std::env::var("LANMESH_NODE__ROLE") {
            match v.as_str() {
                "both" => self.node.role = Role::Both,
                "announce" => self.node.role = Role::Announce,
                "listen" => self.node.role = Role::Listen,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("LANMESH_HOSTS_FILE__ENABLED") {
            self.hosts_file.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("LANMESH_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
                self.connect.api_port = p;
            }
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Node settings checked and converted into runtime types.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub secret: SharedSecret,
    pub network: Option<Ipv4Cidr>,
    pub multicast_group: Option<Ipv4Addr>,
    pub unicast_targets: Vec<SocketAddrV4>,
    pub announce_interval: Duration,
    pub stale_threshold: Duration,
    pub expiry_check: Duration,
}

impl NodeConfig {
    /// Check every fatal-at-startup condition and resolve runtime types.
    pub fn validate(&self) -> Result<ResolvedNode, ConfigError> {
        let secret = SharedSecret::from_config(&self.shared_secret)?;

        if self.port == 0 {
            return Err(ConfigError::Zero("node.port"));
        }
        if self.announce_interval_secs == 0 {
            return Err(ConfigError::Zero("node.announce_interval_secs"));
        }
        if self.expiry_check_secs == 0 {
            return Err(ConfigError::Zero("node.expiry_check_secs"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::Zero("node.rate_limit_per_minute"));
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::Zero("node.max_inflight"));
        }

        let network = if self.network_range.trim().is_empty() {
            None
        } else {
            Some(self.network_range.parse::<Ipv4Cidr>()?)
        };

        let multicast_group = match self.mode {
            AnnounceMode::Broadcast => {
                if network.is_none() && self.role.announces() {
                    return Err(ConfigError::MissingNetworkRange);
                }
                None
            }
            AnnounceMode::Multicast => {
                let group: Ipv4Addr = self
                    .multicast_group
                    .parse()
                    .map_err(|_| ConfigError::InvalidMulticastGroup(self.multicast_group.clone()))?;
                if !group.is_multicast() {
                    return Err(ConfigError::InvalidMulticastGroup(self.multicast_group.clone()));
                }
                Some(group)
            }
        };

        let unicast_targets = self
            .unicast_targets
            .iter()
            .map(|t| parse_target(t, self.port))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedNode {
            secret,
            network,
            multicast_group,
            unicast_targets,
            announce_interval: Duration::from_secs(self.announce_interval_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
            expiry_check: Duration::from_secs(self.expiry_check_secs),
        })
    }
}

/// Parse "ip" or "ip:port", defaulting the port.
fn parse_target(s: &str, default_port: u16) -> Result<SocketAddrV4, ConfigError> {
    if let Ok(addr) = s.parse::<SocketAddrV4>() {
        return Ok(addr);
    }
    s.parse::<Ipv4Addr>()
        .map(|ip| SocketAddrV4::new(ip, default_port))
        .map_err(|_| ConfigError::InvalidUnicastTarget(s.to_string()))
}
