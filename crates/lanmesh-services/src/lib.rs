//! lanmesh-services: stateful pieces of the daemon.
//!
//! The registry is the single shared mutable resource. It is constructed
//! once and handed to every duty that needs it.

pub mod discovery;
pub mod hosts_file;
pub mod ratelimit;
pub mod registry;

pub use discovery::{
    Discovery, DiscoveryConfig, DiscoveryError, DiscoveryStats, MetadataSource, StaticMetadata,
    StatsSnapshot,
};
pub use hosts_file::HostsFile;
pub use ratelimit::RateLimiter;
pub use registry::{HostRecord, Registry, RegistryCounts, RegistryError, UpsertOutcome};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current time as Unix seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
