//! lanmesh-core: shared types, wire format, and cryptographic primitives.
//! All other lanmesh crates depend on this one.

pub mod cidr;
pub mod config;
pub mod crypto;
pub mod validate;
pub mod wire;

pub use cidr::Ipv4Cidr;
pub use config::{AnnounceMode, LanmeshConfig, ResolvedNode, Role};
pub use crypto::SharedSecret;
pub use validate::{seal, validate, Rejection, ValidationContext};
pub use wire::{HardwareInfo, HostMetadata, OsInfo};
