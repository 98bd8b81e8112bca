//! lanmesh integration test harness.
//!
//! Every test runs in-process: engines bind ephemeral ports on 127.0.0.1 and
//! reach each other through unicast targets, so no privileges or real LAN
//! are needed. Registries live in per-node temp directories.

mod api;
mod discovery;
mod infra;

pub use infra::*;
