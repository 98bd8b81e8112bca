//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use lanmesh_core::Role;
use lanmesh_services::{RegistryCounts, StatsSnapshot};

use super::{with_registry, ApiError, ApiState, NodeIdentity};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node: NodeIdentity,
    pub role: Role,
    pub uptime_secs: u64,
    pub hosts: RegistryCounts,
    pub discovery: StatsSnapshot,
}

pub async fn handle_status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let hosts = with_registry(&state, |r| r.counts()).await?;
    Ok(Json(StatusResponse {
        node: state.identity.clone(),
        role: state.role,
        uptime_secs: state.started_at.elapsed().as_secs(),
        hosts,
        discovery: state.stats.snapshot(),
    }))
}
