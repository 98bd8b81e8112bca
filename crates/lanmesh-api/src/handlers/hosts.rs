//! /hosts handlers: list, inspect, mark key pushed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use lanmesh_services::HostRecord;

use super::{error, normalize_mac, with_registry, ApiError, ApiState};

#[derive(Debug, Serialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostRecord>,
}

fn sorted(mut hosts: Vec<HostRecord>) -> Vec<HostRecord> {
    hosts.sort_by(|a, b| {
        a.metadata
            .hostname
            .cmp(&b.metadata.hostname)
            .then_with(|| a.metadata.mac_address.cmp(&b.metadata.mac_address))
    });
    hosts
}

// ── /hosts/active (GET) ───────────────────────────────────────────────────────

pub async fn handle_active_hosts(
    State(state): State<ApiState>,
) -> Result<Json<HostsResponse>, ApiError> {
    let hosts = with_registry(&state, |r| r.get_active()).await?;
    Ok(Json(HostsResponse {
        hosts: sorted(hosts),
    }))
}

// ── /hosts (GET) ──────────────────────────────────────────────────────────────

pub async fn handle_all_hosts(
    State(state): State<ApiState>,
) -> Result<Json<HostsResponse>, ApiError> {
    let hosts = with_registry(&state, |r| r.get_all()).await?;
    Ok(Json(HostsResponse {
        hosts: sorted(hosts),
    }))
}

// ── /hosts/{mac} (GET) ────────────────────────────────────────────────────────

pub async fn handle_host(
    State(state): State<ApiState>,
    Path(mac): Path<String>,
) -> Result<Json<HostRecord>, ApiError> {
    let mac = normalize_mac(&mac);
    let lookup = mac.clone();
    match with_registry(&state, move |r| r.get(&lookup)).await? {
        Some(record) => Ok(Json(record)),
        None => Err(error(StatusCode::NOT_FOUND, format!("host {} not found", mac))),
    }
}

// ── /hosts/{mac}/key-pushed (POST) ────────────────────────────────────────────

pub async fn handle_mark_key_pushed(
    State(state): State<ApiState>,
    Path(mac): Path<String>,
) -> Result<Json<HostRecord>, ApiError> {
    let mac = normalize_mac(&mac);
    let record = with_registry(&state, move |r| r.mark_key_pushed(&mac)).await?;
    tracing::info!(mac = %record.mac(), "ssh key marked as pushed");
    Ok(Json(record))
}
