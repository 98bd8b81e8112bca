//! HTTP API handlers. Exposes the host registry as JSON.

pub mod hosts;
pub mod status;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use lanmesh_core::Role;
use lanmesh_services::{DiscoveryStats, Registry, RegistryError};

/// Who this daemon is, as reported by /status.
#[derive(Debug, Clone, Serialize)]
pub struct NodeIdentity {
    pub mac_address: String,
    pub ip_address: String,
    pub hostname: String,
}

#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
    pub stats: Arc<DiscoveryStats>,
    pub identity: NodeIdentity,
    pub role: Role,
    pub started_at: std::time::Instant,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn registry_error(e: RegistryError) -> ApiError {
    match e {
        RegistryError::NotFound(mac) => {
            error(StatusCode::NOT_FOUND, format!("host {} not found", mac))
        }
        other => {
            tracing::error!(error = %other, "registry operation failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Run a blocking registry operation off the async executor.
async fn with_registry<T, F>(state: &ApiState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Registry) -> Result<T, RegistryError> + Send + 'static,
{
    let registry = state.registry.clone();
    match tokio::task::spawn_blocking(move || op(&registry)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(registry_error(e)),
        Err(e) => Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// MACs arrive in whatever case the caller typed.
fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase().replace('-', ":")
}

// Re-export handler functions for use in router setup.
pub use hosts::{handle_active_hosts, handle_all_hosts, handle_host, handle_mark_key_pushed};
pub use status::handle_status;
