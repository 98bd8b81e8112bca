pub mod handlers;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::{ApiState, NodeIdentity};

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/hosts", get(handlers::handle_all_hosts))
        .route("/hosts/active", get(handlers::handle_active_hosts))
        .route("/hosts/{mac}", get(handlers::handle_host))
        .route("/hosts/{mac}/key-pushed", post(handlers::handle_mark_key_pushed))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Bind the query API on 127.0.0.1.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("failed to bind API port 127.0.0.1:{}", port))?;
    tracing::info!(addr = ?listener.local_addr().ok(), "API listening");
    Ok(listener)
}

/// Serve on an already-bound listener until shutdown fires.
pub async fn serve_on(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
